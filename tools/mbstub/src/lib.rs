//! Stub Modbus endpoints
//!
//! `unit-test-server` is a slave holding a fixed register table for the
//! collector to poll. `unit-test-client` is a master that performs a fixed
//! pair of writes against a collector running as slave, then exits.

pub mod args;
pub mod client;
pub mod server;

pub use args::{StubArgs, StubTransport};
pub use client::{connect_with_retry, write_scenario};
pub use server::StubServer;

/// Register table served by the stub slave, starting at address 0.
///
/// 0-1: 12345.6 as MSB-first words, 2-3: 789.0 as LSB-first words,
/// 4-6: the integers 1, 2, 3.
pub const STUB_REGISTERS: [u16; 7] = [0x4640, 0xE666, 0x4000, 0x4445, 1, 2, 3];

/// First write of the stub master: one register
pub const SINGLE_WRITE: (u16, u16) = (0, 1234);

/// Second write of the stub master: two registers
pub const MULTIPLE_WRITE: (u16, [u16; 2]) = (1, [5678, 9012]);
