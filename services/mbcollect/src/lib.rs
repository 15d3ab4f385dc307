//! mbcollect: Modbus data collector
//!
//! Polls remote devices (master role) or serves a remote master (slave
//! role) over a serial line or Modbus-TCP, decodes the registers and streams
//! the readings to mbrecorder.

pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod report;

pub use config::{CollectConfig, Mode, Transport};
pub use engine::{ActiveEngine, RoleEngine};
pub use error::{CollectError, Result};
