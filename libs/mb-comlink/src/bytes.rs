//! Binary data processing utilities
//!
//! Register word handling for Modbus payloads: big-endian byte packing and
//! the two 32-bit float word layouts.

pub mod conversions;

pub use conversions::*;
