//! Modbus Protocol Implementation
//!
//! ```text
//! mb-protocols/modbus
//!     ├── ModbusPdu / PduBuilder (function code payloads)
//!     ├── ModbusFrameProcessor (MBAP header / CRC handling)
//!     ├── ModbusConnection / ModbusListener (TCP and serial links)
//!     ├── ModbusClient (master request/response)
//!     └── RegisterBank (slave register map)
//! ```

mod client;
mod connection;
pub mod constants;
mod pdu;
mod server;
mod transport;

pub use client::ModbusClient;
pub use connection::{ModbusConnection, ModbusListener, Parity, SerialSettings};
pub use pdu::{ModbusPdu, PduBuilder};
pub use server::{addressing, Addressing, RegisterBank, RequestOutcome};
pub use transport::{
    crc16, rtu_frame_length, FrameDirection, FrameHeader, ModbusFrameProcessor, ModbusMode,
    RtuLength,
};
