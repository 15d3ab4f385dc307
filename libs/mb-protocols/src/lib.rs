//! Modbus protocol core for mbcollect
//!
//! Provides the link layer both roles are built on:
//! - PDU construction and parsing for the register function codes
//! - RTU (CRC16) and TCP (MBAP) framing, requests and responses
//! - Serial and TCP connections with frame-exact receive
//! - A request/response client for the master role
//! - A holding register bank answering requests for the slave role

pub mod modbus;

pub use modbus::constants;

pub use modbus::{
    addressing, crc16, Addressing, FrameDirection, FrameHeader, ModbusClient, ModbusConnection,
    ModbusFrameProcessor, ModbusListener, ModbusMode, ModbusPdu, Parity, PduBuilder, RegisterBank,
    RequestOutcome, SerialSettings,
};
