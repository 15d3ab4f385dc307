//! Modbus protocol constants

/// MBAP header bytes before the unit id: transaction(2) + protocol(2) + length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Largest PDU (function code + data)
pub const MAX_PDU_SIZE: usize = 253;

/// Largest MBAP length field value: unit id + PDU
pub const MAX_MBAP_LENGTH: usize = MAX_PDU_SIZE + 1;

/// Largest RTU ADU: unit id + PDU + CRC
pub const MAX_RTU_FRAME: usize = MAX_PDU_SIZE + 3;

/// Register limits per request
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;
pub const MODBUS_MAX_WRITE_REGISTERS: u16 = 123;

// Function codes
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// Exception codes
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Unit id addressing every slave on a serial line; never answered
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Holding registers served in slave role
pub const SLAVE_REGISTER_COUNT: usize = 400;
