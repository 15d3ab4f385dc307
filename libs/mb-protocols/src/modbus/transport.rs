//! Modbus transport layer implementation
//!
//! Frame processing for TCP (MBAP header) and RTU (CRC16) in both directions:
//! requests out / responses in for the master, requests in / responses out
//! for the slave.

use mb_comlink::error::{ComLinkError, Result};
use tracing::debug;

use super::constants::{self, FC_WRITE_MULTIPLE_REGISTERS};
use super::pdu::ModbusPdu;

/// Modbus transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusMode {
    /// TCP mode (using MBAP header)
    Tcp,
    /// RTU mode (using CRC check)
    Rtu,
}

/// Which side of the exchange a received frame comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Master → slave
    Request,
    /// Slave → master
    Response,
}

/// Addressing of a received request, needed to answer it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub unit_id: u8,
    /// Present in TCP mode only
    pub transaction_id: Option<u16>,
}

/// The request a response is expected for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRequest {
    transaction_id: u16,
    function_code: u8,
    unit_id: u8,
}

/// Modbus frame processor
#[derive(Debug)]
pub struct ModbusFrameProcessor {
    mode: ModbusMode,
    /// Outstanding request; a link carries one exchange at a time
    pending: Option<PendingRequest>,
    /// Channel-local transaction ID counter (for TCP mode)
    next_transaction_id: u16,
}

impl ModbusFrameProcessor {
    pub fn new(mode: ModbusMode) -> Self {
        Self {
            mode,
            pending: None,
            next_transaction_id: 1,
        }
    }

    pub fn mode(&self) -> ModbusMode {
        self.mode
    }

    /// Get next transaction ID (TCP mode only)
    pub fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        // Wraps naturally from 0xFFFF to 0x0000
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    // ========================================================================
    // Master side
    // ========================================================================

    /// Build a request frame and remember it for response matching
    pub fn build_request(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let function_code = pdu.function_code().unwrap_or(0);
        let transaction_id = match self.mode {
            ModbusMode::Tcp => self.next_transaction_id(),
            ModbusMode::Rtu => 0,
        };
        self.pending = Some(PendingRequest {
            transaction_id,
            function_code,
            unit_id,
        });

        match self.mode {
            ModbusMode::Tcp => Self::build_tcp_frame(transaction_id, unit_id, pdu),
            ModbusMode::Rtu => Self::build_rtu_frame(unit_id, pdu),
        }
    }

    /// Parse a response frame against the outstanding request.
    ///
    /// `Ok(None)` means the frame is a late answer to an earlier TCP request
    /// and should be skipped.
    pub fn parse_response(&mut self, data: &[u8]) -> Result<Option<ModbusPdu>> {
        let pending = self
            .pending
            .ok_or_else(|| ComLinkError::protocol("Response without outstanding request"))?;

        let (header, pdu) = self.parse_frame(data)?;

        if let Some(transaction_id) = header.transaction_id {
            if transaction_id != pending.transaction_id {
                debug!(
                    "Ignoring response with stale transaction ID {:04X} (expecting {:04X})",
                    transaction_id, pending.transaction_id
                );
                return Ok(None);
            }
        }

        // Remove potential error bit
        let response_fc = pdu.function_code().map(|fc| fc & 0x7F).unwrap_or(0);
        if response_fc != pending.function_code || header.unit_id != pending.unit_id {
            return Err(ComLinkError::Protocol(format!(
                "Response mismatch: expected FC={:02X}/unit={}, got FC={:02X}/unit={}",
                pending.function_code, pending.unit_id, response_fc, header.unit_id
            )));
        }

        self.pending = None;
        Ok(Some(pdu))
    }

    // ========================================================================
    // Slave side
    // ========================================================================

    /// Parse a request frame received from a master
    pub fn parse_request(&self, data: &[u8]) -> Result<(FrameHeader, ModbusPdu)> {
        let (header, pdu) = self.parse_frame(data)?;
        if pdu.is_empty() {
            return Err(ComLinkError::protocol("Request without function code"));
        }
        Ok((header, pdu))
    }

    /// Build the answer to a request parsed with [`Self::parse_request`]
    pub fn build_response(&self, header: &FrameHeader, pdu: &ModbusPdu) -> Vec<u8> {
        match self.mode {
            ModbusMode::Tcp => {
                Self::build_tcp_frame(header.transaction_id.unwrap_or(0), header.unit_id, pdu)
            },
            ModbusMode::Rtu => Self::build_rtu_frame(header.unit_id, pdu),
        }
    }

    // ========================================================================
    // Framing
    // ========================================================================

    fn parse_frame(&self, data: &[u8]) -> Result<(FrameHeader, ModbusPdu)> {
        match self.mode {
            ModbusMode::Tcp => Self::parse_tcp_frame(data),
            ModbusMode::Rtu => Self::parse_rtu_frame(data),
        }
    }

    /// MBAP + PDU
    fn build_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let length = (pdu.len() + 1) as u16; // PDU length + unit_id

        let mut frame = Vec::with_capacity(constants::MBAP_HEADER_LEN + 1 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol_id
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu.as_slice());

        debug!(
            "Building TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, PDU_len={}",
            transaction_id,
            unit_id,
            pdu.function_code().unwrap_or(0),
            pdu.len()
        );

        frame
    }

    /// `unit_id` + PDU + CRC (little-endian)
    fn build_rtu_frame(unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
        frame.push(unit_id);
        frame.extend_from_slice(pdu.as_slice());

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        debug!(
            "Building RTU frame: unit_id={}, FC={:02X}, PDU_len={}, CRC={:04X}",
            unit_id,
            pdu.function_code().unwrap_or(0),
            pdu.len(),
            crc
        );

        frame
    }

    fn parse_tcp_frame(data: &[u8]) -> Result<(FrameHeader, ModbusPdu)> {
        if data.len() < constants::MBAP_HEADER_LEN + 2 {
            return Err(ComLinkError::Protocol("TCP frame too short".to_string()));
        }

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let unit_id = data[6];

        if protocol_id != 0 {
            return Err(ComLinkError::Protocol(format!(
                "Invalid protocol ID: expected 0, got {}",
                protocol_id
            )));
        }

        if data.len() != constants::MBAP_HEADER_LEN + length as usize {
            return Err(ComLinkError::Protocol(format!(
                "Invalid TCP frame length: expected {}, got {}",
                constants::MBAP_HEADER_LEN + length as usize,
                data.len()
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[constants::MBAP_HEADER_LEN + 1..])?;
        Ok((
            FrameHeader {
                unit_id,
                transaction_id: Some(transaction_id),
            },
            pdu,
        ))
    }

    fn parse_rtu_frame(data: &[u8]) -> Result<(FrameHeader, ModbusPdu)> {
        if data.len() < 4 {
            return Err(ComLinkError::Protocol("RTU frame too short".to_string()));
        }

        let frame_len = data.len();
        let received_crc = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);
        let calculated_crc = crc16(&data[..frame_len - 2]);
        if received_crc != calculated_crc {
            return Err(ComLinkError::Protocol(format!(
                "CRC mismatch: expected 0x{calculated_crc:04X}, got 0x{received_crc:04X}"
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[1..frame_len - 2])?;
        Ok((
            FrameHeader {
                unit_id: data[0],
                transaction_id: None,
            },
            pdu,
        ))
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    pub fn is_exception_response(pdu: &[u8]) -> bool {
        !pdu.is_empty() && (pdu[0] & 0x80) != 0
    }

    /// Split an exception PDU into (function code, exception code)
    pub fn parse_exception(pdu: &[u8]) -> Result<(u8, u8)> {
        if pdu.len() < 2 {
            return Err(ComLinkError::Protocol(
                "Invalid exception response".to_string(),
            ));
        }
        Ok((pdu[0] & 0x7F, pdu[1]))
    }

    pub fn exception_description(exception_code: u8) -> &'static str {
        match exception_code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x07 => "Negative Acknowledge",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
    }
}

/// CRC16 checksum (Modbus RTU: init 0xFFFF, reflected poly 0xA001)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Length of an RTU frame as far as its first bytes tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuLength {
    /// Total frame length including CRC
    Known(usize),
    /// More bytes are needed before the length is known
    NeedMore,
    /// Function code without a fixed layout; frame ends on line silence
    Unknown,
}

/// Work out the total length of an RTU frame from its first bytes
pub fn rtu_frame_length(buffer: &[u8], direction: FrameDirection) -> RtuLength {
    let Some(&function_code) = buffer.get(1) else {
        return RtuLength::NeedMore;
    };

    match direction {
        FrameDirection::Response => {
            if function_code & 0x80 != 0 {
                return RtuLength::Known(5); // unit + fc + code + CRC
            }
            match function_code {
                // unit + fc + byte count + data + CRC
                0x01..=0x04 => match buffer.get(2) {
                    Some(&byte_count) => RtuLength::Known(5 + byte_count as usize),
                    None => RtuLength::NeedMore,
                },
                // unit + fc + address + value/quantity + CRC
                0x05 | 0x06 | 0x0F | 0x10 => RtuLength::Known(8),
                _ => RtuLength::Unknown,
            }
        },
        FrameDirection::Request => match function_code {
            0x01..=0x06 => RtuLength::Known(8),
            // unit + fc + address + quantity + byte count + data + CRC
            0x0F | FC_WRITE_MULTIPLE_REGISTERS => match buffer.get(6) {
                Some(&byte_count) => RtuLength::Known(9 + byte_count as usize),
                None => RtuLength::NeedMore,
            },
            _ => RtuLength::Unknown,
        },
    }
}
