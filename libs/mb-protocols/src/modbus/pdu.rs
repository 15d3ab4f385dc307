//! Modbus PDU data structure
//!
//! Fixed-size stack buffer plus the builders and parsers for the register
//! function codes.

use mb_comlink::bytes::bytes_to_regs;
use mb_comlink::error::{ComLinkError, Result};
use tracing::debug;

use super::constants::{
    self, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
};
use super::transport::ModbusFrameProcessor;

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ComLinkError::Protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            debug!(
                "PDU parsed: FC={:02X} ({}), len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len
            );
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ComLinkError::Protocol("PDU buffer full".to_string()));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.extend(&value.to_be_bytes())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ComLinkError::Protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    /// Big-endian u16 at byte `offset`
    #[inline]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        self.as_slice()
            .get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Human-readable function code name
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            0x17 => "Read/Write Multiple Registers",
            _ => "Unknown Function",
        }
    }

    /// Turn an exception response into [`ComLinkError::Exception`]
    pub fn check_exception(&self) -> Result<()> {
        if !self.is_exception() {
            return Ok(());
        }
        let (function, code) = ModbusFrameProcessor::parse_exception(self.as_slice())?;
        Err(ComLinkError::Exception {
            function,
            code,
            description: ModbusFrameProcessor::exception_description(code),
        })
    }

    /// Register payload of a FC03/FC04 response that must carry `quantity` registers
    pub fn read_registers(&self, function_code: u8, quantity: u16) -> Result<Vec<u16>> {
        self.check_exception()?;
        self.expect_function(function_code)?;

        let data = self.as_slice();
        let byte_count = *data
            .get(1)
            .ok_or_else(|| ComLinkError::protocol("Read response without byte count"))?
            as usize;
        if byte_count != usize::from(quantity) * 2 {
            return Err(ComLinkError::Protocol(format!(
                "Byte count mismatch: requested {} registers, response announces {} bytes",
                quantity, byte_count
            )));
        }
        if data.len() != 2 + byte_count {
            return Err(ComLinkError::Protocol(format!(
                "Read response length mismatch: expected {} bytes, got {}",
                2 + byte_count,
                data.len()
            )));
        }

        Ok(bytes_to_regs(&data[2..]))
    }

    /// Validate a FC06/FC16 response against the address and value/quantity sent
    pub fn check_write_echo(&self, function_code: u8, address: u16, second: u16) -> Result<()> {
        self.check_exception()?;
        self.expect_function(function_code)?;

        match (self.len, self.u16_at(1), self.u16_at(3)) {
            (5, Some(a), Some(s)) if a == address && s == second => Ok(()),
            _ => Err(ComLinkError::Protocol(format!(
                "Unexpected write response: {:02X?}",
                self.as_slice()
            ))),
        }
    }

    fn expect_function(&self, function_code: u8) -> Result<()> {
        match self.function_code() {
            Some(fc) if fc == function_code => Ok(()),
            Some(fc) => Err(ComLinkError::Protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                function_code, fc
            ))),
            None => Err(ComLinkError::protocol("Empty response PDU")),
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    fn data(mut self, data: &[u8]) -> Result<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// Read request for FC03/FC04
    pub fn build_read_request(fc: u8, start_address: u16, quantity: u16) -> Result<ModbusPdu> {
        if fc != FC_READ_HOLDING_REGISTERS && fc != FC_READ_INPUT_REGISTERS {
            return Err(ComLinkError::Protocol(format!(
                "build_read_request only supports FC03/FC04, got FC{:02X}",
                fc
            )));
        }
        if quantity == 0 || quantity > constants::MODBUS_MAX_READ_REGISTERS {
            return Err(ComLinkError::Protocol(format!(
                "Read quantity {} outside 1..={}",
                quantity,
                constants::MODBUS_MAX_READ_REGISTERS
            )));
        }
        Ok(PduBuilder::new()
            .function_code(fc)?
            .address(start_address)?
            .quantity(quantity)?
            .build())
    }

    /// FC06 request (and its echo response)
    pub fn build_write_single(address: u16, value: u16) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .address(address)?
            .quantity(value)?
            .build())
    }

    /// FC16 request
    pub fn build_write_multiple(address: u16, values: &[u16]) -> Result<ModbusPdu> {
        if values.is_empty() || values.len() > usize::from(constants::MODBUS_MAX_WRITE_REGISTERS) {
            return Err(ComLinkError::Protocol(format!(
                "Write quantity {} outside 1..={}",
                values.len(),
                constants::MODBUS_MAX_WRITE_REGISTERS
            )));
        }
        let mut builder = PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(address)?
            .quantity(values.len() as u16)?
            .byte((values.len() * 2) as u8)?;
        for value in values {
            builder = builder.data(&value.to_be_bytes())?;
        }
        Ok(builder.build())
    }

    /// Exception response for `fc`
    pub fn build_exception(fc: u8, exception_code: u8) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(fc | 0x80)?
            .byte(exception_code)?
            .build())
    }
}
