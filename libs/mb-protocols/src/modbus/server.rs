//! Slave-side register bank
//!
//! Holds the registers a remote master reads and writes, and turns each
//! request PDU into its response PDU.

use mb_comlink::bytes::{bytes_to_regs, regs_to_bytes};
use mb_comlink::error::Result;
use mb_comlink::types::RawRegisterGroup;
use tracing::debug;

use super::constants::{
    BROADCAST_UNIT_ID, EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE,
    EXCEPTION_ILLEGAL_FUNCTION, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER, MODBUS_MAX_READ_REGISTERS,
    MODBUS_MAX_WRITE_REGISTERS, SLAVE_REGISTER_COUNT,
};
use super::pdu::{ModbusPdu, PduBuilder};
use super::transport::ModbusMode;

/// How a slave treats a request addressed to `unit_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Apply and reply
    Answer,
    /// RTU broadcast: apply, never reply
    Silent,
    /// Another unit on the line
    Ignore,
}

/// Classify a request. `own_unit` of `None` serves every unit id, which is
/// how TCP slaves behave; broadcast only exists on RTU.
pub fn addressing(mode: ModbusMode, own_unit: Option<u8>, unit_id: u8) -> Addressing {
    if mode == ModbusMode::Rtu && unit_id == BROADCAST_UNIT_ID {
        return Addressing::Silent;
    }
    match own_unit {
        Some(own) if own != unit_id => Addressing::Ignore,
        _ => Addressing::Answer,
    }
}

/// Result of applying one request to the bank
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// PDU to send back
    pub response: ModbusPdu,
    /// Registers changed by a write request
    pub written: Option<RawRegisterGroup>,
}

/// Holding registers served to a remote master.
///
/// Read Input Registers is answered from the same table.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    registers: Vec<u16>,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new(SLAVE_REGISTER_COUNT)
    }
}

impl RegisterBank {
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![0; size],
        }
    }

    /// Bank preloaded with `values` from address 0
    pub fn with_values(size: usize, values: &[u16]) -> Self {
        let mut bank = Self::new(size.max(values.len()));
        bank.registers[..values.len()].copy_from_slice(values);
        bank
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers.get(usize::from(address)).copied()
    }

    /// Copy `values` in at `address`; false if the range is outside the bank
    pub fn set(&mut self, address: u16, values: &[u16]) -> bool {
        match self.range(address, values.len()) {
            Some(range) => {
                self.registers[range].copy_from_slice(values);
                true
            },
            None => false,
        }
    }

    fn range(&self, address: u16, count: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::from(address);
        let end = start.checked_add(count)?;
        (end <= self.registers.len()).then_some(start..end)
    }

    /// Apply a request PDU. Malformed or unsupported requests are answered
    /// with an exception response, never an error.
    pub fn handle(&mut self, request: &ModbusPdu) -> Result<RequestOutcome> {
        let fc = request.function_code().unwrap_or(0);
        let outcome = match fc {
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => self.read(fc, request),
            FC_WRITE_SINGLE_REGISTER => self.write_single(request),
            FC_WRITE_MULTIPLE_REGISTERS => self.write_multiple(request),
            _ => Err(EXCEPTION_ILLEGAL_FUNCTION),
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(code) => {
                debug!(
                    "Answering FC={:02X} with exception {:02X} ({})",
                    fc,
                    code,
                    ModbusPdu::function_code_description(fc)
                );
                Ok(RequestOutcome {
                    response: PduBuilder::build_exception(fc, code)?,
                    written: None,
                })
            },
        }
    }

    fn read(&self, fc: u8, request: &ModbusPdu) -> std::result::Result<RequestOutcome, u8> {
        let (address, quantity) = match (request.len(), request.u16_at(1), request.u16_at(3)) {
            (5, Some(a), Some(q)) => (a, q),
            _ => return Err(EXCEPTION_ILLEGAL_DATA_VALUE),
        };
        if quantity == 0 || quantity > MODBUS_MAX_READ_REGISTERS {
            return Err(EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        let range = self
            .range(address, usize::from(quantity))
            .ok_or(EXCEPTION_ILLEGAL_DATA_ADDRESS)?;

        let mut response = ModbusPdu::new();
        let data = regs_to_bytes(&self.registers[range]);
        response
            .push(fc)
            .and_then(|()| response.push(data.len() as u8))
            .and_then(|()| response.extend(&data))
            .map_err(|_| EXCEPTION_ILLEGAL_DATA_VALUE)?;

        Ok(RequestOutcome {
            response,
            written: None,
        })
    }

    fn write_single(&mut self, request: &ModbusPdu) -> std::result::Result<RequestOutcome, u8> {
        let (address, value) = match (request.len(), request.u16_at(1), request.u16_at(3)) {
            (5, Some(a), Some(v)) => (a, v),
            _ => return Err(EXCEPTION_ILLEGAL_DATA_VALUE),
        };
        if !self.set(address, &[value]) {
            return Err(EXCEPTION_ILLEGAL_DATA_ADDRESS);
        }

        Ok(RequestOutcome {
            // FC06 answers with an echo of the request
            response: request.clone(),
            written: Some(RawRegisterGroup::new(address, vec![value])),
        })
    }

    fn write_multiple(&mut self, request: &ModbusPdu) -> std::result::Result<RequestOutcome, u8> {
        let data = request.as_slice();
        let (address, quantity) = match (request.u16_at(1), request.u16_at(3), data.get(5)) {
            (Some(a), Some(q), Some(&byte_count))
                if q >= 1
                    && q <= MODBUS_MAX_WRITE_REGISTERS
                    && usize::from(byte_count) == usize::from(q) * 2
                    && data.len() == 6 + usize::from(byte_count) =>
            {
                (a, q)
            },
            _ => return Err(EXCEPTION_ILLEGAL_DATA_VALUE),
        };

        let values = bytes_to_regs(&data[6..]);
        if !self.set(address, &values) {
            return Err(EXCEPTION_ILLEGAL_DATA_ADDRESS);
        }

        let response = PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)
            .and_then(|b| b.address(address))
            .and_then(|b| b.quantity(quantity))
            .map_err(|_| EXCEPTION_ILLEGAL_DATA_VALUE)?
            .build();

        Ok(RequestOutcome {
            response,
            written: Some(RawRegisterGroup::new(address, values)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn pdu(bytes: &[u8]) -> ModbusPdu {
        ModbusPdu::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_addressing() {
        assert_eq!(addressing(ModbusMode::Rtu, Some(1), 1), Addressing::Answer);
        assert_eq!(addressing(ModbusMode::Rtu, Some(1), 2), Addressing::Ignore);
        assert_eq!(addressing(ModbusMode::Rtu, Some(1), 0), Addressing::Silent);
        assert_eq!(addressing(ModbusMode::Rtu, None, 0), Addressing::Silent);

        // TCP has no broadcast; unit 0 is an ordinary address there
        assert_eq!(addressing(ModbusMode::Tcp, None, 0), Addressing::Answer);
        assert_eq!(addressing(ModbusMode::Tcp, None, 0xFF), Addressing::Answer);
        assert_eq!(addressing(ModbusMode::Tcp, Some(1), 0), Addressing::Ignore);
    }

    #[test]
    fn test_default_bank_size() {
        assert_eq!(RegisterBank::default().len(), 400);
    }

    #[test]
    fn test_read_holding_registers() {
        let mut bank = RegisterBank::with_values(10, &[0x4640, 0xE666, 7]);
        let request = PduBuilder::build_read_request(0x03, 1, 2).unwrap();
        let outcome = bank.handle(&request).unwrap();
        assert_eq!(outcome.response.as_slice(), &[0x03, 0x04, 0xE6, 0x66, 0x00, 0x07]);
        assert!(outcome.written.is_none());
    }

    #[test]
    fn test_read_out_of_range() {
        let mut bank = RegisterBank::new(4);
        let request = PduBuilder::build_read_request(0x03, 3, 2).unwrap();
        let outcome = bank.handle(&request).unwrap();
        assert_eq!(outcome.response.as_slice(), &[0x83, 0x02]);
    }

    #[test]
    fn test_write_single_register() {
        let mut bank = RegisterBank::default();
        let request = PduBuilder::build_write_single(0, 1234).unwrap();
        let outcome = bank.handle(&request).unwrap();

        assert_eq!(outcome.response.as_slice(), request.as_slice());
        assert_eq!(outcome.written, Some(RawRegisterGroup::new(0, vec![1234])));
        assert_eq!(bank.get(0), Some(1234));
    }

    #[test]
    fn test_write_multiple_registers() {
        let mut bank = RegisterBank::default();
        let request = PduBuilder::build_write_multiple(1, &[5678, 9012]).unwrap();
        let outcome = bank.handle(&request).unwrap();

        assert_eq!(outcome.response.as_slice(), &[0x10, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(
            outcome.written,
            Some(RawRegisterGroup::new(1, vec![5678, 9012]))
        );
        assert_eq!(bank.get(1), Some(5678));
        assert_eq!(bank.get(2), Some(9012));
    }

    #[test]
    fn test_write_multiple_bad_byte_count() {
        let mut bank = RegisterBank::default();
        let outcome = bank
            .handle(&pdu(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x03, 0x00, 0x01, 0x02]))
            .unwrap();
        assert_eq!(outcome.response.as_slice(), &[0x90, 0x03]);
        assert!(outcome.written.is_none());
        assert_eq!(bank.get(1), Some(0));
    }

    #[test]
    fn test_write_past_bank_end() {
        let mut bank = RegisterBank::default();
        let request = PduBuilder::build_write_single(400, 1).unwrap();
        let outcome = bank.handle(&request).unwrap();
        assert_eq!(outcome.response.as_slice(), &[0x86, 0x02]);
        assert!(outcome.written.is_none());
    }

    #[test]
    fn test_unsupported_function() {
        let mut bank = RegisterBank::default();
        let outcome = bank.handle(&pdu(&[0x01, 0x00, 0x00, 0x00, 0x08])).unwrap();
        assert_eq!(outcome.response.as_slice(), &[0x81, 0x01]);
    }
}
