//! Register word conversions
//!
//! A 32-bit float spans two consecutive 16-bit registers. Devices disagree on
//! which register carries the high word, so both layouts get a named function:
//!
//! - MSB-first (`ABCD`): `bits = w0 << 16 | w1`
//! - LSB-first (`CDAB`): `bits = w1 << 16 | w0`

// ============================================================================
// Register <-> Float
// ============================================================================

/// Decode a float whose high word comes first
pub fn regs_to_f32_msb(regs: &[u16; 2]) -> f32 {
    f32::from_bits((u32::from(regs[0]) << 16) | u32::from(regs[1]))
}

/// Decode a float whose low word comes first
pub fn regs_to_f32_lsb(regs: &[u16; 2]) -> f32 {
    f32::from_bits((u32::from(regs[1]) << 16) | u32::from(regs[0]))
}

/// Encode a float as `[high, low]`
pub fn f32_to_regs_msb(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Encode a float as `[low, high]`
pub fn f32_to_regs_lsb(value: f32) -> [u16; 2] {
    let [high, low] = f32_to_regs_msb(value);
    [low, high]
}

// ============================================================================
// Register <-> Integer
// ============================================================================

/// Reinterpret a register as a two's complement value
pub fn reg_to_i16(reg: u16) -> i16 {
    reg as i16
}

// ============================================================================
// Register <-> Bytes (Modbus wire order)
// ============================================================================

/// Unpack big-endian register data. A trailing odd byte is ignored.
pub fn bytes_to_regs(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Pack registers into big-endian bytes
pub fn regs_to_bytes(regs: &[u16]) -> Vec<u8> {
    regs.iter().flat_map(|reg| reg.to_be_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regs_to_f32_msb() {
        // 12345.6f32 = 0x4640E666
        assert_eq!(regs_to_f32_msb(&[0x4640, 0xE666]), 12345.6);
        assert_eq!(regs_to_f32_msb(&[0x0000, 0x0000]), 0.0);
    }

    #[test]
    fn test_regs_to_f32_lsb() {
        // 789.0f32 = 0x44454000
        assert_eq!(regs_to_f32_lsb(&[0x4000, 0x4445]), 789.0);
    }

    #[test]
    fn test_word_layouts_are_mirrored() {
        let regs = [0x1234, 0x5678];
        let swapped = [0x5678, 0x1234];
        assert_eq!(
            regs_to_f32_msb(&regs).to_bits(),
            regs_to_f32_lsb(&swapped).to_bits()
        );
    }

    #[test]
    fn test_f32_encoders() {
        assert_eq!(f32_to_regs_msb(12345.6), [0x4640, 0xE666]);
        assert_eq!(f32_to_regs_lsb(789.0), [0x4000, 0x4445]);
        assert_eq!(regs_to_f32_lsb(&f32_to_regs_lsb(-3.25)), -3.25);
    }

    #[test]
    fn test_reg_to_i16() {
        assert_eq!(reg_to_i16(0xFFFF), -1);
        assert_eq!(reg_to_i16(0x7FFF), i16::MAX);
        assert_eq!(reg_to_i16(0x8000), i16::MIN);
    }

    #[test]
    fn test_bytes_regs_packing() {
        let bytes = [0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_regs(&bytes), vec![0x1234, 0xABCD]);
        assert_eq!(regs_to_bytes(&[0x1234, 0xABCD]), bytes.to_vec());
        assert_eq!(bytes_to_regs(&[0x01, 0x02, 0x03]), vec![0x0102]);
    }
}
