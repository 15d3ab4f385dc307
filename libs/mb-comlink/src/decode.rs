//! Register decoder
//!
//! Slices a raw register group into typed values. Pure functions: no state,
//! no I/O.

use crate::bytes::{reg_to_i16, regs_to_f32_lsb, regs_to_f32_msb};
use crate::error::{ComLinkError, Result};
use crate::types::{
    ConfiguredItem, DecodedValue, IntSignedness, RawRegisterGroup, RegisterValue, ValueKind,
};

/// Decode `group` as a run of `kind` values starting at `group.base_address`.
///
/// Int16 values land on consecutive addresses; float values on every other
/// address. A float group with an odd number of words is rejected as a whole.
pub fn decode(
    group: &RawRegisterGroup,
    kind: ValueKind,
    signedness: IntSignedness,
) -> Result<Vec<DecodedValue>> {
    let width = usize::from(kind.word_width());
    if group.words.len() % width != 0 {
        return Err(ComLinkError::decode(format!(
            "{} words at address {} cannot be split into {} values",
            group.words.len(),
            group.base_address,
            kind
        )));
    }
    if group.base_address as usize + group.words.len() > 0x1_0000 {
        return Err(ComLinkError::decode(format!(
            "Group at address {} with {} words exceeds the register space",
            group.base_address,
            group.words.len()
        )));
    }

    let values = group
        .words
        .chunks_exact(width)
        .enumerate()
        .map(|(index, chunk)| {
            let address = group.base_address + (index * width) as u16;
            let value = match kind {
                ValueKind::Int16 => RegisterValue::Int(int_value(chunk[0], signedness)),
                ValueKind::FloatWordsMsb => {
                    RegisterValue::Float(regs_to_f32_msb(&[chunk[0], chunk[1]]))
                },
                ValueKind::FloatWordsLsb => {
                    RegisterValue::Float(regs_to_f32_lsb(&[chunk[0], chunk[1]]))
                },
            };
            DecodedValue { address, value }
        })
        .collect();

    Ok(values)
}

/// Decode a group read for `item`; the word count must match the item exactly.
pub fn decode_item(
    group: &RawRegisterGroup,
    item: &ConfiguredItem,
    signedness: IntSignedness,
) -> Result<Vec<DecodedValue>> {
    if group.words.len() != usize::from(item.count) {
        return Err(ComLinkError::decode(format!(
            "Address {}: expected {} registers, got {}",
            item.address,
            item.count,
            group.words.len()
        )));
    }
    decode(group, item.kind, signedness)
}

/// Pick the layout for a range written by a remote master: the first item
/// covering the range decides, anything else is raw `Int16`.
pub fn infer_kind(items: &[ConfiguredItem], address: u16, count: u16) -> ValueKind {
    items
        .iter()
        .find(|item| item.covers(address, count))
        .map(|item| item.kind)
        .unwrap_or(ValueKind::Int16)
}

fn int_value(word: u16, signedness: IntSignedness) -> i64 {
    match signedness {
        IntSignedness::Unsigned => i64::from(word),
        IntSignedness::Signed => i64::from(reg_to_i16(word)),
    }
}
