//! Register data model
//!
//! Types flowing from the role engines through the decoder to the recorder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ComLinkError, Result};

/// Largest register count a single Read Holding Registers request may ask for
pub const MAX_ITEM_REGISTERS: u16 = 125;

/// How a run of registers is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// One 16-bit integer per register
    #[serde(rename = "int")]
    Int16,
    /// 32-bit float over two registers, high word first
    #[serde(rename = "floatmsb")]
    FloatWordsMsb,
    /// 32-bit float over two registers, low word first
    #[serde(rename = "floatlsb")]
    FloatWordsLsb,
}

impl ValueKind {
    /// Registers consumed per decoded value
    pub fn word_width(self) -> u16 {
        match self {
            ValueKind::Int16 => 1,
            ValueKind::FloatWordsMsb | ValueKind::FloatWordsLsb => 2,
        }
    }

    /// Tag used in configuration files and startup reports
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int16 => "int",
            ValueKind::FloatWordsMsb => "floatmsb",
            ValueKind::FloatWordsLsb => "floatlsb",
        }
    }

    pub fn is_float(self) -> bool {
        self.word_width() == 2
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = ComLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "int16" => Ok(ValueKind::Int16),
            "floatmsb" => Ok(ValueKind::FloatWordsMsb),
            "floatlsb" => Ok(ValueKind::FloatWordsLsb),
            other => Err(ComLinkError::config(format!(
                "Unknown register type '{}' (expected int, floatmsb or floatlsb)",
                other
            ))),
        }
    }
}

/// Integer interpretation of `Int16` registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntSignedness {
    #[default]
    Unsigned,
    Signed,
}

/// One register range to poll (master) or to type writes with (slave)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredItem {
    pub address: u16,
    pub count: u16,
    pub kind: ValueKind,
}

impl ConfiguredItem {
    pub fn new(address: u16, count: u16, kind: ValueKind) -> Self {
        Self {
            address,
            count,
            kind,
        }
    }

    /// One past the last register of the item
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.count)
    }

    /// Check count rules and the 16-bit address space bound
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(ComLinkError::config(format!(
                "Address {}: count must be at least 1",
                self.address
            )));
        }
        if self.kind.is_float() && self.count % 2 != 0 {
            return Err(ComLinkError::config(format!(
                "Address {}: {} needs an even register count, got {}",
                self.address, self.kind, self.count
            )));
        }
        if self.count > MAX_ITEM_REGISTERS {
            return Err(ComLinkError::config(format!(
                "Address {}: count {} exceeds the {} register read limit",
                self.address, self.count, MAX_ITEM_REGISTERS
            )));
        }
        if self.end() > 0x1_0000 {
            return Err(ComLinkError::config(format!(
                "Address {} + count {} exceeds the register space",
                self.address, self.count
            )));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &ConfiguredItem) -> bool {
        u32::from(self.address) < other.end() && u32::from(other.address) < self.end()
    }

    /// Whether a write of `count` registers at `address` falls inside this item
    /// on value boundaries
    pub fn covers(&self, address: u16, count: u16) -> bool {
        let start = u32::from(address);
        let end = start + u32::from(count);
        if count == 0 || start < u32::from(self.address) || end > self.end() {
            return false;
        }
        let width = u32::from(self.kind.word_width());
        (start - u32::from(self.address)) % width == 0 && u32::from(count) % width == 0
    }
}

/// Raw registers as read from, or written to, the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegisterGroup {
    pub base_address: u16,
    pub words: Vec<u16>,
}

impl RawRegisterGroup {
    pub fn new(base_address: u16, words: Vec<u16>) -> Self {
        Self {
            base_address,
            words,
        }
    }
}

/// A typed register value
///
/// Floats travel as their IEEE-754 bit pattern so NaN and the infinities,
/// which any register pair can hold, survive the JSON channel unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RegisterValue {
    Int(i64),
    Float(#[serde(with = "f32_bits")] f32),
}

mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        u32::deserialize(deserializer).map(f32::from_bits)
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Int(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{:.6}", f64::from(*v)),
        }
    }
}

/// A value tagged with the register address it starts at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodedValue {
    pub address: u16,
    pub value: RegisterValue,
}

/// One decoded register group on its way to the recorder
///
/// `remote` names the polled device in master role and is `None` in slave role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub values: Vec<DecodedValue>,
}

impl ReadingEvent {
    pub fn master(remote: impl Into<String>, values: Vec<DecodedValue>) -> Self {
        Self {
            remote: Some(remote.into()),
            values,
        }
    }

    pub fn slave(values: Vec<DecodedValue>) -> Self {
        Self {
            remote: None,
            values,
        }
    }
}
