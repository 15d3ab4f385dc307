//! Shared register model for mbcollect and mbrecorder
//!
//! - [`types`]: configured items, raw groups, decoded values, reading events
//! - [`bytes`]: register word conversions (big-endian packing, float layouts)
//! - [`decode`]: the register decoder
//! - [`channel`]: the collector → recorder reading channel
//! - [`error`]: the error type used by all of the above and by the transport

pub mod bytes;
pub mod channel;
pub mod decode;
pub mod error;
pub mod types;

pub use channel::{
    ReadingConsumer, ReadingListener, ReadingProducer, ReadingSink, DEFAULT_SOCKET_PATH,
};
pub use decode::{decode, decode_item, infer_kind};
pub use error::{ComLinkError, Result};
pub use types::{
    ConfiguredItem, DecodedValue, IntSignedness, RawRegisterGroup, ReadingEvent, RegisterValue,
    ValueKind,
};
