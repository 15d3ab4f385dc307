//! mbrecorder: renders the readings streamed by mbcollect
//!
//! Listens on the reading channel socket and writes one line per reading
//! event on its output, flushed as soon as it is complete.

pub mod error;
pub mod recorder;
pub mod render;

pub use error::{RecorderError, Result};
pub use recorder::{serve, Recorder};
pub use render::render_line;
