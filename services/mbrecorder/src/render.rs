//! Line rendering of reading events
//!
//! One event is one line: `mb_<remote>_<address> <value>` tokens (or
//! `mb_<address> <value>` without a remote) joined by `|`.

use std::fmt::Write;

use mb_comlink::ReadingEvent;

/// Render `event` without the trailing newline
pub fn render_line(event: &ReadingEvent) -> String {
    let mut line = String::with_capacity(event.values.len() * 24);
    for (index, value) in event.values.iter().enumerate() {
        if index > 0 {
            line.push('|');
        }
        // Writing into a String cannot fail
        let _ = match &event.remote {
            Some(remote) => write!(line, "mb_{}_{} {}", remote, value.address, value.value),
            None => write!(line, "mb_{} {}", value.address, value.value),
        };
    }
    line
}
