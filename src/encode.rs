//! Wrapping raw lines into sized log events.
//!
//! The sink enforces its payload limit on the serialized form of each event,
//! so the size recorded on a [`LogEvent`] is the length of exactly the bytes
//! the uploader will put on the wire for it, not the length of the message.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Wire form of one event, as sent to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent<'a> {
    pub timestamp: i64,
    #[serde(borrow)]
    pub message: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub message: String,
    /// Length of the event's wire encoding in bytes
    pub serialized_size: usize,
}

impl LogEvent {
    pub fn to_wire(&self) -> WireEvent<'_> {
        WireEvent {
            timestamp: self.timestamp,
            message: std::borrow::Cow::Borrowed(&self.message),
        }
    }
}

/// Measures bytes written without keeping them.
#[derive(Debug, Default)]
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length of the wire encoding of an event with this timestamp and message.
pub fn wire_size(timestamp: i64, message: &str) -> Result<usize, EncodeError> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(
        &mut counter,
        &WireEvent {
            timestamp,
            message: std::borrow::Cow::Borrowed(message),
        },
    )?;
    Ok(counter.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventEncoder;

impl EventEncoder {
    pub fn encode(&self, line: &str, timestamp_millis: i64) -> Result<LogEvent, EncodeError> {
        let serialized_size = wire_size(timestamp_millis, line)?;
        Ok(LogEvent {
            timestamp: timestamp_millis,
            message: line.to_string(),
            serialized_size,
        })
    }
}
