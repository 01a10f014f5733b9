//! Grouping log events into upload batches.
//!
//! A [`BatchAccumulator`] takes the ordered events bound for one stream and
//! cuts them into contiguous batches, each bounded by a total serialized size
//! and optionally an event count. A batch is sealed (handed out) as soon as
//! the next event would push it past either bound, so batches are as full as
//! the limits allow and the input order is kept within and across batches.
//!
//! An event that is larger than the byte limit on its own is never split or
//! dropped here: it is sealed alone in an oversized batch and the sink gets to
//! reject it.

use crate::config::types::{BatchConfig, DEFAULT_MAX_BATCH_BYTES};
use crate::encode::LogEvent;
use crate::router::StreamKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_count: Option<usize>,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_count: None,
        }
    }
}

impl From<&BatchConfig> for BatchLimits {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_count: config.max_count,
        }
    }
}

/// A sealed, ordered group of events for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    stream: StreamKey,
    events: Vec<LogEvent>,
    total_bytes: usize,
    oversized: bool,
}

impl Batch {
    pub fn stream(&self) -> StreamKey {
        self.stream
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sum of the events' serialized sizes
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// True when the batch is a single event larger than the byte limit
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    pub fn into_events(self) -> Vec<LogEvent> {
        self.events
    }
}

#[derive(Debug)]
pub enum OfferOutcome {
    Appended,
    /// The open batch was full; it is returned and the event starts a new one
    SealedAndAppended(Batch),
}

#[derive(Debug)]
pub struct BatchAccumulator {
    stream: StreamKey,
    limits: BatchLimits,
    open: Vec<LogEvent>,
    open_bytes: usize,
}

impl BatchAccumulator {
    pub fn new(stream: StreamKey, limits: BatchLimits) -> Self {
        Self {
            stream,
            limits,
            open: Vec::new(),
            open_bytes: 0,
        }
    }

    pub fn stream(&self) -> StreamKey {
        self.stream
    }

    pub fn pending_events(&self) -> usize {
        self.open.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.open_bytes
    }

    pub fn offer(&mut self, event: LogEvent) -> OfferOutcome {
        let sealed = if self.would_overflow(&event) {
            self.seal()
        } else {
            None
        };

        self.open_bytes += event.serialized_size;
        self.open.push(event);

        match sealed {
            Some(batch) => OfferOutcome::SealedAndAppended(batch),
            None => OfferOutcome::Appended,
        }
    }

    /// Seals whatever is open. Call once the stream's input is exhausted.
    pub fn flush(&mut self) -> Option<Batch> {
        self.seal()
    }

    fn would_overflow(&self, event: &LogEvent) -> bool {
        if self.open.is_empty() {
            return false;
        }
        let over_bytes = self.open_bytes + event.serialized_size > self.limits.max_bytes;
        let over_count = self
            .limits
            .max_count
            .is_some_and(|max| self.open.len() >= max);
        over_bytes || over_count
    }

    fn seal(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }

        let events = std::mem::take(&mut self.open);
        let total_bytes = std::mem::take(&mut self.open_bytes);
        let oversized = total_bytes > self.limits.max_bytes;

        Some(Batch {
            stream: self.stream,
            events,
            total_bytes,
            oversized,
        })
    }
}

/// Cuts a whole event sequence into batches.
pub fn batch_all(
    stream: StreamKey,
    limits: BatchLimits,
    events: impl IntoIterator<Item = LogEvent>,
) -> Vec<Batch> {
    let mut accumulator = BatchAccumulator::new(stream, limits);
    let mut batches = Vec::new();

    for event in events {
        if let OfferOutcome::SealedAndAppended(batch) = accumulator.offer(event) {
            batches.push(batch);
        }
    }
    batches.extend(accumulator.flush());

    batches
}
