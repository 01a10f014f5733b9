//! In-memory sink for tests and library callers exercising the pipeline.
//!
//! [`MemorySink`] is a test double and is never built by `sink::from_config`.
//! It keeps every batch it receives and can script provisioning and upload
//! failures.

use super::{LogSink, Provisioned, SinkError, UploadError, UploadFailure};
use crate::batch::Batch;
use crate::encode::LogEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A batch as received by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct ReceivedBatch {
    pub group: String,
    pub stream: String,
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeSet<String>,
    streams: BTreeSet<(String, String)>,
    received: Vec<ReceivedBatch>,
    ensure_stream_calls: usize,
    put_calls: usize,
    group_failure: Option<SinkError>,
    stream_failure: Option<SinkError>,
    upload_failures: VecDeque<UploadFailure>,
    max_batch_bytes: Option<usize>,
    in_flight: HashMap<String, usize>,
    max_in_flight_per_stream: usize,
}

/// Sink that keeps everything in memory. Failures can be scripted.
///
/// Meant for tests only; a run configured from YAML never builds one.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<State>,
    upload_delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each upload sleeps this long, so overlapping uploads can be observed
    pub fn with_upload_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            upload_delay: Some(delay),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn fail_next_ensure_group(&self, error: SinkError) {
        self.state().group_failure = Some(error);
    }

    pub fn fail_next_ensure_stream(&self, error: SinkError) {
        self.state().stream_failure = Some(error);
    }

    /// Queue failures returned, in order, by the next uploads
    pub fn push_upload_failures(&self, failures: impl IntoIterator<Item = UploadFailure>) {
        self.state().upload_failures.extend(failures);
    }

    /// Refuse batches above this many bytes, like a real service would
    pub fn reject_batches_over(&self, max_bytes: usize) {
        self.state().max_batch_bytes = Some(max_bytes);
    }

    pub fn groups(&self) -> Vec<String> {
        self.state().groups.iter().cloned().collect()
    }

    pub fn streams(&self) -> Vec<String> {
        self.state()
            .streams
            .iter()
            .map(|(_, stream)| stream.clone())
            .collect()
    }

    pub fn received(&self) -> Vec<ReceivedBatch> {
        self.state().received.clone()
    }

    /// Messages per stream, in arrival order
    pub fn messages_by_stream(&self) -> BTreeMap<String, Vec<String>> {
        let mut by_stream: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for batch in &self.state().received {
            by_stream
                .entry(batch.stream.clone())
                .or_default()
                .extend(batch.events.iter().map(|e| e.message.clone()));
        }
        by_stream
    }

    pub fn ensure_stream_calls(&self) -> usize {
        self.state().ensure_stream_calls
    }

    pub fn put_calls(&self) -> usize {
        self.state().put_calls
    }

    /// Highest number of uploads seen running at once against one stream
    pub fn max_in_flight_per_stream(&self) -> usize {
        self.state().max_in_flight_per_stream
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn ensure_group(&self, group: &str) -> Result<Provisioned, SinkError> {
        let mut state = self.state();
        if let Some(error) = state.group_failure.take() {
            return Err(error);
        }
        if state.groups.insert(group.to_string()) {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn ensure_stream(&self, group: &str, stream: &str) -> Result<Provisioned, SinkError> {
        let mut state = self.state();
        state.ensure_stream_calls += 1;
        if let Some(error) = state.stream_failure.take() {
            return Err(error);
        }
        if state
            .streams
            .insert((group.to_string(), stream.to_string()))
        {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn put_events(&self, group: &str, stream: &str, batch: &Batch) -> Result<(), UploadError> {
        {
            let mut state = self.state();
            state.put_calls += 1;
            let in_flight = state.in_flight.entry(stream.to_string()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            state.max_in_flight_per_stream = state.max_in_flight_per_stream.max(current);
        }

        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.in_flight.get_mut(stream) {
            *in_flight -= 1;
        }

        if let Some(failure) = state.upload_failures.pop_front() {
            return Err(UploadError::new(stream, failure));
        }
        if state.max_batch_bytes.is_some_and(|max| batch.total_bytes() > max) {
            return Err(UploadError::new(stream, UploadFailure::SizeExceeded));
        }
        if !state.streams.contains(&(group.to_string(), stream.to_string())) {
            return Err(UploadError::new(
                stream,
                UploadFailure::Rejected(format!("stream {} does not exist", stream)),
            ));
        }

        state.received.push(ReceivedBatch {
            group: group.to_string(),
            stream: stream.to_string(),
            events: batch.events().to_vec(),
        });
        Ok(())
    }
}
