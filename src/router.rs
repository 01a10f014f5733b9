use crate::config::types::Granularity;
use crate::sink::{LogSink, Provisioned, SinkError};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OnceCell};

impl Granularity {
    pub fn bucket_millis(self) -> i64 {
        match self {
            Granularity::Daily => 86_400_000,
            Granularity::Hourly => 3_600_000,
        }
    }
}

/// Time bucket an event is routed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    granularity: Granularity,
    /// Whole buckets since the Unix epoch
    index: i64,
}

impl StreamKey {
    pub fn new(granularity: Granularity, index: i64) -> Self {
        Self { granularity, index }
    }

    pub fn for_timestamp(granularity: Granularity, timestamp_millis: i64) -> Self {
        Self::new(
            granularity,
            timestamp_millis.div_euclid(granularity.bucket_millis()),
        )
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    /// Destination stream name, `<prefix>-<index>`
    pub fn stream_name(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.index)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let granularity = match self.granularity {
            Granularity::Daily => "day",
            Granularity::Hourly => "hour",
        };
        write!(f, "{}:{}", granularity, self.index)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct StreamSlot {
    name: OnceCell<String>,
    upload_lock: AsyncMutex<()>,
}

/// A provisioned stream. Uploads to it go through [`StreamHandle::lock`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    key: StreamKey,
    slot: Arc<StreamSlot>,
}

impl StreamHandle {
    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn name(&self) -> &str {
        self.slot.name.get().map(String::as_str).unwrap_or_default()
    }

    /// Exclusive right to upload to this stream
    pub async fn lock(&self) -> AsyncMutexGuard<'_, ()> {
        self.slot.upload_lock.lock().await
    }
}

/// Maps keys to destination streams and makes sure each exists before use.
///
/// Creation is attempted at most once per key at a time; after a success the
/// stream is cached for the life of the router. A failed attempt is not
/// cached, so the next batch for that key tries again.
pub struct StreamRouter {
    sink: Arc<dyn LogSink>,
    group: String,
    stream_prefix: String,
    granularity: Granularity,
    timeout: Duration,
    slots: Mutex<HashMap<StreamKey, Arc<StreamSlot>>>,
}

impl StreamRouter {
    pub fn new(
        sink: Arc<dyn LogSink>,
        group: impl Into<String>,
        stream_prefix: impl Into<String>,
        granularity: Granularity,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            group: group.into(),
            stream_prefix: stream_prefix.into(),
            granularity,
            timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn key_for(&self, timestamp_millis: i64) -> StreamKey {
        StreamKey::for_timestamp(self.granularity, timestamp_millis)
    }

    pub async fn ensure_stream(&self, key: StreamKey) -> Result<StreamHandle, SinkError> {
        let slot = self.slot(key);

        slot.name
            .get_or_try_init(|| async {
                let name = key.stream_name(&self.stream_prefix);
                let provisioned =
                    tokio::time::timeout(self.timeout, self.sink.ensure_stream(&self.group, &name))
                        .await
                        .map_err(|_| SinkError::Timeout {
                            operation: "ensure_stream",
                        })??;

                match provisioned {
                    Provisioned::Created => {
                        tracing::info!(group = %self.group, stream = %name, "Log stream created")
                    }
                    Provisioned::AlreadyExists => {
                        tracing::info!(group = %self.group, stream = %name, "Log stream already exists")
                    }
                }
                Ok::<_, SinkError>(name)
            })
            .await?;

        Ok(StreamHandle { key, slot })
    }

    fn slot(&self, key: StreamKey) -> Arc<StreamSlot> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.entry(key).or_default().clone()
    }
}
