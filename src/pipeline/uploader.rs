use crate::batch::Batch;
use crate::config::types::RetryConfig;
use crate::router::StreamHandle;
use crate::sink::{LogSink, UploadError, UploadFailure};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Bounded exponential backoff for transient upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1) as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    pub attempts: usize,
    pub events: usize,
    pub bytes: usize,
}

/// Delivers sealed batches to the sink, one stream at a time.
pub struct Uploader {
    sink: Arc<dyn LogSink>,
    group: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Uploader {
    pub fn new(
        sink: Arc<dyn LogSink>,
        group: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            group: group.into(),
            retry,
            timeout,
        }
    }

    /// Uploads `batch`, retrying transient failures. The stream's upload lock
    /// is held across all attempts so uploads to one stream never overlap.
    pub async fn upload(
        &self,
        stream: &StreamHandle,
        batch: &Batch,
    ) -> Result<UploadReceipt, UploadError> {
        if batch.is_oversized() {
            warn!(
                stream = %stream.name(),
                bytes = batch.total_bytes(),
                "Single event exceeds the batch size limit, sending it alone"
            );
        }

        let _guard = stream.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.timeout,
                self.sink.put_events(&self.group, stream.name(), batch),
            )
            .await
            .unwrap_or_else(|_| Err(UploadError::new(stream.name(), UploadFailure::Timeout)));

            match result {
                Ok(()) => {
                    debug!(
                        stream = %stream.name(),
                        events = batch.len(),
                        bytes = batch.total_bytes(),
                        attempt,
                        "Uploaded batch"
                    );
                    return Ok(UploadReceipt {
                        attempts: attempt,
                        events: batch.len(),
                        bytes: batch.total_bytes(),
                    });
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        stream = %stream.name(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(
                        stream = %stream.name(),
                        attempts = attempt,
                        events = batch.len(),
                        error = %e,
                        "Dropping batch"
                    );
                    return Err(e);
                }
            }
        }
    }
}
