pub mod file;
pub mod http;
pub mod memory;

use crate::batch::Batch;
use crate::config::types::{SinkConfig, SinkType};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use file::FileSink;
pub use http::HttpSink;
pub use memory::MemorySink;

/// Result of an idempotent "ensure exists" call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Failure to create a log group or stream.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Transport(String),

    #[error("sink rejected request: {0}")]
    Rejected(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// Why the sink refused a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFailure {
    /// Payload larger than the sink accepts
    SizeExceeded,
    /// Rate limited, try again later
    Throttled,
    /// Events out of order for the stream
    SequencingConflict,
    /// Any other refusal
    Rejected(String),
    /// Network or server trouble
    Transport(String),
    Timeout,
}

#[derive(Debug, Clone, Error)]
#[error("upload to {stream} failed: {failure:?}")]
pub struct UploadError {
    pub stream: String,
    pub failure: UploadFailure,
}

impl UploadError {
    pub fn new(stream: impl Into<String>, failure: UploadFailure) -> Self {
        Self {
            stream: stream.into(),
            failure,
        }
    }

    /// Whether repeating the same upload could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.failure,
            UploadFailure::Throttled | UploadFailure::Transport(_) | UploadFailure::Timeout
        )
    }
}

/// Remote log-aggregation service.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn ensure_group(&self, group: &str) -> Result<Provisioned, SinkError>;

    async fn ensure_stream(&self, group: &str, stream: &str) -> Result<Provisioned, SinkError>;

    async fn put_events(&self, group: &str, stream: &str, batch: &Batch) -> Result<(), UploadError>;
}

pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn LogSink>, SinkError> {
    match config.sink_type {
        SinkType::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| SinkError::Config("http sink needs an endpoint".to_string()))?;
            Ok(Arc::new(HttpSink::new(endpoint)?))
        }
        SinkType::File => {
            let directory = config
                .directory
                .clone()
                .ok_or_else(|| SinkError::Config("file sink needs a directory".to_string()))?;
            Ok(Arc::new(FileSink::new(directory)))
        }
    }
}
