use crate::encode::EncodeError;
use crate::source::lines::DecodeError;
use crate::source::store::FetchError;
use serde::Serialize;
use thiserror::Error;

/// How far an object got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStage {
    Listed,
    Fetched,
    Decoded,
    Encoded,
    Batched,
    Uploaded,
}

#[derive(Debug, Error)]
pub enum ObjectFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("decode task failed: {0}")]
    DecodeTask(String),

    #[error("line {ordinal}: {source}")]
    Encode {
        ordinal: usize,
        #[source]
        source: EncodeError,
    },

    #[error("{failed} of {total} batches were not delivered")]
    Batches { failed: usize, total: usize },
}

#[derive(Debug)]
pub enum ObjectStatus {
    Uploaded,
    Failed(ObjectFailure),
    /// The run was cancelled before every batch was sent
    Cancelled,
}

#[derive(Debug)]
pub struct ObjectOutcome {
    pub key: String,
    pub stage: ObjectStage,
    pub status: ObjectStatus,
    pub lines: usize,
    pub uploaded_batches: usize,
    pub failed_batches: usize,
    pub uploaded_events: usize,
    pub uploaded_bytes: usize,
}

impl ObjectOutcome {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stage: ObjectStage::Listed,
            status: ObjectStatus::Uploaded,
            lines: 0,
            uploaded_batches: 0,
            failed_batches: 0,
            uploaded_events: 0,
            uploaded_bytes: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ObjectStatus::Failed(_))
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub listed_objects: usize,
    /// Objects whose every batch was delivered
    pub processed_objects: usize,
    pub failed_objects: usize,
    pub cancelled_objects: usize,
    pub uploaded_batches: usize,
    pub failed_batches: usize,
    pub uploaded_events: usize,
    pub uploaded_bytes: usize,
    /// Set when the run stopped early on request
    pub cancelled: bool,
}

impl RunReport {
    pub fn record(&mut self, outcome: &ObjectOutcome) {
        match outcome.status {
            ObjectStatus::Uploaded => self.processed_objects += 1,
            ObjectStatus::Failed(_) => self.failed_objects += 1,
            ObjectStatus::Cancelled => self.cancelled_objects += 1,
        }
        self.uploaded_batches += outcome.uploaded_batches;
        self.failed_batches += outcome.failed_batches;
        self.uploaded_events += outcome.uploaded_events;
        self.uploaded_bytes += outcome.uploaded_bytes;
    }

    /// The run finished, but some objects were not fully shipped
    pub fn is_degraded(&self) -> bool {
        self.failed_objects > 0
    }
}
