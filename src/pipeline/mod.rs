pub mod report;
pub mod runner;
pub mod uploader;

pub use report::{ObjectFailure, ObjectOutcome, ObjectStage, ObjectStatus, RunReport};
pub use runner::{Collaborators, IngestionPipeline, PipelineError, PipelineSettings};
pub use uploader::{RetryPolicy, UploadReceipt, Uploader};
