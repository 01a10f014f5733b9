use super::{LogSink, Provisioned, SinkError, UploadError, UploadFailure};
use crate::batch::Batch;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Writes each stream as a JSON-lines file under `<directory>/<group>/`.
#[derive(Debug, Clone)]
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        // Group names look like paths ("/aws/alb/x"); keep them one level deep
        let flattened = group.trim_matches('/').replace('/', "_");
        self.directory.join(flattened)
    }

    pub fn stream_path(&self, group: &str, stream: &str) -> PathBuf {
        self.group_dir(group).join(format!("{}.jsonl", stream))
    }
}

async fn create_new(path: &Path) -> Result<Provisioned, std::io::Error> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(_) => Ok(Provisioned::Created),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Provisioned::AlreadyExists),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl LogSink for FileSink {
    async fn ensure_group(&self, group: &str) -> Result<Provisioned, SinkError> {
        let dir = self.group_dir(group);
        if fs::try_exists(&dir).await? {
            return Ok(Provisioned::AlreadyExists);
        }
        fs::create_dir_all(&dir).await?;
        Ok(Provisioned::Created)
    }

    async fn ensure_stream(&self, group: &str, stream: &str) -> Result<Provisioned, SinkError> {
        fs::create_dir_all(self.group_dir(group)).await?;
        Ok(create_new(&self.stream_path(group, stream)).await?)
    }

    async fn put_events(&self, group: &str, stream: &str, batch: &Batch) -> Result<(), UploadError> {
        let io_failure = |e: std::io::Error| UploadError::new(stream, UploadFailure::Transport(e.to_string()));

        let mut payload = Vec::with_capacity(batch.total_bytes() + batch.len());
        for event in batch.events() {
            serde_json::to_writer(&mut payload, &event.to_wire()).map_err(|e| {
                UploadError::new(stream, UploadFailure::Rejected(e.to_string()))
            })?;
            payload.push(b'\n');
        }

        let path = self.stream_path(group, stream);
        let mut file = match OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UploadError::new(
                    stream,
                    UploadFailure::Rejected(format!("stream {} does not exist", stream)),
                ))
            }
            Err(e) => return Err(io_failure(e)),
        };

        // One write per batch so a batch never lands half-written
        file.write_all(&payload).await.map_err(io_failure)?;
        file.flush().await.map_err(io_failure)?;
        Ok(())
    }
}
