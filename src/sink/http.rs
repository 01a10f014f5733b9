//! Log intake over HTTP.
//!
//! Routes, relative to the configured endpoint:
//!
//! | Call | Request | Success |
//! |---|---|---|
//! | ensure group | `PUT /groups/{group}` | 201 created, 409 already exists |
//! | ensure stream | `PUT /groups/{group}/streams/{stream}` | 201 created, 409 already exists |
//! | put events | `POST /groups/{group}/streams/{stream}/events` | any 2xx |
//!
//! Group and stream names are percent-encoded as single path segments.

use super::{LogSink, Provisioned, SinkError, UploadError, UploadFailure};
use crate::batch::Batch;
use crate::encode::WireEvent;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PutEventsRequest<'a> {
    events: Vec<WireEvent<'a>>,
}

#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(endpoint: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SinkError::Config(e.to_string()))?;

        let base_url = Url::parse(endpoint)
            .map_err(|e| SinkError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SinkError::Config(format!(
                "endpoint '{}' cannot carry a path",
                endpoint
            )));
        }

        Ok(Self { base_url, client })
    }

    /// Appends `segments` to the endpoint path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn group_url(&self, group: &str) -> Url {
        self.url(&["groups", group])
    }

    fn stream_url(&self, group: &str, stream: &str) -> Url {
        self.url(&["groups", group, "streams", stream])
    }

    fn events_url(&self, group: &str, stream: &str) -> Url {
        self.url(&["groups", group, "streams", stream, "events"])
    }

    async fn provision(&self, url: Url) -> Result<Provisioned, SinkError> {
        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::CONFLICT => Ok(Provisioned::AlreadyExists),
            status if status.is_success() => Ok(Provisioned::Created),
            status => Err(SinkError::Rejected(format!(
                "{}: {}",
                status.as_u16(),
                response.text().await.unwrap_or_default()
            ))),
        }
    }
}

fn classify(status: StatusCode, body: String) -> UploadFailure {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => UploadFailure::SizeExceeded,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => UploadFailure::Throttled,
        StatusCode::CONFLICT => UploadFailure::SequencingConflict,
        status if status.is_client_error() => {
            UploadFailure::Rejected(format!("{}: {}", status.as_u16(), body))
        }
        status => UploadFailure::Transport(format!("{}: {}", status.as_u16(), body)),
    }
}

#[async_trait]
impl LogSink for HttpSink {
    async fn ensure_group(&self, group: &str) -> Result<Provisioned, SinkError> {
        self.provision(self.group_url(group)).await
    }

    async fn ensure_stream(&self, group: &str, stream: &str) -> Result<Provisioned, SinkError> {
        self.provision(self.stream_url(group, stream)).await
    }

    async fn put_events(&self, group: &str, stream: &str, batch: &Batch) -> Result<(), UploadError> {
        let url = self.events_url(group, stream);
        let body = PutEventsRequest {
            events: batch.events().iter().map(|e| e.to_wire()).collect(),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let failure = if e.is_timeout() {
                    UploadFailure::Timeout
                } else {
                    UploadFailure::Transport(e.to_string())
                };
                UploadError::new(stream, failure)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::new(stream, classify(status, body)))
    }
}
