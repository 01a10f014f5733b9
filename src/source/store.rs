use crate::config::types::{SourceConfig, StoreType};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListError {
    #[error("listing '{prefix}' failed: {source}")]
    Store {
        prefix: String,
        #[source]
        source: object_store::Error,
    },

    #[error("listing failed: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("fetching '{key}' failed: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("fetching '{0}' timed out")]
    Timeout(String),
}

#[derive(Debug, Error)]
pub enum StoreConfigError {
    #[error("failed to build {store} object store: {source}")]
    Build {
        store: &'static str,
        #[source]
        source: object_store::Error,
    },
}

/// Enumerates object keys under a prefix. Pagination is internal to the
/// implementation; the returned stream runs until every page is consumed.
pub trait ObjectLister: Send + Sync {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String, ListError>>;
}

#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError>;
}

/// Lister and fetcher over any `object_store` backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, StoreConfigError> {
        let store: Arc<dyn ObjectStore> = match config.store {
            StoreType::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                let store = builder.build().map_err(|source| StoreConfigError::Build {
                    store: "S3",
                    source,
                })?;
                Arc::new(store)
            }
            StoreType::Local => {
                let store = LocalFileSystem::new_with_prefix(&config.bucket).map_err(|source| {
                    StoreConfigError::Build {
                        store: "LocalFileSystem",
                        source,
                    }
                })?;
                Arc::new(store)
            }
        };

        Ok(Self::new(store))
    }
}

/// Keys match `prefix` as a plain string, like an S3 `Prefix`. The store can
/// only list whole path segments, so listing starts at the last `/` in the
/// prefix and keys are filtered from there.
impl ObjectLister for ObjectStoreSource {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String, ListError>> {
        let base = match prefix.rfind('/') {
            Some(end) => &prefix[..end],
            None => "",
        };
        let base_path = (!base.is_empty()).then(|| Path::from(base));

        self.store
            .list(base_path.as_ref())
            .map(move |meta| {
                meta.map(|meta| meta.location.to_string())
                    .map_err(|source| ListError::Store {
                        prefix: prefix.to_string(),
                        source,
                    })
            })
            .filter(move |entry| {
                future::ready(match entry {
                    Ok(key) => key.starts_with(prefix),
                    Err(_) => true,
                })
            })
            .boxed()
    }
}

#[async_trait]
impl ObjectFetcher for ObjectStoreSource {
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError> {
        let location = Path::from(key);
        let to_fetch_error = |source: object_store::Error| match source {
            object_store::Error::NotFound { .. } => FetchError::NotFound(key.to_string()),
            source => FetchError::Store {
                key: key.to_string(),
                source,
            },
        };

        let result = self.store.get(&location).await.map_err(to_fetch_error)?;
        result.bytes().await.map_err(to_fetch_error)
    }
}
