use crate::batch::{Batch, BatchAccumulator, BatchLimits, OfferOutcome};
use crate::config::types::{Config, Granularity, TimeoutConfig};
use crate::encode::EventEncoder;
use crate::pipeline::report::{ObjectFailure, ObjectOutcome, ObjectStage, ObjectStatus, RunReport};
use crate::pipeline::uploader::{RetryPolicy, Uploader};
use crate::router::{Clock, StreamKey, StreamRouter};
use crate::sink::{LogSink, Provisioned, SinkError};
use crate::source::lines::{DecodedObject, LineSource};
use crate::source::store::{FetchError, ListError, ObjectFetcher, ObjectLister};
use crate::source::timestamp::{TimestampError, TimestampResolver};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that end a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing source objects failed: {0}")]
    Listing(#[from] ListError),

    #[error("listing source objects timed out after {0:?}")]
    ListingTimeout(Duration),

    #[error("log group '{group}' could not be provisioned: {source}")]
    GroupProvision {
        group: String,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub prefix: String,
    pub log_group: String,
    pub stream_prefix: String,
    pub limits: BatchLimits,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutConfig,
    pub workers: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prefix: config.source.prefix.clone(),
            log_group: config.sink.log_group.clone(),
            stream_prefix: config.sink.stream_prefix.clone(),
            limits: BatchLimits::from(&config.batch),
            retry: RetryPolicy::from(&config.retry),
            timeouts: config.timeouts.clone(),
            workers: config.concurrency.workers.max(1),
        }
    }
}

/// The pipeline's collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn ObjectLister>,
    pub fetcher: Arc<dyn ObjectFetcher>,
    pub lines: Arc<dyn LineSource>,
    pub sink: Arc<dyn LogSink>,
}

/// Ships every object under a prefix into the sink.
///
/// Objects are fetched, decoded into lines, stamped, routed to a stream key
/// and fed through one [`BatchAccumulator`] per key. A batch is uploaded as
/// soon as it is sealed, so memory stays bounded by one open batch per stream
/// per object in flight.
///
/// Failures of a single object or batch are logged and counted and the run
/// moves on. Only a failed listing or a log group that cannot be provisioned
/// ends the run early.
pub struct IngestionPipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    timestamps: TimestampResolver,
    encoder: EventEncoder,
    router: StreamRouter,
    uploader: Uploader,
}

impl IngestionPipeline {
    pub fn new(
        collaborators: Collaborators,
        settings: PipelineSettings,
        timestamps: TimestampResolver,
        granularity: Granularity,
    ) -> Self {
        let router = StreamRouter::new(
            collaborators.sink.clone(),
            settings.log_group.clone(),
            settings.stream_prefix.clone(),
            granularity,
            settings.timeouts.upload,
        );
        let uploader = Uploader::new(
            collaborators.sink.clone(),
            settings.log_group.clone(),
            settings.retry,
            settings.timeouts.upload,
        );

        Self {
            collaborators,
            settings,
            timestamps,
            encoder: EventEncoder,
            router,
            uploader,
        }
    }

    pub fn from_config(
        config: &Config,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TimestampError> {
        let timestamps = TimestampResolver::from_config(&config.routing.timestamp, clock)?;
        Ok(Self::new(
            collaborators,
            PipelineSettings::from_config(config),
            timestamps,
            config.routing.granularity,
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs until every listed object is handled or `cancel` fires.
    ///
    /// On cancellation no new object or upload is started; uploads already
    /// under way finish first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, PipelineError> {
        let group = &self.settings.log_group;
        info!(group = %group, prefix = %self.settings.prefix, workers = self.settings.workers, "Starting ingestion run");

        self.ensure_group().await?;

        let mut report = RunReport::default();
        let mut listing = self.collaborators.lister.list(&self.settings.prefix);
        let mut in_flight = FuturesUnordered::new();
        let mut listing_done = false;
        let mut fatal = None;

        loop {
            tokio::select! {
                biased;

                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    report.record(&outcome);
                }

                _ = cancel.cancelled(), if !listing_done => {
                    info!(in_flight = in_flight.len(), "Cancellation requested, not starting new objects");
                    report.cancelled = true;
                    listing_done = true;
                }

                next = tokio::time::timeout(self.settings.timeouts.list, listing.next()),
                    if !listing_done && in_flight.len() < self.settings.workers =>
                {
                    match next {
                        Ok(Some(Ok(key))) => {
                            report.listed_objects += 1;
                            in_flight.push(self.process_object(key, &cancel));
                        }
                        Ok(None) => {
                            debug!(listed = report.listed_objects, "Listing exhausted");
                            listing_done = true;
                        }
                        Ok(Some(Err(e))) => {
                            error!(error = %e, "Listing failed");
                            fatal = Some(PipelineError::Listing(e));
                            listing_done = true;
                        }
                        Err(_) => {
                            error!(timeout = ?self.settings.timeouts.list, "Listing timed out");
                            fatal = Some(PipelineError::ListingTimeout(self.settings.timeouts.list));
                            listing_done = true;
                        }
                    }
                }

                else => break,
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            listed = report.listed_objects,
            processed = report.processed_objects,
            failed = report.failed_objects,
            cancelled = report.cancelled_objects,
            batches = report.uploaded_batches,
            bytes = report.uploaded_bytes,
            "Ingestion run finished"
        );

        Ok(report)
    }

    async fn ensure_group(&self) -> Result<(), PipelineError> {
        let group = &self.settings.log_group;
        let provision_error = |source| PipelineError::GroupProvision {
            group: group.clone(),
            source,
        };

        let provisioned = tokio::time::timeout(
            self.settings.timeouts.upload,
            self.collaborators.sink.ensure_group(group),
        )
        .await
        .map_err(|_| provision_error(SinkError::Timeout {
            operation: "ensure_group",
        }))?
        .map_err(provision_error)?;

        match provisioned {
            Provisioned::Created => info!(group = %group, "Log group created"),
            Provisioned::AlreadyExists => info!(group = %group, "Log group already exists"),
        }
        Ok(())
    }

    async fn process_object(&self, key: String, cancel: &CancellationToken) -> ObjectOutcome {
        let mut outcome = ObjectOutcome::new(key.clone());
        info!(key = %key, "Processing object");

        let decoded = match self.fetch_and_decode(&key, &mut outcome).await {
            Ok(decoded) => decoded,
            Err(failure) => {
                warn!(key = %key, stage = ?outcome.stage, error = %failure, "Skipping object");
                outcome.status = ObjectStatus::Failed(failure);
                return outcome;
            }
        };

        let mut accumulators: BTreeMap<StreamKey, BatchAccumulator> = BTreeMap::new();
        let mut total_batches = 0;

        for line in decoded.lines() {
            let timestamp = self.timestamps.resolve(line.text);
            let event = match self.encoder.encode(line.text, timestamp) {
                Ok(event) => event,
                Err(source) => {
                    let failure = ObjectFailure::Encode {
                        ordinal: line.ordinal,
                        source,
                    };
                    warn!(key = %key, error = %failure, "Skipping rest of object");
                    outcome.status = ObjectStatus::Failed(failure);
                    return outcome;
                }
            };
            outcome.lines += 1;

            let stream_key = self.router.key_for(event.timestamp);
            let limits = self.settings.limits;
            let accumulator = accumulators
                .entry(stream_key)
                .or_insert_with(|| BatchAccumulator::new(stream_key, limits));

            if let OfferOutcome::SealedAndAppended(batch) = accumulator.offer(event) {
                total_batches += 1;
                if !self.ship(&key, batch, &mut outcome, cancel).await {
                    return outcome;
                }
            }
        }
        outcome.stage = ObjectStage::Encoded;

        for (_, mut accumulator) in accumulators {
            if let Some(batch) = accumulator.flush() {
                total_batches += 1;
                if !self.ship(&key, batch, &mut outcome, cancel).await {
                    return outcome;
                }
            }
        }
        outcome.stage = ObjectStage::Batched;

        if outcome.failed_batches > 0 {
            outcome.status = ObjectStatus::Failed(ObjectFailure::Batches {
                failed: outcome.failed_batches,
                total: total_batches,
            });
            warn!(key = %key, failed = outcome.failed_batches, total = total_batches, "Object partially shipped");
        } else {
            outcome.stage = ObjectStage::Uploaded;
            info!(
                key = %key,
                lines = outcome.lines,
                batches = outcome.uploaded_batches,
                bytes = outcome.uploaded_bytes,
                "Object shipped"
            );
        }

        outcome
    }

    async fn fetch_and_decode(
        &self,
        key: &str,
        outcome: &mut ObjectOutcome,
    ) -> Result<DecodedObject, ObjectFailure> {
        let payload = tokio::time::timeout(
            self.settings.timeouts.fetch,
            self.collaborators.fetcher.fetch(key),
        )
        .await
        .map_err(|_| FetchError::Timeout(key.to_string()))??;
        outcome.stage = ObjectStage::Fetched;

        let lines = self.collaborators.lines.clone();
        let owned_key = key.to_string();
        let decoded = tokio::task::spawn_blocking(move || lines.decode(&owned_key, &payload))
            .await
            .map_err(|e| ObjectFailure::DecodeTask(e.to_string()))??;
        outcome.stage = ObjectStage::Decoded;

        debug!(key = %key, encoding = ?decoded.encoding(), bytes = decoded.text_len(), "Object decoded");
        Ok(decoded)
    }

    /// Provision the batch's stream and upload it. Returns false when the run
    /// was cancelled and the object should stop.
    async fn ship(
        &self,
        key: &str,
        batch: Batch,
        outcome: &mut ObjectOutcome,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            info!(key = %key, "Run cancelled, leaving object unfinished");
            outcome.status = ObjectStatus::Cancelled;
            return false;
        }

        let stream = match self.router.ensure_stream(batch.stream()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(key = %key, stream_key = %batch.stream(), error = %e, "Could not provision stream");
                outcome.failed_batches += 1;
                return true;
            }
        };

        match self.uploader.upload(&stream, &batch).await {
            Ok(receipt) => {
                outcome.uploaded_batches += 1;
                outcome.uploaded_events += receipt.events;
                outcome.uploaded_bytes += receipt.bytes;
            }
            Err(e) => {
                warn!(key = %key, stream = %stream.name(), events = batch.len(), error = %e, "Batch not delivered");
                outcome.failed_batches += 1;
            }
        }
        true
    }
}
