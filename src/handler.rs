//! Batch entry points and the event/response contract used by the deployed
//! container handlers.
//!
//! A handler receives an event naming the data bucket and answers with a
//! status code and a JSON body: the run report on success, or the failure
//! payload (`Exception`, `Traceback`, `Kind`) when anything went wrong.

use crate::config::Config;
use crate::db::Stores;
use crate::error::BatchFailure;
use crate::io;
use crate::pipeline::{ObservationReport, ObservationWorker, ProcessingReport, ProcessingWorker};
use crate::transform::{NpzToTfRecord, RawTransformer};
use anyhow::{Context, Result};
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Invocation event.
///
/// Accepts both `{"data_bucket_name": ...}` and the API-style
/// `{"body": {"data_bucket_name": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EventShape")]
pub struct HandlerEvent {
    pub data_bucket_name: String,

    /// Only consider keys under this prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Reprocess every raw object, not just new ones
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

#[derive(Deserialize)]
struct FlatEvent {
    data_bucket_name: String,
    #[serde(default)]
    data_path: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventShape {
    Flat(FlatEvent),
    Nested { body: FlatEvent },
}

impl From<EventShape> for HandlerEvent {
    fn from(shape: EventShape) -> Self {
        let (EventShape::Flat(event) | EventShape::Nested { body: event }) = shape;
        Self {
            data_bucket_name: event.data_bucket_name,
            data_path: event.data_path.filter(|p| !p.is_empty()),
            force: event.force,
        }
    }
}

impl HandlerEvent {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            data_bucket_name: bucket.into(),
            data_path: None,
            force: false,
        }
    }

    pub fn with_data_path(mut self, data_path: impl Into<String>) -> Self {
        self.data_path = Some(data_path.into()).filter(|p| !p.is_empty());
        self
    }
}

/// Handler reply.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    pub body: serde_json::Value,
}

impl HandlerResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status_code: 200, body }
    }

    pub fn failure(failure: &BatchFailure) -> Self {
        let body = serde_json::to_value(failure).unwrap_or_else(|_| json!({ "Exception": failure.message }));
        Self {
            status_code: 500,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Opens the object store for a bucket name.
pub type BucketResolver = Arc<dyn Fn(&str) -> Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Everything a batch run needs, built once per process.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub stores: Stores,
    transformer: Arc<dyn RawTransformer>,
    buckets: BucketResolver,
}

impl PipelineContext {
    /// Context using the configured blob storage and the npz → TFRecord transformer.
    ///
    /// Fails if `config` does not validate.
    pub fn new(config: Config, stores: Stores) -> Result<Self> {
        config.validate().context("Invalid pipeline configuration")?;

        let aws = config.aws.clone();
        Ok(Self {
            config: Arc::new(config),
            stores,
            transformer: Arc::new(NpzToTfRecord),
            buckets: Arc::new(move |bucket: &str| io::create_bucket_store(bucket, &aws)),
        })
    }

    pub fn with_buckets(mut self, buckets: BucketResolver) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn RawTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectStore>> {
        (self.buckets)(name).with_context(|| format!("Failed to open bucket {}", name))
    }

    pub fn processing_worker(&self, bucket: &str) -> Result<ProcessingWorker> {
        let worker = ProcessingWorker::new(
            self.bucket(bucket)?,
            self.stores.ledger.clone(),
            self.transformer.clone(),
            self.config.processing.clone(),
        );
        Ok(worker.with_content_digest(self.config.aws.use_local.is_some()))
    }

    pub fn observation_worker(&self, bucket: &str) -> Result<ObservationWorker> {
        Ok(ObservationWorker::new(
            self.bucket(bucket)?,
            self.stores.ledger.clone(),
            self.stores.metrics.clone(),
            self.config.observation.clone(),
        ))
    }
}

fn report_failure(what: &str, err: anyhow::Error) -> BatchFailure {
    tracing::error!("{} failed: {:?}", what, err);
    BatchFailure::from_error(&err)
}

/// Run one processing batch for the event's bucket.
pub async fn run_processing(
    ctx: &PipelineContext,
    event: &HandlerEvent,
    force: bool,
) -> Result<ProcessingReport, BatchFailure> {
    tracing::info!("Processing bucket {}", event.data_bucket_name);

    let result = async {
        let worker = ctx.processing_worker(&event.data_bucket_name)?;
        worker.run(event.data_path.as_deref(), force).await
    }
    .await;

    result.map_err(|err| report_failure("Processing run", err))
}

/// Run one observation batch for the event's bucket.
pub async fn run_observation(
    ctx: &PipelineContext,
    event: &HandlerEvent,
) -> Result<ObservationReport, BatchFailure> {
    tracing::info!("Observing bucket {}", event.data_bucket_name);

    let result = async {
        let worker = ctx.observation_worker(&event.data_bucket_name)?;
        worker.run(event.data_path.as_deref()).await
    }
    .await;

    result.map_err(|err| report_failure("Observation run", err))
}

fn parse_event(event: serde_json::Value) -> Result<HandlerEvent, BatchFailure> {
    serde_json::from_value::<HandlerEvent>(event)
        .context("Invalid handler event")
        .map_err(|err| report_failure("Event parsing", err))
}

/// Processing handler: raw JSON event in, status + body out.
pub async fn handle_processing(ctx: &PipelineContext, event: serde_json::Value) -> HandlerResponse {
    let event = match parse_event(event) {
        Ok(event) => event,
        Err(failure) => return HandlerResponse::failure(&failure),
    };

    match run_processing(ctx, &event, event.force).await {
        Ok(report) => HandlerResponse::ok(json!({ "event": event, "report": report })),
        Err(failure) => HandlerResponse::failure(&failure),
    }
}

/// Observation handler: raw JSON event in, status + body out.
pub async fn handle_observation(ctx: &PipelineContext, event: serde_json::Value) -> HandlerResponse {
    let event = match parse_event(event) {
        Ok(event) => event,
        Err(failure) => return HandlerResponse::failure(&failure),
    };

    match run_observation(ctx, &event).await {
        Ok(report) => HandlerResponse::ok(json!({ "event": event, "report": report })),
        Err(failure) => HandlerResponse::failure(&failure),
    }
}
