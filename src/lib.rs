//! Droughtwatch Pipeline
//!
//! Ledger-driven batch jobs for a drought-classification model: raw satellite
//! batches are turned into training-ready TFRecords, and scored predictions are
//! checked for drift against a reference dataset.
//!
//! # Architecture
//!
//! - **Ledger / metrics stores** (`db`): relational tables that hold all pipeline state
//! - **Diff engine** (`diff`): set differences between bucket listings and table snapshots
//! - **Transform**: npz → TFRecord conversion of raw batches
//! - **Observe**: summary and drift statistics over predictions
//! - **Pipeline**: the processing and observation workers
//! - **Handler**: event/response contract and the batch entry points
//!
//! Each invocation snapshots the tables, works out what is missing and handles
//! it sequentially. Anything left unfinished is found again by the next run.
//!
//! # Usage
//!
//! ```no_run
//! use droughtwatch_pipeline::{run_processing, Config, HandlerEvent, PipelineContext, Stores};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let stores = Stores::connect_postgres(&config.database).await?;
//!     let ctx = PipelineContext::new(config, stores)?;
//!
//!     let report = run_processing(&ctx, &HandlerEvent::new("drought-data"), false).await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod handler;
pub mod io;
pub mod observe;
pub mod pipeline;
pub mod transform;

pub use config::Config;
pub use db::{LedgerRow, LedgerStore, MetricsRow, MetricsStore, Stores};
pub use error::{BatchFailure, ErrorKind};
pub use handler::{
    handle_observation, handle_processing, run_observation, run_processing, HandlerEvent,
    HandlerResponse, PipelineContext,
};
pub use pipeline::{ObservationReport, ObservationWorker, ProcessingReport, ProcessingWorker};

use anyhow::Result;

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
