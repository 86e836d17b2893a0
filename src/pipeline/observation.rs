//! Drift and summary metrics for predictions artifacts.

use crate::config::ObservationConfig;
use crate::db::{LedgerStore, MetricsStore};
use crate::diff;
use crate::io::{self, Frame};
use crate::observe::{self, LabelDistribution, Observation};
use crate::pipeline::ObservationReport;
use anyhow::{Context, Result};
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;

/// Appends one metrics row per predictions artifact that lacks one.
pub struct ObservationWorker {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn LedgerStore>,
    metrics: Arc<dyn MetricsStore>,
    config: ObservationConfig,
}

impl ObservationWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn LedgerStore>,
        metrics: Arc<dyn MetricsStore>,
        config: ObservationConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            metrics,
            config,
        }
    }

    /// Run one observation batch. The first failure aborts the run.
    ///
    /// With a `prefix`, only predictions artifacts under it are observed.
    pub async fn run(&self, prefix: Option<&str>) -> Result<ObservationReport> {
        let start = Instant::now();

        io::ensure_bucket(self.store.as_ref()).await?;
        self.metrics
            .ensure_schema()
            .await
            .context("Failed to create metrics table")?;
        self.ledger
            .ensure_schema()
            .await
            .context("Failed to create ledger table")?;

        let ledger = self.ledger.snapshot().await.context("Failed to read ledger")?;
        let metrics = self.metrics.snapshot().await.context("Failed to read metrics")?;
        let mut pending = diff::find_unobserved(&ledger, &metrics);
        if let Some(prefix) = prefix {
            pending.retain(|path| path.starts_with(prefix));
        }

        let mut report = ObservationReport {
            pending: pending.len(),
            ..Default::default()
        };

        tracing::info!("{} predictions artifacts without metrics", pending.len());

        if pending.is_empty() {
            report.elapsed = start.elapsed();
            return Ok(report);
        }

        let (reference, reference_bytes) = self.load_reference().await?;
        report.bytes_read += reference_bytes;

        for predictions_path in &pending {
            let (observation, bytes_read) = self.observe(predictions_path, &reference).await?;
            report.bytes_read += bytes_read;

            self.metrics
                .append(&observation.row)
                .await
                .with_context(|| format!("Failed to append metrics for {}", predictions_path))?;
            report.observed += 1;

            if let Some(drift) = observation.drift {
                if drift.detected {
                    tracing::warn!("{}: {}", predictions_path, drift);
                    report.drift_detected += 1;
                } else {
                    tracing::info!("{}: {}", predictions_path, drift);
                }
                report.drift.insert(predictions_path.clone(), drift);
            } else {
                tracing::info!("{}: no labels to compare, drift not computed", predictions_path);
            }
        }

        report.elapsed = start.elapsed();
        tracing::info!("Observation complete: {}", report);
        Ok(report)
    }

    async fn load_reference(&self) -> Result<(LabelDistribution, u64)> {
        let key = &self.config.reference_path;
        let bytes = io::get_bytes(self.store.as_ref(), key)
            .await
            .with_context(|| format!("Failed to load reference dataset {}", key))?;
        let len = bytes.len() as u64;

        let frame = Frame::from_parquet_bytes(key, bytes)?;
        let dist = observe::reference_distribution(&frame, &self.config)
            .with_context(|| format!("Invalid reference dataset {}", key))?;

        tracing::debug!("Reference {}: {} labelled rows", key, dist.present());
        Ok((dist, len))
    }

    /// Compute metrics for one predictions artifact without recording them.
    pub async fn observe(
        &self,
        predictions_path: &str,
        reference: &LabelDistribution,
    ) -> Result<(Observation, u64)> {
        let bytes = io::get_bytes(self.store.as_ref(), predictions_path).await?;
        let len = bytes.len() as u64;

        let frame = Frame::from_parquet_bytes(predictions_path, bytes)?;
        let observation = observe::observe(predictions_path, &frame, reference, &self.config)
            .with_context(|| format!("Failed to compute metrics for {}", predictions_path))?;

        Ok((observation, len))
    }
}
