//! Raw file → processed artifact, recorded in the ledger.

use crate::config::ProcessingConfig;
use crate::db::{LedgerField, LedgerStore};
use crate::diff;
use crate::error::StoreError;
use crate::io;
use crate::pipeline::ProcessingReport;
use crate::transform::{self, RawTransformer};
use anyhow::{Context, Result};
use bytes::Bytes;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;

/// One raw file that made it through the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedArtifact {
    pub raw_key: String,
    pub processed_key: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Transforms new raw objects in a bucket and records the results.
pub struct ProcessingWorker {
    /// The data bucket
    store: Arc<dyn ObjectStore>,

    ledger: Arc<dyn LedgerStore>,

    transformer: Arc<dyn RawTransformer>,

    config: ProcessingConfig,

    /// Hash object bytes instead of trusting the store's ETag
    digest_contents: bool,
}

impl ProcessingWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn LedgerStore>,
        transformer: Arc<dyn RawTransformer>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            transformer,
            config,
            digest_contents: false,
        }
    }

    /// Register objects by the SHA-256 of their bytes. Needed for stores whose
    /// ETag does not follow content.
    pub fn with_content_digest(mut self, digest_contents: bool) -> Self {
        self.digest_contents = digest_contents;
        self
    }

    /// Run one processing batch over keys under `prefix`.
    ///
    /// Items are handled one at a time. The first failure aborts the run; items
    /// not yet recorded stay pending for the next invocation.
    pub async fn run(&self, prefix: Option<&str>, force: bool) -> Result<ProcessingReport> {
        let start = Instant::now();

        io::ensure_bucket(self.store.as_ref()).await?;
        self.ledger
            .ensure_schema()
            .await
            .context("Failed to create ledger table")?;

        let listing = io::list_keys(self.store.as_ref(), prefix).await?;
        let ledger = self.ledger.snapshot().await.context("Failed to read ledger")?;

        let markers = &self.config.exclude_markers;
        let new_raw = diff::find_new_raw(&listing, &ledger, markers);
        let mut plan = diff::plan_processing(&listing, &ledger, markers, force);

        let mut report = ProcessingReport {
            raw_listed: listing.iter().filter(|k| diff::is_raw_key(k, markers)).count(),
            ..Default::default()
        };

        tracing::info!(
            "Found {} raw objects, {} new, {} to process{}",
            report.raw_listed,
            new_raw.len(),
            plan.len(),
            if force { " (forced)" } else { "" }
        );

        for raw_key in &new_raw {
            if self.register(raw_key).await? {
                report.registered += 1;
            } else {
                report.skipped_duplicates += 1;
                plan.remove(raw_key);
            }
        }

        for raw_key in &plan {
            let artifact = self.process(raw_key).await?;

            let updated = self
                .ledger
                .update_field(raw_key, LedgerField::ProcessedPath, &artifact.processed_key)
                .await
                .with_context(|| format!("Failed to record processed path for {}", raw_key))?;
            if updated == 0 {
                tracing::warn!("No ledger row for {}; processed path not recorded", raw_key);
            }

            tracing::info!("Processed {} -> {}", raw_key, artifact.processed_key);
            report.processed += 1;
            report.bytes_read += artifact.bytes_read;
            report.bytes_written += artifact.bytes_written;
            report.outputs.push(artifact.processed_key);
        }

        report.elapsed = start.elapsed();
        tracing::info!("Processing complete: {}", report);
        Ok(report)
    }

    /// Add a ledger row for `raw_key`. Returns false if another run got there first.
    async fn register(&self, raw_key: &str) -> Result<bool> {
        let hash = if self.digest_contents {
            io::content_digest(self.store.as_ref(), raw_key).await?
        } else {
            io::content_hash(self.store.as_ref(), raw_key).await?
        };

        match self.ledger.insert_new(&hash, raw_key).await {
            Ok(()) => {
                tracing::debug!("Registered {} ({})", raw_key, hash);
                Ok(true)
            }
            Err(err @ StoreError::UniqueViolation { .. }) => {
                tracing::warn!("Skipping {}: {}", raw_key, err);
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("Failed to register {}", raw_key)),
        }
    }

    /// Download, transform and upload one raw file.
    ///
    /// The local copies live in a scratch directory that is removed on return,
    /// whether or not the transformation succeeded.
    pub async fn process(&self, raw_key: &str) -> Result<ProcessedArtifact> {
        let scratch = self.scratch_dir()?;

        let raw = io::get_bytes(self.store.as_ref(), raw_key).await?;
        let bytes_read = raw.len() as u64;

        let (_, raw_name) = transform::split_key(raw_key);
        let local_raw = scratch.path().join(raw_name);
        tokio::fs::write(&local_raw, &raw)
            .await
            .with_context(|| format!("Failed to stage {} locally", raw_key))?;

        let output_name = transform::processed_file_name(raw_name, &self.config);
        let transformer = self.transformer.clone();
        let out_dir = scratch.path().to_path_buf();
        let assign_id = self.config.assign_id;

        let local_out = tokio::task::spawn_blocking(move || {
            transformer.transform(&local_raw, &out_dir, &output_name, assign_id)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Transform task panicked: {}", e))?
        .with_context(|| format!("Failed to transform {}", raw_key))?;

        let processed = tokio::fs::read(&local_out)
            .await
            .with_context(|| format!("Failed to read {}", local_out.display()))?;
        let bytes_written = processed.len() as u64;

        let processed_key = transform::processed_key(raw_key, &self.config);
        io::put_bytes(self.store.as_ref(), &processed_key, Bytes::from(processed)).await?;

        Ok(ProcessedArtifact {
            raw_key: raw_key.to_string(),
            processed_key,
            bytes_read,
            bytes_written,
        })
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("droughtwatch-");
        match &self.config.scratch_dir {
            Some(dir) => builder
                .tempdir_in(dir)
                .with_context(|| format!("Failed to create scratch dir in {}", dir.display())),
            None => builder.tempdir().context("Failed to create scratch dir"),
        }
    }
}
