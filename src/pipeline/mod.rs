//! Batch workers driven by the ledger.

mod observation;
mod processing;
mod stats;


pub use observation::ObservationWorker;
pub use processing::{ProcessedArtifact, ProcessingWorker};
pub use stats::{ObservationReport, ProcessingReport};
