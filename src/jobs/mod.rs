//! Batch analysis: pacing, progress, snapshots and the orchestrator.

pub mod orchestrator;
pub mod pacing;
pub mod progress;
pub mod result;
pub mod snapshot;

pub use orchestrator::{DomainOutcome, JobOrchestrator, srv_candidates};
pub use pacing::{FailureWindow, QpsGate};
pub use progress::{JobProgressStats, ProgressTracker};
pub use result::{AnalyzeResult, BatchReport, RiskSummary, SkipReason};
pub use snapshot::{JobSnapshot, SnapshotMeta, SnapshotWriter, input_hash, load_for_resume};
