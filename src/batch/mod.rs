//! Resumable batch analysis: run state, duplicate prevention, checkpointing
//! and the scheduler that drives elements through the solar models.

pub mod checkpoint;
pub mod clock;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod summary;
pub mod types;

pub use checkpoint::{Acquired, CheckpointManager, RequestOutcome, StaleReason, StatusReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use processor::{ElementComputation, ElementProcessor};
pub use registry::{DuplicateRegistry, ReleaseOutcome};
pub use scheduler::{
    ElementOutcome, InvocationOutcome, InvocationReport, NoopObserver, ProgressEvent, ProgressObserver, RunControl,
    RunInputs, RunScheduler, SkipReason,
};
pub use summary::{ElementNote, RunOutcome, RunSummary};
pub use types::{
    AnalysisRun, ElementCommit, ElementProcessingRecord, ElementStatus, ExecutionLease, LeaseChange,
    RadiationResult, ResultDiagnostics, RunCommand, RunStatus,
};
