// A run scores every server record twice. Reliability is computed on a
// data-parallel device by the accelerator filter, stability by an external
// worker pool that we only ever talk to through fixed-size binary frames. The
// two passes never coordinate with each other: both write into the same
// record store, and each write only ever raises a pass flag, so the final
// table is the same whichever side finishes first.

// Three workers run for the duration of a run. The accelerator filter lives
// on the blocking pool because it sits on device completion for most of its
// life. The sender and receiver are ordinary tasks; the receiver is the one
// that decides when the pool round trip is over, since it alone sees the
// end-of-stream sentinel. The orchestrator waits for all three, whatever
// their outcome, and only then reads the store.
use std::fmt;

pub mod accel;
pub mod config;
pub mod hex;
pub mod model;
pub mod net;
pub mod orchestrator;
pub mod report;
pub mod store;

pub use config::{ConnectRetry, DevicePreference, KernelConfig, PipelineConfig};
pub use model::{load_records, InputRecord, LoadError, ResultRecord};
pub use orchestrator::{run_pipeline, Orchestrator, Outcomes, Phase, PipelineError};
pub use report::Summary;
pub use store::RecordStore;

/// How a worker finished. Workers never hand errors back to the
/// orchestrator; a failure has already been logged by the time it is
/// reported here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// `processed` is worker specific: records updated for the accelerator
    /// and receiver, frames sent for the sender.
    Completed { processed: usize },
    Failed { reason: String },
}

impl WorkerOutcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { processed } => write!(f, "completed ({processed})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
