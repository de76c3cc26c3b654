//! Step execution state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution state of a step within one run directory.
///
/// `Pending` and `Done` are read back from markers; `Running` and `Failed`
/// only exist while an executor holds the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// No marker; the step must (re)run.
    Pending,
    /// The step body is executing.
    Running,
    /// The step's marker exists.
    Done,
    /// The step body failed; no marker was written.
    Failed,
}

impl Default for StepState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepState {
    /// Returns true if the state represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the step must not run again.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
