//! Persisted run state.
//!
//! Step markers live in the status directory, one per completed step. The run
//! root carries at most one terminal marker: `OK` after the last step, `WRONG`
//! after a failure. Both terminal markers hold a small JSON record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use crate::errors::AnnoflowError;
use crate::plan::RunLayout;
use crate::step::{Step, StepState};

/// Terminal state of a run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run directory does not exist yet.
    NotStarted,
    /// No terminal marker; the run is in progress or was interrupted.
    Running,
    /// Every step completed.
    Ok,
    /// A step failed.
    Wrong,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "OK"),
            Self::Wrong => write!(f, "WRONG"),
        }
    }
}

impl RunStatus {
    /// Reads the status of a run directory.
    ///
    /// A directory carrying both terminal markers is reported as `Wrong`.
    #[must_use]
    pub fn read(layout: &RunLayout) -> Self {
        let ok = layout.ok_marker().exists();
        let wrong = layout.wrong_marker().exists();
        match (ok, wrong) {
            (true, true) => {
                warn!(run_dir = %layout.root().display(), "Run directory carries both OK and WRONG markers");
                Self::Wrong
            }
            (true, false) => Self::Ok,
            (false, true) => Self::Wrong,
            (false, false) if layout.root().exists() => Self::Running,
            (false, false) => Self::NotStarted,
        }
    }

    /// Returns true if the run carries a terminal marker.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Wrong)
    }
}

/// Contents of the WRONG marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failing step.
    pub step: String,
    /// Exit code of the step's process, if it produced one.
    pub exit_code: Option<i32>,
    /// Error message.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Contents of the OK marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Number of steps in the plan.
    pub steps: usize,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
}

/// Reads and writes the markers of one run directory.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    layout: RunLayout,
}

impl MarkerStore {
    /// Creates a store over a run layout.
    #[must_use]
    pub fn new(layout: RunLayout) -> Self {
        Self { layout }
    }

    /// Returns the layout.
    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        RunStatus::read(&self.layout)
    }

    /// Returns the persisted state of a step: `Done` if its marker exists.
    #[must_use]
    pub fn step_state(&self, step: &Step) -> StepState {
        if self.layout.step_marker(&step.name).exists() {
            StepState::Done
        } else {
            StepState::Pending
        }
    }

    /// Returns the persisted state of every step, in order.
    #[must_use]
    pub fn step_states(&self, steps: &[Step]) -> Vec<(String, StepState)> {
        steps
            .iter()
            .map(|step| (step.name.clone(), self.step_state(step)))
            .collect()
    }

    /// Creates the run and status directories.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directories cannot be created.
    pub fn prepare(&self) -> Result<(), AnnoflowError> {
        fs::create_dir_all(self.layout.status_dir())?;
        Ok(())
    }

    /// Marks a step done.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker cannot be written.
    pub fn mark_done(&self, step: &Step) -> Result<(), AnnoflowError> {
        fs::write(self.layout.step_marker(&step.name), b"")?;
        Ok(())
    }

    /// Writes the OK marker.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker cannot be written.
    pub fn mark_ok(&self, steps: usize) -> Result<(), AnnoflowError> {
        let record = CompletionRecord {
            steps,
            completed_at: Utc::now(),
        };
        write_json(&self.layout.ok_marker(), &record)
    }

    /// Writes the WRONG marker.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker cannot be written.
    pub fn mark_wrong(&self, record: &FailureRecord) -> Result<(), AnnoflowError> {
        write_json(&self.layout.wrong_marker(), record)
    }

    /// Reads the WRONG marker, if present.
    ///
    /// A marker that is not valid JSON (for example, one written by the
    /// rendered shell script) is returned with only its text as message.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker exists but cannot be read.
    pub fn failure(&self) -> Result<Option<FailureRecord>, AnnoflowError> {
        let Some(text) = read_optional(&self.layout.wrong_marker())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&text).unwrap_or_else(|_| FailureRecord {
            step: String::new(),
            exit_code: None,
            message: text.trim().to_string(),
            failed_at: Utc::now(),
        })))
    }

    /// Removes the WRONG marker so the run can be resumed.
    ///
    /// Returns true if a marker was removed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if removal fails.
    pub fn clear_wrong(&self) -> Result<bool, AnnoflowError> {
        match fs::remove_file(self.layout.wrong_marker()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads the stored plan fingerprint, if present.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file exists but cannot be read.
    pub fn fingerprint(&self) -> Result<Option<String>, AnnoflowError> {
        Ok(read_optional(&self.layout.plan_fingerprint())?.map(|s| s.trim().to_string()))
    }

    /// Stores the plan fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn write_fingerprint(&self, fingerprint: &str) -> Result<(), AnnoflowError> {
        fs::write(self.layout.plan_fingerprint(), format!("{fingerprint}\n"))?;
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AnnoflowError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, AnnoflowError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
