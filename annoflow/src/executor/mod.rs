//! Checkpointed, resumable step execution.
//!
//! The executor walks a step list strictly in order. A step whose marker
//! already exists is skipped; every other step runs, and only a successful
//! step gets a marker. The first failure writes the run's WRONG marker and
//! stops the run, so re-invoking after the cause is fixed (and WRONG cleared)
//! resumes at exactly the failed step.
//!
//! One executor owns one run directory. Nothing prevents two executors from
//! targeting the same directory; callers must not do that.

mod markers;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use markers::{CompletionRecord, FailureRecord, MarkerStore, RunStatus};
pub use runner::{
    create_output_dirs, run_builtin, ProcessRunner, StepOutcome, StepRunner, COMMAND_NOT_FOUND,
};

use chrono::Utc;
use parking_lot::RwLock;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::errors::{AnnoflowError, StepExecutionError};
use crate::events::{EventSink, NoOpEventSink, RunEvent};
use crate::plan::RunLayout;
use crate::step::{fingerprint, Step, StepState};

/// What one executor invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Identifies the invocation in logs and events.
    pub invocation_id: Uuid,
    /// Run status after the invocation.
    pub status: RunStatus,
    /// Steps executed by this invocation, in order.
    pub executed: Vec<String>,
    /// Steps skipped because their marker already existed.
    pub skipped: Vec<String>,
}

impl RunReport {
    /// Returns true if the run directory already carried a terminal marker
    /// and nothing was done.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty() && self.skipped.is_empty() && self.status.is_terminal()
    }
}

/// Runs a step list against a run directory, resuming from markers.
pub struct CheckpointedExecutor<R: StepRunner> {
    markers: MarkerStore,
    runner: R,
    event_sink: Arc<dyn EventSink>,
    states: RwLock<Vec<(String, StepState)>>,
}

impl<R: StepRunner> CheckpointedExecutor<R> {
    /// Creates an executor over a run layout.
    #[must_use]
    pub fn new(layout: RunLayout, runner: R) -> Self {
        Self {
            markers: MarkerStore::new(layout),
            runner,
            event_sink: Arc::new(NoOpEventSink),
            states: RwLock::new(Vec::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the marker store.
    #[must_use]
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Returns the runner.
    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Returns the state of every step as of the last (or current) run.
    #[must_use]
    pub fn step_states(&self) -> Vec<(String, StepState)> {
        self.states.read().clone()
    }

    /// Removes the WRONG marker so the next run resumes.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the marker cannot be removed.
    pub fn reset_failure(&self) -> Result<bool, AnnoflowError> {
        let cleared = self.markers.clear_wrong()?;
        if cleared {
            info!(run_dir = %self.markers.layout().root().display(), "Cleared WRONG marker");
        }
        Ok(cleared)
    }

    /// Runs (or resumes) the step list.
    ///
    /// A run directory that already carries OK or WRONG is left untouched and
    /// reported as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AnnoflowError::PlanMismatch`] if the directory was started
    /// with a different step list, the failing step's error after writing
    /// WRONG, or an IO error if a marker cannot be written.
    pub async fn run(&self, steps: &[Step]) -> Result<RunReport, AnnoflowError> {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            %invocation_id,
            run_dir = %self.markers.layout().root().display()
        );
        self.run_steps(invocation_id, steps).instrument(span).await
    }

    async fn run_steps(&self, invocation_id: Uuid, steps: &[Step]) -> Result<RunReport, AnnoflowError> {
        let status = self.markers.status();
        if status.is_terminal() {
            warn!(%status, "Run already finished; nothing to do");
            self.event_sink
                .emit(&RunEvent::RunNoop {
                    invocation_id,
                    marker: status.to_string(),
                })
                .await;
            *self.states.write() = self.markers.step_states(steps);
            return Ok(RunReport {
                invocation_id,
                status,
                executed: Vec::new(),
                skipped: Vec::new(),
            });
        }

        self.markers.prepare()?;
        self.check_fingerprint(steps)?;

        let initial = self.markers.step_states(steps);
        let already_done = initial.iter().filter(|(_, s)| s.is_done()).count();
        *self.states.write() = initial;

        info!(steps = steps.len(), already_done, "Starting run");
        self.event_sink
            .emit(&RunEvent::RunStarted {
                invocation_id,
                steps: steps.len(),
                already_done,
            })
            .await;

        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            if self.state_of(index).is_done() {
                skipped.push(step.name.clone());
                self.event_sink
                    .emit(&RunEvent::StepSkipped {
                        invocation_id,
                        step: step.name.clone(),
                    })
                    .await;
                continue;
            }

            self.set_state(index, StepState::Running);
            self.event_sink
                .emit(&RunEvent::StepStarted {
                    invocation_id,
                    step: step.name.clone(),
                    index,
                })
                .await;
            info!(step = %step.name, index, "Running step");

            let start = Instant::now();
            let result = match self.missing_input(step) {
                Some(err) => Err(err),
                None => self.runner.run(step).await,
            };

            let failure = match result {
                Ok(outcome) if outcome.is_success() => None,
                Ok(outcome) => Some(AnnoflowError::from(StepExecutionError::new(
                    &step.name,
                    outcome.exit_code,
                ))),
                Err(err) => Some(err),
            };

            if let Some(err) = failure {
                self.set_state(index, StepState::Failed);
                return Err(self.record_failure(invocation_id, step, err).await);
            }

            if let Err(err) = self.markers.mark_done(step) {
                self.set_state(index, StepState::Failed);
                error!(step = %step.name, error = %err, "Could not write step marker");
                return Err(err);
            }
            self.set_state(index, StepState::Done);
            executed.push(step.name.clone());

            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(step = %step.name, duration_ms, "Step completed");
            self.event_sink
                .emit(&RunEvent::StepCompleted {
                    invocation_id,
                    step: step.name.clone(),
                    duration_ms,
                })
                .await;
        }

        self.markers.mark_ok(steps.len())?;
        info!(executed = executed.len(), skipped = skipped.len(), "Run completed");
        self.event_sink
            .emit(&RunEvent::RunCompleted {
                invocation_id,
                executed: executed.len(),
                skipped: skipped.len(),
            })
            .await;

        Ok(RunReport {
            invocation_id,
            status: RunStatus::Ok,
            executed,
            skipped,
        })
    }

    fn check_fingerprint(&self, steps: &[Step]) -> Result<(), AnnoflowError> {
        let current = fingerprint(steps);
        match self.markers.fingerprint()? {
            Some(recorded) if recorded != current => {
                Err(AnnoflowError::PlanMismatch { recorded, current })
            }
            Some(_) => Ok(()),
            None => self.markers.write_fingerprint(&current),
        }
    }

    /// Inputs under the run directory are produced by earlier steps and
    /// must exist; inputs elsewhere (databases, the corpus) are left to the
    /// step body.
    fn missing_input(&self, step: &Step) -> Option<AnnoflowError> {
        let root = self.markers.layout().root();
        step.inputs
            .iter()
            .find(|input| input.starts_with(root) && !input.exists())
            .map(|input| {
                AnnoflowError::Io(IoError::new(
                    ErrorKind::NotFound,
                    format!("input {} of step '{}' does not exist", input.display(), step.name),
                ))
            })
    }

    async fn record_failure(&self, invocation_id: Uuid, step: &Step, err: AnnoflowError) -> AnnoflowError {
        let exit_code = match &err {
            AnnoflowError::StepExecution(e) => Some(e.exit_code),
            _ => None,
        };
        let record = FailureRecord {
            step: step.name.clone(),
            exit_code,
            message: err.to_string(),
            failed_at: Utc::now(),
        };

        error!(step = %step.name, ?exit_code, error = %err, "Step failed; marking run WRONG");
        self.event_sink
            .emit(&RunEvent::StepFailed {
                invocation_id,
                step: step.name.clone(),
                exit_code,
                message: record.message.clone(),
            })
            .await;

        match self.markers.mark_wrong(&record) {
            Ok(()) => err,
            Err(io) => {
                error!(error = %io, "Could not write WRONG marker");
                io
            }
        }
    }

    fn state_of(&self, index: usize) -> StepState {
        self.states
            .read()
            .get(index)
            .map_or(StepState::Pending, |(_, state)| *state)
    }

    fn set_state(&self, index: usize, state: StepState) {
        if let Some(entry) = self.states.write().get_mut(index) {
            entry.1 = state;
        }
    }
}
