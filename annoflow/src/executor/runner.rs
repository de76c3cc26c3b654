//! Step bodies.
//!
//! [`StepRunner`] is the seam between the executor and the work a step does.
//! [`ProcessRunner`] spawns external programs and runs builtins in-process;
//! tests substitute runners that record or fail.

use async_trait::async_trait;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::AnnoflowError;
use crate::merge::{rename_sequences, BranchMerger, IdentifierMap};
use crate::stats::compute_report;
use crate::step::{BuiltinStep, Step, StepAction};

/// Exit code reported when a program cannot be found.
pub const COMMAND_NOT_FOUND: i32 = 127;

/// How a step body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Process exit code; 0 means success. Builtins report 0.
    pub exit_code: i32,
}

impl StepOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self { exit_code: 0 }
    }

    /// An outcome with the given exit code.
    #[must_use]
    pub fn exited(exit_code: i32) -> Self {
        Self { exit_code }
    }

    /// Returns true if the step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the body of a step.
///
/// An `Ok` outcome with a non-zero exit code is a step failure; an `Err` is a
/// failure the step body detected itself (malformed input, IO).
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs one step to completion.
    async fn run(&self, step: &Step) -> Result<StepOutcome, AnnoflowError>;
}

/// Spawns commands with `tokio::process` and runs builtins on the blocking
/// thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a process runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run_command(
        &self,
        step: &Step,
        program: &str,
        args: &[String],
    ) -> Result<StepOutcome, AnnoflowError> {
        debug!(step = %step.name, program, ?args, "Spawning step process");
        match Command::new(program).args(args).status().await {
            Ok(status) => Ok(StepOutcome::exited(status.code().unwrap_or(-1))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(step = %step.name, program, "Program not found");
                Ok(StepOutcome::exited(COMMAND_NOT_FOUND))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run(&self, step: &Step) -> Result<StepOutcome, AnnoflowError> {
        create_output_dirs(step)?;
        match &step.action {
            StepAction::Command { program, args } => self.run_command(step, program, args).await,
            StepAction::Builtin(builtin) => {
                let builtin = builtin.clone();
                tokio::task::spawn_blocking(move || run_builtin(&builtin))
                    .await
                    .map_err(|err| AnnoflowError::Io(std::io::Error::other(err)))??;
                Ok(StepOutcome::success())
            }
        }
    }
}

/// Creates the parent directory of every output of a step.
///
/// # Errors
///
/// Returns an IO error if a directory cannot be created.
pub fn create_output_dirs(step: &Step) -> Result<(), AnnoflowError> {
    for parent in step.outputs.iter().filter_map(|p| p.parent()) {
        if parent != Path::new("") {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Runs a builtin step in the current thread.
///
/// # Errors
///
/// Returns whatever the builtin fails with: IO errors for missing files,
/// merge format errors for malformed intermediates, inconsistent counts from
/// statistics.
pub fn run_builtin(builtin: &BuiltinStep) -> Result<(), AnnoflowError> {
    match builtin {
        BuiltinStep::RenameSequences {
            input,
            output,
            id_map,
            prefix,
        } => {
            let count = rename_sequences(input, output, id_map, prefix)?;
            debug!(count, output = %output.display(), "Renamed input sequences");
        }
        BuiltinStep::MergeBranch {
            members,
            alignment_out,
            annotation_out,
            work_dir,
            id_map,
        } => {
            let mut merger = BranchMerger::new(work_dir);
            if let Some(id_map) = id_map {
                merger = merger.with_identifier_map(IdentifierMap::load(id_map)?);
            }
            merger.merge(members, alignment_out, annotation_out)?;
        }
        BuiltinStep::Statistics {
            corpus,
            stages,
            annotation,
            report,
        } => {
            compute_report(corpus, stages, annotation, report)?;
        }
    }
    Ok(())
}
