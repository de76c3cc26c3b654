//! Steps: the executor's unit of work.
//!
//! A [`Step`] is a plain value: a name, an action, and the files it reads and
//! writes. The executor interprets steps directly; [`render_script`] renders
//! the same values as a shell script for operators who want to see them.

mod render;
mod state;

pub use render::render_script;
pub use state::StepState;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::merge::BranchMember;

/// Work done in-process rather than by an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "builtin", rename_all = "snake_case")]
pub enum BuiltinStep {
    /// Gives every input sequence a run-unique identifier.
    RenameSequences {
        /// Original corpus.
        input: PathBuf,
        /// Renamed corpus.
        output: PathBuf,
        /// Internal → original identifier map.
        id_map: PathBuf,
        /// Identifier prefix.
        prefix: String,
    },
    /// Folds stage results into one alignment set and one annotation table.
    MergeBranch {
        /// Stage results, in plan order.
        members: Vec<BranchMember>,
        /// Merged alignment records.
        alignment_out: PathBuf,
        /// Merged annotation table.
        annotation_out: PathBuf,
        /// Directory for retained intermediate files.
        work_dir: PathBuf,
        /// Identifier map to restore original names with, if any.
        id_map: Option<PathBuf>,
    },
    /// Computes coverage counts and writes the report.
    Statistics {
        /// Renamed corpus (for the corpus size).
        corpus: PathBuf,
        /// (database, unannotated output) per stage in plan order.
        stages: Vec<(String, PathBuf)>,
        /// Final annotation table.
        annotation: PathBuf,
        /// Report destination.
        report: PathBuf,
    },
}

impl BuiltinStep {
    /// Returns the files this builtin reads.
    #[must_use]
    pub fn inputs(&self) -> Vec<PathBuf> {
        match self {
            Self::RenameSequences { input, .. } => vec![input.clone()],
            Self::MergeBranch { members, id_map, .. } => members
                .iter()
                .flat_map(|m| [m.alignment.clone(), m.annotation.clone()])
                .chain(id_map.iter().cloned())
                .collect(),
            Self::Statistics {
                corpus,
                stages,
                annotation,
                ..
            } => std::iter::once(corpus.clone())
                .chain(stages.iter().map(|(_, path)| path.clone()))
                .chain(std::iter::once(annotation.clone()))
                .collect(),
        }
    }

    /// Returns the files this builtin writes.
    #[must_use]
    pub fn outputs(&self) -> Vec<PathBuf> {
        match self {
            Self::RenameSequences { output, id_map, .. } => vec![output.clone(), id_map.clone()],
            Self::MergeBranch {
                alignment_out,
                annotation_out,
                ..
            } => vec![alignment_out.clone(), annotation_out.clone()],
            Self::Statistics { report, .. } => vec![report.clone()],
        }
    }
}

/// What a step does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Spawn an external program; exit code 0 means success.
    Command {
        /// Program name or path.
        program: String,
        /// Arguments.
        args: Vec<String>,
    },
    /// Run in-process.
    Builtin(BuiltinStep),
}

/// One named, idempotent unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique name within a run; also names the step's marker.
    pub name: String,
    /// What the step does.
    pub action: StepAction,
    /// Files that must exist before the step starts.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Files the step produces.
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

impl Step {
    /// Creates an external command step.
    #[must_use]
    pub fn command(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Command {
                program: program.into(),
                args,
            },
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Creates a builtin step; inputs and outputs come from the builtin.
    #[must_use]
    pub fn builtin(name: impl Into<String>, builtin: BuiltinStep) -> Self {
        Self {
            name: name.into(),
            inputs: builtin.inputs(),
            outputs: builtin.outputs(),
            action: StepAction::Builtin(builtin),
        }
    }

    /// Sets the inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    /// Sets the outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    /// Returns the program for command steps.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        match &self.action {
            StepAction::Command { program, .. } => Some(program),
            StepAction::Builtin(_) => None,
        }
    }

    /// Returns the arguments for command steps (empty for builtins).
    #[must_use]
    pub fn args(&self) -> &[String] {
        match &self.action {
            StepAction::Command { args, .. } => args,
            StepAction::Builtin(_) => &[],
        }
    }

    /// Returns true for in-process steps.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        matches!(self.action, StepAction::Builtin(_))
    }
}

/// Hashes a step list so a run directory can tell whether it was started
/// with the same steps.
#[must_use]
pub fn fingerprint(steps: &[Step]) -> String {
    let json = serde_json::to_vec(steps).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    hex::encode(hasher.finalize())
}
