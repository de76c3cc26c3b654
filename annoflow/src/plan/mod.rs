//! Stage planning.
//!
//! This module provides:
//! - The stage model (`Stage`, `StageInput`, `StageOutputs`)
//! - The planner turning a validated selection into a `StagePlan`
//! - Compilation of a plan into the executor's ordered step list
//! - The run directory layout

mod compile;
mod layout;
mod planner;

pub use compile::{BRANCH_MERGE_STEP, FINAL_MERGE_STEP, PREPARE_CORPUS_STEP, STATISTICS_STEP};
pub use layout::RunLayout;
pub use planner::StagePlanner;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::registry::{DatabaseHandler, DatabaseKind};

/// Where a stage reads its query sequences from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StageInput {
    /// The (renamed) input corpus; only the first stage reads it.
    OriginalCorpus,
    /// The unannotated output of the preceding stage.
    PreviousStage {
        /// The preceding stage's database code.
        database_id: String,
    },
}

impl StageInput {
    /// Resolves the input to a concrete path.
    #[must_use]
    pub fn resolve(&self, layout: &RunLayout) -> PathBuf {
        match self {
            Self::OriginalCorpus => layout.renamed_corpus(),
            Self::PreviousStage { database_id } => {
                layout.stage_outputs(database_id).unannotated_output
            }
        }
    }
}

/// Files a stage produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageOutputs {
    /// Raw alignment records.
    pub alignment_result: PathBuf,
    /// Annotation table.
    pub annotation_result: PathBuf,
    /// Sequences this stage could not annotate.
    pub unannotated_output: PathBuf,
}

/// One alignment/annotation pass against one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// The database searched.
    pub database_id: String,
    /// Zero-based execution position.
    pub ordinal_position: usize,
    /// Search mode of the database.
    pub kind: DatabaseKind,
    /// Where the query sequences come from.
    pub input_source: StageInput,
    /// Where results go.
    pub outputs: StageOutputs,
}

/// An ordered chain of stages, split into a branch group and a remainder chain.
///
/// The branch group holds every stage except a selected terminal database;
/// the remainder chain holds that terminal database alone (or nothing).
#[derive(Debug, Clone, Serialize)]
pub struct StagePlan {
    stages: Vec<Stage>,
    branch_len: usize,
    #[serde(skip)]
    handlers: Vec<Arc<dyn DatabaseHandler>>,
}

impl PartialEq for StagePlan {
    fn eq(&self, other: &Self) -> bool {
        self.stages == other.stages && self.branch_len == other.branch_len
    }
}

impl Eq for StagePlan {}

impl StagePlan {
    /// Returns every stage in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the stages whose results are merged together.
    #[must_use]
    pub fn branch_group(&self) -> &[Stage] {
        &self.stages[..self.branch_len]
    }

    /// Returns the stages run on the residue after the branch group.
    #[must_use]
    pub fn remainder_chain(&self) -> &[Stage] {
        &self.stages[self.branch_len..]
    }

    /// Returns the database codes in execution order.
    #[must_use]
    pub fn database_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.database_id.as_str()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the plan has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
