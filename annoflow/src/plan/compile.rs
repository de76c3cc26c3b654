//! Stage plan → ordered step list.

use super::{RunLayout, StagePlan};
use crate::config::PipelineConfig;
use crate::merge::BranchMember;
use crate::step::{BuiltinStep, Step};

/// Name of the corpus preparation step.
pub const PREPARE_CORPUS_STEP: &str = "prepare-corpus";
/// Name of the branch merge step.
pub const BRANCH_MERGE_STEP: &str = "branch.merge";
/// Name of the final merge step.
pub const FINAL_MERGE_STEP: &str = "final.merge";
/// Name of the statistics step.
pub const STATISTICS_STEP: &str = "statistics";

impl StagePlan {
    /// Compiles the plan into the executor's step list.
    ///
    /// Order: corpus preparation, each branch stage (align, load, annotate),
    /// the branch merge, each remainder stage, the final merge (which restores
    /// original identifiers) and statistics. Every step's inputs are produced
    /// by an earlier step or exist before the run starts.
    #[must_use]
    pub fn compile(&self, layout: &RunLayout, config: &PipelineConfig) -> Vec<Step> {
        let mut steps = vec![Step::builtin(
            PREPARE_CORPUS_STEP,
            BuiltinStep::RenameSequences {
                input: config.input_corpus.clone(),
                output: layout.renamed_corpus(),
                id_map: layout.id_map(),
                prefix: config.identifier_prefix.clone(),
            },
        )];

        let branch_len = self.branch_group().len();
        for (stage, handler) in self.stages.iter().zip(&self.handlers).take(branch_len) {
            steps.extend(handler.build_steps(stage, layout, config));
        }

        let mut final_members = Vec::new();
        if !self.branch_group().is_empty() {
            let (alignment, annotation) = layout.branch_outputs();
            let members = self
                .branch_group()
                .iter()
                .map(|stage| BranchMember::from(&stage.outputs))
                .collect();
            steps.push(Step::builtin(
                BRANCH_MERGE_STEP,
                BuiltinStep::MergeBranch {
                    members,
                    alignment_out: alignment.clone(),
                    annotation_out: annotation.clone(),
                    work_dir: layout.branch_dir(),
                    id_map: None,
                },
            ));
            final_members.push(BranchMember::new(alignment, annotation));
        }

        for (stage, handler) in self.stages.iter().zip(&self.handlers).skip(branch_len) {
            steps.extend(handler.build_steps(stage, layout, config));
            final_members.push(BranchMember::from(&stage.outputs));
        }

        let (final_alignment, final_annotation) = layout.final_outputs();
        steps.push(Step::builtin(
            FINAL_MERGE_STEP,
            BuiltinStep::MergeBranch {
                members: final_members,
                alignment_out: final_alignment,
                annotation_out: final_annotation.clone(),
                work_dir: layout.final_dir(),
                id_map: Some(layout.id_map()),
            },
        ));

        steps.push(Step::builtin(
            STATISTICS_STEP,
            BuiltinStep::Statistics {
                corpus: layout.renamed_corpus(),
                stages: self
                    .stages
                    .iter()
                    .map(|s| (s.database_id.clone(), s.outputs.unannotated_output.clone()))
                    .collect(),
                annotation: final_annotation,
                report: layout.statistics_report(),
            },
        ));

        steps
    }
}
