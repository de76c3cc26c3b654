//! Branch merging.
//!
//! A merge folds the results of several stages into one alignment set and one
//! annotation table. Alignment records are concatenated in member order;
//! annotation tables are joined pairwise, left to right, with a full outer
//! sort-merge on `(sequence_id, hit_rank)`. Each fold writes a headerless
//! intermediate under the work directory so a failed merge can be inspected.
//!
//! When an identifier map is attached, internal identifiers are restored to
//! the original sequence names in both outputs.

mod alignment;
mod annotation;
mod identifiers;

pub use alignment::{concatenate, count_records};
pub use annotation::{
    join_sorted, AnnotationRecord, AnnotationTable, JoinOutcome, HIT_RANK_COLUMN,
    SEQUENCE_ID_COLUMN,
};
pub use identifiers::{count_fasta_records, rename_sequences, IdentifierMap};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{AnnoflowError, MergeFormatError};
use crate::plan::StageOutputs;

/// The two results of one stage taking part in a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMember {
    /// Alignment records.
    pub alignment: PathBuf,
    /// Annotation table.
    pub annotation: PathBuf,
}

impl BranchMember {
    /// Creates a member.
    #[must_use]
    pub fn new(alignment: impl Into<PathBuf>, annotation: impl Into<PathBuf>) -> Self {
        Self {
            alignment: alignment.into(),
            annotation: annotation.into(),
        }
    }
}

impl From<&StageOutputs> for BranchMember {
    fn from(outputs: &StageOutputs) -> Self {
        Self::new(
            outputs.alignment_result.clone(),
            outputs.annotation_result.clone(),
        )
    }
}

/// Counts reported by a completed merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Number of members merged.
    pub members: usize,
    /// Alignment records written.
    pub alignment_records: u64,
    /// Annotation records written.
    pub annotation_records: u64,
    /// Keys found in more than one member (earliest member kept).
    pub collisions: u64,
}

/// Merges branch members into a single result.
#[derive(Debug, Clone)]
pub struct BranchMerger {
    work_dir: PathBuf,
    identifiers: Option<IdentifierMap>,
}

impl BranchMerger {
    /// Creates a merger that keeps its intermediates in `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            identifiers: None,
        }
    }

    /// Restores original identifiers in the merged output.
    #[must_use]
    pub fn with_identifier_map(mut self, identifiers: IdentifierMap) -> Self {
        self.identifiers = Some(identifiers);
        self
    }

    /// Merges `members` into `alignment_out` and `annotation_out`.
    ///
    /// With no members both outputs are created empty. A single member's
    /// files are checked and copied unchanged unless identifiers are restored.
    ///
    /// # Errors
    ///
    /// Returns a merge format error if any member is malformed or the members
    /// disagree on the annotation header, and an IO error for missing files.
    pub fn merge(
        &self,
        members: &[BranchMember],
        alignment_out: &Path,
        annotation_out: &Path,
    ) -> Result<MergeSummary, AnnoflowError> {
        fs::create_dir_all(&self.work_dir)?;
        for path in [alignment_out, annotation_out] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let alignment_records = self.merge_alignments(members, alignment_out)?;
        let (annotation_records, collisions) = self.merge_annotations(members, annotation_out)?;

        let summary = MergeSummary {
            members: members.len(),
            alignment_records,
            annotation_records,
            collisions,
        };
        info!(
            members = summary.members,
            alignment_records,
            annotation_records,
            collisions,
            output = %annotation_out.display(),
            "Merged branch"
        );
        Ok(summary)
    }

    fn merge_alignments(&self, members: &[BranchMember], output: &Path) -> Result<u64, AnnoflowError> {
        let sources: Vec<&Path> = members.iter().map(|m| m.alignment.as_path()).collect();
        match &self.identifiers {
            None if sources.len() == 1 => {
                let written = count_records(sources[0])?;
                fs::copy(sources[0], output)?;
                Ok(written)
            }
            None => concatenate(&sources, output),
            Some(identifiers) => {
                let internal = self.work_dir.join("alignment.internal.tsv");
                concatenate(&sources, &internal)?;
                identifiers.restore_file(&internal, output)
            }
        }
    }

    fn merge_annotations(
        &self,
        members: &[BranchMember],
        output: &Path,
    ) -> Result<(u64, u64), AnnoflowError> {
        let Some((first, rest)) = members.split_first() else {
            fs::write(output, "")?;
            return Ok((0, 0));
        };

        if rest.is_empty() && self.identifiers.is_none() {
            fs::copy(&first.annotation, output)?;
            let table = AnnotationTable::read(output)?;
            return Ok((count(table.len()), 0));
        }

        let mut merged = AnnotationTable::read(&first.annotation)?;
        let header = merged.header().to_vec();
        let mut collisions = merged.duplicates();

        for (index, member) in rest.iter().enumerate() {
            let table = AnnotationTable::read(&member.annotation)?;
            if table.header() != header.as_slice() {
                return Err(MergeFormatError::new(
                    &member.annotation,
                    1,
                    format!(
                        "header differs from {}",
                        first.annotation.display()
                    ),
                )
                .into());
            }
            collisions += table.duplicates();

            let outcome = join_sorted(merged.into_records(), table.into_records());
            if outcome.collisions > 0 {
                warn!(
                    member = %member.annotation.display(),
                    collisions = outcome.collisions,
                    "Annotation keys already present; keeping earlier records"
                );
            }
            collisions += outcome.collisions;
            merged = AnnotationTable::new(header.clone(), outcome.records);

            let intermediate = self.work_dir.join(format!("annotation.merge.{}.tsv", index + 1));
            merged.write(&intermediate, false)?;
            debug!(intermediate = %intermediate.display(), records = merged.len(), "Wrote merge intermediate");
        }

        if let Some(identifiers) = &self.identifiers {
            let internal = self.work_dir.join("annotation.internal.tsv");
            merged.write(&internal, true)?;
            for (index, record) in merged.records_mut().iter_mut().enumerate() {
                let original = identifiers
                    .original(record.sequence_id())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        MergeFormatError::new(
                            &internal,
                            count(index) + 2,
                            format!(
                                "identifier '{}' is not in the identifier map",
                                record.sequence_id()
                            ),
                        )
                    })?;
                record.set_sequence_id(&original);
            }
        }

        merged.write(output, true)?;
        Ok((count(merged.len()), collisions))
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}
