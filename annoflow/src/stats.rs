//! Coverage statistics.
//!
//! Every stage hands its unannotated residue to the next, so the number of
//! sequences a stage annotated is the difference between what it received and
//! what it left over. Summed over the chain, the annotated counts plus the last
//! residue give back the corpus size.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::AnnoflowError;
use crate::merge::{count_fasta_records, AnnotationTable};

/// Label of the grand total row in the report.
pub const TOTAL_ROW: &str = "TOTAL";

/// Unannotated count reported by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    /// Database the stage searched.
    pub database_id: String,
    /// Sequences left unannotated after the stage.
    pub unannotated: u64,
}

impl StageCount {
    /// Creates a stage count.
    #[must_use]
    pub fn new(database_id: impl Into<String>, unannotated: u64) -> Self {
        Self {
            database_id: database_id.into(),
            unannotated,
        }
    }
}

/// Per-database breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Database code.
    pub database_id: String,
    /// Sequences handed to the stage.
    pub input_count: u64,
    /// Sequences the stage annotated.
    pub annotated_count: u64,
    /// Sequences still unannotated after the stage.
    pub remaining_count: u64,
}

/// What the final annotation table contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSummary {
    /// Annotation records.
    pub records: u64,
    /// Distinct sequence identifiers.
    pub distinct_sequences: u64,
}

impl AnnotationSummary {
    /// Summarizes a parsed table.
    #[must_use]
    pub fn from_table(table: &AnnotationTable) -> Self {
        Self {
            records: u64::try_from(table.len()).unwrap_or(u64::MAX),
            distinct_sequences: table.distinct_sequences(),
        }
    }

    /// Reads and summarizes a table; an empty file has no records.
    ///
    /// # Errors
    ///
    /// Returns an IO or merge format error if the table cannot be read.
    pub fn read(path: &Path) -> Result<Self, AnnoflowError> {
        if std::fs::metadata(path)?.len() == 0 {
            return Ok(Self::default());
        }
        Ok(Self::from_table(&AnnotationTable::read(path)?))
    }
}

/// Coverage counts for a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationStats {
    /// Size of the input corpus.
    pub original_corpus_size: u64,
    /// One entry per stage, in plan order.
    pub per_database: Vec<DatabaseStats>,
    /// Sum of the per-database annotated counts.
    pub total_annotated: u64,
    /// Sequences no stage could annotate.
    pub final_unannotated_count: u64,
    /// Distinct sequences in the final annotation table.
    pub annotated_in_table: u64,
}

#[derive(Serialize)]
struct ReportRow<'a> {
    database_id: &'a str,
    annotated_count: u64,
    remaining_count: u64,
}

impl AnnotationStats {
    /// Writes the tab-separated report: one row per database, then the total.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the report cannot be written.
    pub fn write_report(&self, path: &Path) -> Result<(), AnnoflowError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        for db in &self.per_database {
            writer.serialize(ReportRow {
                database_id: &db.database_id,
                annotated_count: db.annotated_count,
                remaining_count: db.remaining_count,
            })?;
        }
        writer.serialize(ReportRow {
            database_id: TOTAL_ROW,
            annotated_count: self.total_annotated,
            remaining_count: self.final_unannotated_count,
        })?;
        writer.flush()?;
        Ok(())
    }
}

/// Derives per-database coverage from the chain of unannotated counts.
///
/// # Errors
///
/// Returns [`AnnoflowError::InconsistentCounts`] if a stage reports more
/// unannotated sequences than it was given.
pub fn aggregate(
    original_corpus_size: u64,
    stages: &[StageCount],
    annotation: &AnnotationSummary,
) -> Result<AnnotationStats, AnnoflowError> {
    let mut per_database = Vec::with_capacity(stages.len());
    let mut input = original_corpus_size;

    for stage in stages {
        let annotated_count = input.checked_sub(stage.unannotated).ok_or_else(|| {
            AnnoflowError::InconsistentCounts {
                database: stage.database_id.clone(),
                input,
                remaining: stage.unannotated,
            }
        })?;
        per_database.push(DatabaseStats {
            database_id: stage.database_id.clone(),
            input_count: input,
            annotated_count,
            remaining_count: stage.unannotated,
        });
        input = stage.unannotated;
    }

    Ok(AnnotationStats {
        original_corpus_size,
        total_annotated: per_database.iter().map(|db| db.annotated_count).sum(),
        per_database,
        final_unannotated_count: input,
        annotated_in_table: annotation.distinct_sequences,
    })
}

/// Counts the run's files, aggregates them and writes the report.
///
/// # Errors
///
/// Returns an IO error for a missing file, otherwise as [`aggregate`].
pub fn compute_report(
    corpus: &Path,
    stages: &[(String, PathBuf)],
    annotation: &Path,
    report: &Path,
) -> Result<AnnotationStats, AnnoflowError> {
    let corpus_size = count_fasta_records(corpus)?;
    let counts = stages
        .iter()
        .map(|(database_id, unannotated)| {
            count_fasta_records(unannotated).map(|n| StageCount::new(database_id.clone(), n))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let stats = aggregate(corpus_size, &counts, &AnnotationSummary::read(annotation)?)?;
    stats.write_report(report)?;
    info!(
        corpus_size,
        annotated = stats.total_annotated,
        unannotated = stats.final_unannotated_count,
        report = %report.display(),
        "Wrote statistics report"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_two_stage_chain() {
        let stats = aggregate(
            5000,
            &[StageCount::new("gymno_01", 2000), StageCount::new("nt_complete", 500)],
            &AnnotationSummary::default(),
        )
        .unwrap();

        assert_eq!(stats.final_unannotated_count, 500);
        assert_eq!(stats.total_annotated, 4500);
        assert_eq!(stats.per_database[0].annotated_count, 3000);
        assert_eq!(stats.per_database[1].annotated_count, 1500);
        assert_eq!(stats.per_database[1].input_count, 2000);
        assert_eq!(
            stats.total_annotated + stats.final_unannotated_count,
            stats.original_corpus_size
        );
    }

    #[test]
    fn test_counts_always_sum_to_corpus() {
        let chains: [&[u64]; 4] = [&[], &[10], &[100, 100, 0], &[90, 40, 40, 1]];
        for chain in chains {
            let stages: Vec<StageCount> = chain
                .iter()
                .enumerate()
                .map(|(i, n)| StageCount::new(format!("db_{i}"), *n))
                .collect();
            let stats = aggregate(100, &stages, &AnnotationSummary::default()).unwrap();
            let annotated: u64 = stats.per_database.iter().map(|d| d.annotated_count).sum();
            assert_eq!(annotated + stats.final_unannotated_count, 100);
        }
    }

    #[test]
    fn test_no_stages_leaves_everything_unannotated() {
        let stats = aggregate(42, &[], &AnnotationSummary::default()).unwrap();
        assert_eq!(stats.final_unannotated_count, 42);
        assert_eq!(stats.total_annotated, 0);
    }

    #[test]
    fn test_growing_residue_is_inconsistent() {
        let err = aggregate(
            100,
            &[StageCount::new("a", 50), StageCount::new("b", 60)],
            &AnnotationSummary::default(),
        )
        .unwrap_err();

        match err {
            AnnoflowError::InconsistentCounts {
                database,
                input,
                remaining,
            } => {
                assert_eq!(database, "b");
                assert_eq!(input, 50);
                assert_eq!(remaining, 60);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report/statistics.tsv");
        let stats = aggregate(
            10,
            &[StageCount::new("dicots_04", 6), StageCount::new("nt_complete", 1)],
            &AnnotationSummary::default(),
        )
        .unwrap();

        stats.write_report(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "database_id\tannotated_count\tremaining_count\n\
             dicots_04\t4\t6\n\
             nt_complete\t5\t1\n\
             TOTAL\t9\t1\n"
        );
    }

    #[test]
    fn test_compute_report_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.fasta");
        let residue = dir.path().join("unannotated.fasta");
        let annotation = dir.path().join("annotation.tsv");
        std::fs::write(&corpus, ">s1\nA\n>s2\nC\n>s3\nG\n").unwrap();
        std::fs::write(&residue, ">s3\nG\n").unwrap();
        std::fs::write(
            &annotation,
            "sequence_id\thit_rank\nc1\t1\nc1\t2\nc2\t1\n",
        )
        .unwrap();

        let stats = compute_report(
            &corpus,
            &[("gymno_01".to_string(), residue)],
            &annotation,
            &dir.path().join("statistics.tsv"),
        )
        .unwrap();

        assert_eq!(stats.total_annotated, 2);
        assert_eq!(stats.annotated_in_table, 2);
        assert!(dir.path().join("statistics.tsv").exists());
    }
}
