//! On-disk layout of a run directory.

use std::path::{Path, PathBuf};

use super::StageOutputs;

/// Derives every path a run reads or writes from its root directory.
///
/// A run directory is owned by exactly one executor at a time; nothing here
/// locks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the run directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the corpus with run-unique identifiers.
    #[must_use]
    pub fn renamed_corpus(&self) -> PathBuf {
        self.root.join("corpus").join("renamed.fasta")
    }

    /// Returns the internal → original identifier map.
    #[must_use]
    pub fn id_map(&self) -> PathBuf {
        self.root.join("corpus").join("id_map.tsv")
    }

    /// Returns the working directory of one stage.
    #[must_use]
    pub fn stage_dir(&self, database_id: &str) -> PathBuf {
        self.root.join("stages").join(database_id)
    }

    /// Returns the outputs of one stage.
    #[must_use]
    pub fn stage_outputs(&self, database_id: &str) -> StageOutputs {
        let dir = self.stage_dir(database_id);
        StageOutputs {
            alignment_result: dir.join("alignment.tsv"),
            annotation_result: dir.join("annotation.tsv"),
            unannotated_output: dir.join("unannotated.fasta"),
        }
    }

    /// Returns where the result loader leaves its receipt for one stage.
    #[must_use]
    pub fn stage_loaded_results(&self, database_id: &str) -> PathBuf {
        self.stage_dir(database_id).join("loaded.tsv")
    }

    /// Returns the branch merge working directory.
    #[must_use]
    pub fn branch_dir(&self) -> PathBuf {
        self.root.join("branch")
    }

    /// Returns the merged branch outputs (internal identifiers).
    #[must_use]
    pub fn branch_outputs(&self) -> (PathBuf, PathBuf) {
        let dir = self.branch_dir();
        (dir.join("alignment.tsv"), dir.join("annotation.tsv"))
    }

    /// Returns the final merge working directory.
    #[must_use]
    pub fn final_dir(&self) -> PathBuf {
        self.root.join("final")
    }

    /// Returns the user-facing outputs (original identifiers).
    #[must_use]
    pub fn final_outputs(&self) -> (PathBuf, PathBuf) {
        let dir = self.final_dir();
        (dir.join("alignment.tsv"), dir.join("annotation.tsv"))
    }

    /// Returns the statistics report.
    #[must_use]
    pub fn statistics_report(&self) -> PathBuf {
        self.root.join("report").join("statistics.tsv")
    }

    /// Returns the directory holding per-step markers.
    #[must_use]
    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Returns the marker for one step.
    #[must_use]
    pub fn step_marker(&self, step_name: &str) -> PathBuf {
        let file_name: String = step_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.status_dir().join(format!("{file_name}.done"))
    }

    /// Returns the terminal success marker.
    #[must_use]
    pub fn ok_marker(&self) -> PathBuf {
        self.root.join("OK")
    }

    /// Returns the terminal failure marker.
    #[must_use]
    pub fn wrong_marker(&self) -> PathBuf {
        self.root.join("WRONG")
    }

    /// Returns the file holding the fingerprint of the step list.
    #[must_use]
    pub fn plan_fingerprint(&self) -> PathBuf {
        self.root.join("plan.fingerprint")
    }

    /// Removes the whole run directory, forcing a clean restart.
    ///
    /// # Errors
    ///
    /// Returns an IO error if removal fails. A missing directory is not an error.
    pub fn clean(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_paths() {
        let layout = RunLayout::new("/run");
        let outputs = layout.stage_outputs("gymno_01");

        assert_eq!(outputs.alignment_result, PathBuf::from("/run/stages/gymno_01/alignment.tsv"));
        assert_eq!(
            outputs.unannotated_output,
            PathBuf::from("/run/stages/gymno_01/unannotated.fasta")
        );
        assert_eq!(
            layout.stage_loaded_results("gymno_01"),
            PathBuf::from("/run/stages/gymno_01/loaded.tsv")
        );
    }

    #[test]
    fn test_step_marker_is_sanitized() {
        let layout = RunLayout::new("/run");
        assert_eq!(
            layout.step_marker("gymno_01.align"),
            PathBuf::from("/run/status/gymno_01.align.done")
        );
        assert_eq!(
            layout.step_marker("odd name/x"),
            PathBuf::from("/run/status/odd_name_x.done")
        );
    }

    #[test]
    fn test_clean_removes_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path().join("run"));
        std::fs::create_dir_all(layout.status_dir()).unwrap();
        std::fs::write(layout.ok_marker(), "").unwrap();

        layout.clean().unwrap();
        assert!(!layout.root().exists());

        // Cleaning twice is harmless.
        layout.clean().unwrap();
    }
}
