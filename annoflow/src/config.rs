//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is loaded once (usually from a JSON file) and then
//! passed by reference to the registry, planner and executor. Nothing reads
//! configuration from disk after that point.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::{AnnoflowError, ConfigError};
use crate::registry::DatabaseKind;
use crate::selection::DatabaseSelection;

/// Where a reference database lives and how it is searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSource {
    /// Path to the formatted database.
    pub path: PathBuf,
    /// Search mode.
    pub kind: DatabaseKind,
}

/// External programs invoked by the per-stage steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Aligner used for protein databases (translated search).
    #[serde(default = "default_protein_aligner")]
    pub protein_aligner: String,
    /// Aligner used for nucleotide databases.
    #[serde(default = "default_nucleotide_aligner")]
    pub nucleotide_aligner: String,
    /// Loads raw alignment output into the cross-reference store.
    #[serde(default = "default_result_loader")]
    pub result_loader: String,
    /// Produces annotation tables and the unannotated residue.
    #[serde(default = "default_annotator")]
    pub annotator: String,
}

fn default_protein_aligner() -> String {
    "diamond".to_string()
}

fn default_nucleotide_aligner() -> String {
    "blastn".to_string()
}

fn default_result_loader() -> String {
    "annoflow-load-results".to_string()
}

fn default_annotator() -> String {
    "annoflow-annotate".to_string()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            protein_aligner: default_protein_aligner(),
            nucleotide_aligner: default_nucleotide_aligner(),
            result_loader: default_result_loader(),
            annotator: default_annotator(),
        }
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory owned by the run: markers, intermediates and results.
    pub run_dir: PathBuf,
    /// The FASTA corpus to annotate.
    pub input_corpus: PathBuf,
    /// The broad catch-all database that must run last if selected.
    #[serde(default = "default_terminal_database")]
    pub terminal_database: String,
    /// Database code → rank (0 = unused).
    #[serde(default)]
    pub selection: BTreeMap<String, u32>,
    /// Databases added to, or overriding, the built-in registry.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSource>,
    /// Root directory for built-in database paths.
    #[serde(default = "default_database_root")]
    pub database_root: PathBuf,
    /// External programs.
    #[serde(default)]
    pub tools: ToolConfig,
    /// Threads handed to the aligner.
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// E-value cutoff handed to the aligner.
    #[serde(default = "default_evalue")]
    pub evalue: f64,
    /// Maximum hits kept per query.
    #[serde(default = "default_max_target_seqs")]
    pub max_target_seqs: u32,
    /// Prefix of the run-unique identifiers given to input sequences.
    #[serde(default = "default_identifier_prefix")]
    pub identifier_prefix: String,
}

fn default_terminal_database() -> String {
    "nt_complete".to_string()
}

fn default_database_root() -> PathBuf {
    PathBuf::from("databases")
}

fn default_threads() -> u32 {
    4
}

fn default_evalue() -> f64 {
    1e-5
}

fn default_max_target_seqs() -> u32 {
    5
}

fn default_identifier_prefix() -> String {
    "annoflow_seq_".to_string()
}

impl PipelineConfig {
    /// Creates a configuration with defaults for everything but the paths.
    #[must_use]
    pub fn new(run_dir: impl Into<PathBuf>, input_corpus: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            input_corpus: input_corpus.into(),
            terminal_database: default_terminal_database(),
            selection: BTreeMap::new(),
            databases: BTreeMap::new(),
            database_root: default_database_root(),
            tools: ToolConfig::default(),
            threads: default_threads(),
            evalue: default_evalue(),
            max_target_seqs: default_max_target_seqs(),
            identifier_prefix: default_identifier_prefix(),
        }
    }

    /// Sets the rank of one database.
    #[must_use]
    pub fn with_rank(mut self, database_id: impl Into<String>, rank: u32) -> Self {
        self.selection.insert(database_id.into(), rank);
        self
    }

    /// Sets the terminal database.
    #[must_use]
    pub fn with_terminal_database(mut self, code: impl Into<String>) -> Self {
        self.terminal_database = code.into();
        self
    }

    /// Declares or overrides a database.
    #[must_use]
    pub fn with_database(mut self, code: impl Into<String>, source: DatabaseSource) -> Self {
        self.databases.insert(code.into(), source);
        self
    }

    /// Sets the external tools.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON or a config error for
    /// unusable values.
    pub fn from_json_str(json: &str) -> Result<Self, AnnoflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Relative `run_dir`, `input_corpus` and `database_root` paths are
    /// resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`PipelineConfig::from_json_str`].
    pub fn from_json_file(path: &Path) -> Result<Self, AnnoflowError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            config.run_dir = resolve(base, &config.run_dir);
            config.input_corpus = resolve(base, &config.input_corpus);
            config.database_root = resolve(base, &config.database_root);
        }
        Ok(config)
    }

    /// Checks field values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::invalid_field("threads", "must be at least 1"));
        }
        if !(self.evalue > 0.0) {
            return Err(ConfigError::invalid_field("evalue", "must be a positive number"));
        }
        if self.max_target_seqs == 0 {
            return Err(ConfigError::invalid_field("max_target_seqs", "must be at least 1"));
        }
        if self.identifier_prefix.trim().is_empty()
            || self.identifier_prefix.chars().any(char::is_whitespace)
        {
            return Err(ConfigError::invalid_field(
                "identifier_prefix",
                "must be non-empty and contain no whitespace",
            ));
        }

        let codes = self
            .selection
            .keys()
            .chain(self.databases.keys())
            .chain(std::iter::once(&self.terminal_database));
        for code in codes {
            if !DATABASE_CODE.is_match(code) {
                return Err(ConfigError::invalid_field(
                    "selection",
                    format!("database code '{code}' may only contain letters, digits and '_'"),
                ));
            }
        }
        Ok(())
    }

    /// Returns the rank assignment as a selection.
    #[must_use]
    pub fn database_selection(&self) -> DatabaseSelection {
        DatabaseSelection::from_ranks(&self.selection)
    }
}

#[allow(clippy::expect_used)]
static DATABASE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid database code pattern"));

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"run_dir": "/runs/a", "input_corpus": "/data/in.fasta"}"#,
        )
        .unwrap();

        assert_eq!(config.terminal_database, "nt_complete");
        assert_eq!(config.threads, 4);
        assert_eq!(config.max_target_seqs, 5);
        assert_eq!(config.tools, ToolConfig::default());
        assert!(config.selection.is_empty());
    }

    #[test]
    fn test_selection_and_databases_from_json() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "run_dir": "/runs/a",
                "input_corpus": "/data/in.fasta",
                "selection": {"gymno_01": 1, "nt_complete": 2},
                "databases": {"custom_01": {"path": "/db/custom", "kind": "protein"}},
                "tools": {"protein_aligner": "/opt/bin/diamond"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.database_selection().rank_of("nt_complete"), 2);
        assert_eq!(config.databases["custom_01"].kind, DatabaseKind::Protein);
        assert_eq!(config.tools.protein_aligner, "/opt/bin/diamond");
        assert_eq!(config.tools.nucleotide_aligner, "blastn");
    }

    #[test]
    fn test_rejects_zero_threads() {
        let err = PipelineConfig::new("/runs/a", "/in.fasta");
        let err = PipelineConfig { threads: 0, ..err }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "threads"));
    }

    #[test]
    fn test_rejects_bad_evalue() {
        let config = PipelineConfig {
            evalue: f64::NAN,
            ..PipelineConfig::new("/runs/a", "/in.fasta")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_database_code() {
        let config = PipelineConfig::new("/runs/a", "/in.fasta").with_rank("bad code", 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bad code"));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, AnnoflowError::Serialization(_)));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"run_dir": "run", "input_corpus": "/abs/in.fasta"}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.run_dir, dir.path().join("run"));
        assert_eq!(config.input_corpus, PathBuf::from("/abs/in.fasta"));
        assert_eq!(config.database_root, dir.path().join("databases"));
    }
}
