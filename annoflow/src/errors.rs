//! Error types for annoflow.
//!
//! The taxonomy mirrors the lifecycle of a run: configuration problems are
//! detected before anything touches the disk, step and merge failures halt a
//! run and are recorded in its WRONG marker, and IO failures are fatal for the
//! invocation that hit them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for annoflow operations.
#[derive(Debug, Error)]
pub enum AnnoflowError {
    /// The selection or configuration is invalid; nothing was executed.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An external step exited with a non-zero status.
    #[error("{0}")]
    StepExecution(#[from] StepExecutionError),

    /// An intermediate file could not be parsed during branch merging.
    #[error("{0}")]
    MergeFormat(#[from] MergeFormatError),

    /// The run directory was started with a different step list.
    #[error("Run directory belongs to a different plan (recorded fingerprint {recorded}, current {current})")]
    PlanMismatch {
        /// Fingerprint stored in the run directory.
        recorded: String,
        /// Fingerprint of the plan being executed now.
        current: String,
    },

    /// Per-stage counts cannot describe a chain of stages.
    #[error("Inconsistent counts for '{database}': {remaining} unannotated out of {input} input sequences")]
    InconsistentCounts {
        /// The database whose counts are inconsistent.
        database: String,
        /// Sequences handed to the stage.
        input: u64,
        /// Sequences the stage reported as unannotated.
        remaining: u64,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AnnoflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for AnnoflowError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            other => Self::Serialization(format!("{other:?}")),
        }
    }
}

/// Diagnostic metadata attached to configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "SELECTION-001-DUPLICATE_RANK").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// A single reason why a database selection was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionError {
    /// Two or more databases claim the same non-zero rank.
    #[error("Rank {rank} is claimed by more than one database: {}", .databases.join(", "))]
    DuplicateRank {
        /// The contested rank.
        rank: u32,
        /// Every database claiming it, in input order.
        databases: Vec<String>,
    },

    /// No database has a non-zero rank.
    #[error("No database selected (every rank is 0)")]
    EmptySelection,

    /// The lowest used rank is not 1.
    #[error("Ranks must start at 1, lowest used rank is {lowest}")]
    MissingBaseRank {
        /// The lowest non-zero rank found.
        lowest: u32,
    },

    /// There is a gap between used ranks.
    #[error("Ranks are not contiguous: {used} distinct ranks used but highest rank is {highest}")]
    NonContiguousRanks {
        /// Number of distinct non-zero ranks.
        used: usize,
        /// Highest non-zero rank.
        highest: u32,
    },

    /// The terminal database is selected but not in the last position.
    #[error("Terminal database '{terminal}' has rank {rank} but must be ranked last ({last})")]
    TerminalNotLast {
        /// The terminal database code.
        terminal: String,
        /// Its assigned rank.
        rank: u32,
        /// The rank it would need.
        last: u32,
    },

    /// The database and rank lists differ in length.
    #[error("Got {databases} database codes but {ranks} ranks")]
    LengthMismatch {
        /// Number of database codes.
        databases: usize,
        /// Number of ranks.
        ranks: usize,
    },

    /// A selected database code is not registered.
    #[error("Unknown database '{code}'")]
    UnknownDatabase {
        /// The unknown code.
        code: String,
        /// Codes the registry does know, sorted.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        known: Vec<String>,
    },
}

impl SelectionError {
    /// Returns the stable diagnostic code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRank { .. } => "SELECTION-001-DUPLICATE_RANK",
            Self::EmptySelection => "SELECTION-002-EMPTY",
            Self::MissingBaseRank { .. } => "SELECTION-003-MISSING_BASE_RANK",
            Self::NonContiguousRanks { .. } => "SELECTION-004-GAP",
            Self::TerminalNotLast { .. } => "SELECTION-005-TERMINAL_NOT_LAST",
            Self::LengthMismatch { .. } => "SELECTION-006-LENGTH_MISMATCH",
            Self::UnknownDatabase { .. } => "SELECTION-007-UNKNOWN_DATABASE",
        }
    }

    /// Returns a hint for fixing the selection.
    #[must_use]
    pub fn fix_hint(&self) -> &'static str {
        match self {
            Self::DuplicateRank { .. } => "Give every selected database its own rank.",
            Self::EmptySelection => "Assign rank 1 to at least one database.",
            Self::MissingBaseRank { .. } => "Renumber the selected databases so the first one has rank 1.",
            Self::NonContiguousRanks { .. } => "Close the gap so ranks run 1, 2, 3, ... without holes.",
            Self::TerminalNotLast { .. } => {
                "Move the catch-all database to the highest rank or set its rank to 0."
            }
            Self::LengthMismatch { .. } => "Provide exactly one rank per database code.",
            Self::UnknownDatabase { .. } => {
                "Check the code for typos or declare it under `databases` in the configuration."
            }
        }
    }

    /// Builds the full diagnostic record.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.code(), self.to_string()).with_fix_hint(self.fix_hint());
        match self {
            Self::DuplicateRank { rank, databases } => info
                .with_context_entry("rank", rank.to_string())
                .with_context_entry("databases", databases.join(",")),
            Self::EmptySelection => info,
            Self::MissingBaseRank { lowest } => info.with_context_entry("lowest", lowest.to_string()),
            Self::NonContiguousRanks { used, highest } => info
                .with_context_entry("used", used.to_string())
                .with_context_entry("highest", highest.to_string()),
            Self::TerminalNotLast {
                terminal,
                rank,
                last,
            } => info
                .with_context_entry("database", terminal.clone())
                .with_context_entry("rank", rank.to_string())
                .with_context_entry("last", last.to_string()),
            Self::LengthMismatch { databases, ranks } => info
                .with_context_entry("databases", databases.to_string())
                .with_context_entry("ranks", ranks.to_string()),
            Self::UnknownDatabase { code, known } => {
                let info = info.with_context_entry("database", code.clone());
                if known.is_empty() {
                    info
                } else {
                    info.with_context_entry("known", known.join(","))
                }
            }
        }
    }
}

/// Error raised before planning when the configuration is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The database selection failed validation.
    #[error("Invalid database selection: {}", join_selection_errors(.0))]
    Selection(Vec<SelectionError>),

    /// A configuration field has an unusable value.
    #[error("Invalid configuration field '{field}': {reason}")]
    InvalidField {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the selection errors, if any.
    #[must_use]
    pub fn selection_errors(&self) -> &[SelectionError] {
        match self {
            Self::Selection(errors) => errors,
            Self::InvalidField { .. } => &[],
        }
    }
}

impl From<Vec<SelectionError>> for ConfigError {
    fn from(errors: Vec<SelectionError>) -> Self {
        Self::Selection(errors)
    }
}

fn join_selection_errors(errors: &[SelectionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised when an external step exits unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Step '{step}' failed with exit code {exit_code}")]
pub struct StepExecutionError {
    /// The failing step.
    pub step: String,
    /// The exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
}

impl StepExecutionError {
    /// Creates a new step execution error.
    #[must_use]
    pub fn new(step: impl Into<String>, exit_code: i32) -> Self {
        Self {
            step: step.into(),
            exit_code,
        }
    }
}

/// Error raised when an intermediate file is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed record {record} in {}: {reason}", .path.display())]
pub struct MergeFormatError {
    /// The offending file.
    pub path: PathBuf,
    /// 1-based record (line) number.
    pub record: u64,
    /// What was wrong with it.
    pub reason: String,
}

impl MergeFormatError {
    /// Creates a new merge format error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, record: u64, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            record,
            reason: reason.into(),
        }
    }
}
