//! Database registry.
//!
//! Maps a database code to the handler that knows how to search it. The
//! planner looks every selected code up exactly once; the resulting handlers
//! travel with the [`StagePlan`](crate::plan::StagePlan) and build the
//! per-stage steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DatabaseSource, PipelineConfig};
use crate::plan::{RunLayout, Stage, StageOutputs};
use crate::step::Step;

/// How a reference database is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    /// Protein database; nucleotide queries are searched translated.
    Protein,
    /// Nucleotide database.
    Nucleotide,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protein => write!(f, "protein"),
            Self::Nucleotide => write!(f, "nucleotide"),
        }
    }
}

/// Builds the work for one stage against one database.
pub trait DatabaseHandler: Send + Sync + Debug {
    /// Returns the database code.
    fn code(&self) -> &str;

    /// Returns the search mode.
    fn kind(&self) -> DatabaseKind;

    /// Returns where the formatted database lives.
    fn database_path(&self) -> &Path;

    /// Returns where a stage against this database writes its results.
    fn output_paths(&self, layout: &RunLayout) -> StageOutputs {
        layout.stage_outputs(self.code())
    }

    /// Builds the align → load-results → annotate steps for a stage.
    fn build_steps(
        &self,
        stage: &Stage,
        layout: &RunLayout,
        config: &PipelineConfig,
    ) -> Vec<Step>;
}

/// A reference database searched by an external aligner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDatabase {
    code: String,
    kind: DatabaseKind,
    path: PathBuf,
}

impl ReferenceDatabase {
    /// Creates a new reference database.
    #[must_use]
    pub fn new(code: impl Into<String>, kind: DatabaseKind, path: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            kind,
            path: path.into(),
        }
    }

    fn align_step(&self, stage: &Stage, input: &Path, config: &PipelineConfig) -> Step {
        let alignment = stage.outputs.alignment_result.clone();
        let (program, args) = match self.kind {
            DatabaseKind::Protein => (
                config.tools.protein_aligner.clone(),
                vec![
                    "blastx".to_string(),
                    "--query".to_string(),
                    path_arg(input),
                    "--db".to_string(),
                    path_arg(&self.path),
                    "--out".to_string(),
                    path_arg(&alignment),
                    "--outfmt".to_string(),
                    "6".to_string(),
                    "--evalue".to_string(),
                    config.evalue.to_string(),
                    "--max-target-seqs".to_string(),
                    config.max_target_seqs.to_string(),
                    "--threads".to_string(),
                    config.threads.to_string(),
                ],
            ),
            DatabaseKind::Nucleotide => (
                config.tools.nucleotide_aligner.clone(),
                vec![
                    "-query".to_string(),
                    path_arg(input),
                    "-db".to_string(),
                    path_arg(&self.path),
                    "-out".to_string(),
                    path_arg(&alignment),
                    "-outfmt".to_string(),
                    "6".to_string(),
                    "-evalue".to_string(),
                    config.evalue.to_string(),
                    "-max_target_seqs".to_string(),
                    config.max_target_seqs.to_string(),
                    "-num_threads".to_string(),
                    config.threads.to_string(),
                ],
            ),
        };

        Step::command(format!("{}.align", self.code), program, args)
            .with_inputs([input.to_path_buf(), self.path.clone()])
            .with_outputs([alignment])
    }
}

impl DatabaseHandler for ReferenceDatabase {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    fn database_path(&self) -> &Path {
        &self.path
    }

    fn build_steps(
        &self,
        stage: &Stage,
        layout: &RunLayout,
        config: &PipelineConfig,
    ) -> Vec<Step> {
        let input = stage.input_source.resolve(layout);
        let outputs = &stage.outputs;
        let loaded = layout.stage_loaded_results(&self.code);

        let load = Step::command(
            format!("{}.load", self.code),
            config.tools.result_loader.clone(),
            vec![
                "--database".to_string(),
                self.code.clone(),
                "--alignment".to_string(),
                path_arg(&outputs.alignment_result),
                "--out".to_string(),
                path_arg(&loaded),
            ],
        )
        .with_inputs([outputs.alignment_result.clone()])
        .with_outputs([loaded.clone()]);

        let annotate = Step::command(
            format!("{}.annotate", self.code),
            config.tools.annotator.clone(),
            vec![
                "--database".to_string(),
                self.code.clone(),
                "--kind".to_string(),
                self.kind.to_string(),
                "--query".to_string(),
                path_arg(&input),
                "--loaded".to_string(),
                path_arg(&loaded),
                "--annotation".to_string(),
                path_arg(&outputs.annotation_result),
                "--unannotated".to_string(),
                path_arg(&outputs.unannotated_output),
            ],
        )
        .with_inputs([input.clone(), loaded])
        .with_outputs([
            outputs.annotation_result.clone(),
            outputs.unannotated_output.clone(),
        ]);

        vec![self.align_step(stage, &input, config), load, annotate]
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Database code → handler lookup table.
#[derive(Debug, Clone, Default)]
pub struct DatabaseRegistry {
    handlers: BTreeMap<String, Arc<dyn DatabaseHandler>>,
}

/// Built-in databases: the narrow plant proteomes first, then the broad
/// nucleotide catch-all.
const BUILTIN_DATABASES: &[(&str, DatabaseKind)] = &[
    ("dicots_04", DatabaseKind::Protein),
    ("monocots_04", DatabaseKind::Protein),
    ("gymno_01", DatabaseKind::Protein),
    ("refseq_plant", DatabaseKind::Protein),
    ("nt_complete", DatabaseKind::Nucleotide),
];

impl DatabaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in databases under `database_root`.
    #[must_use]
    pub fn builtin(database_root: &Path) -> Self {
        let mut registry = Self::new();
        for (code, kind) in BUILTIN_DATABASES {
            registry.register(Arc::new(ReferenceDatabase::new(
                *code,
                *kind,
                database_root.join(code),
            )));
        }
        registry
    }

    /// Creates the built-in registry extended by the configured databases.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut registry = Self::builtin(&config.database_root);
        for (code, DatabaseSource { path, kind }) in &config.databases {
            registry.register(Arc::new(ReferenceDatabase::new(code.clone(), *kind, path.clone())));
        }
        registry
    }

    /// Registers a handler, replacing any handler with the same code.
    pub fn register(&mut self, handler: Arc<dyn DatabaseHandler>) {
        self.handlers.insert(handler.code().to_string(), handler);
    }

    /// Looks a handler up by code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<Arc<dyn DatabaseHandler>> {
        self.handlers.get(code).cloned()
    }

    /// Returns true if the code is registered.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.handlers.contains_key(code)
    }

    /// Lists registered codes in sorted order.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
