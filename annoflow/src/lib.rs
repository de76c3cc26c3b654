//! # Annoflow
//!
//! Stage planning and resumable execution for sequential sequence-annotation
//! pipelines.
//!
//! A corpus of sequences is searched against several reference databases in
//! turn. Each stage only sees what the previous stage left unannotated, the
//! narrow databases go first, and one broad catch-all database (if selected)
//! absorbs whatever remains. Annoflow provides:
//!
//! - **Selection validation**: ranks must be unique, start at 1, be contiguous,
//!   and place the catch-all database last
//! - **Stage planning**: a deterministic chain of stages with explicit input
//!   wiring, split into a branch group and a remainder chain
//! - **Branch merging**: alignment concatenation and a pairwise sort-merge join
//!   of annotation tables, with identifier restoration
//! - **Checkpointed execution**: per-step markers, terminal OK/WRONG markers,
//!   and exact resumption after a crash or failure
//! - **Coverage statistics**: per-database annotated and remaining counts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use annoflow::prelude::*;
//!
//! let config = PipelineConfig::from_json_file(Path::new("pipeline.json"))?;
//! let pipeline = AnnotationPipeline::from_config(config)?;
//!
//! let report = pipeline
//!     .run(ProcessRunner::new(), Arc::new(LoggingEventSink::default()))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod merge;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod selection;
pub mod stats;
pub mod step;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DatabaseSource, PipelineConfig, ToolConfig};
    pub use crate::errors::{
        AnnoflowError, ConfigError, ErrorInfo, MergeFormatError, SelectionError,
        StepExecutionError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent,
    };
    pub use crate::executor::{
        CheckpointedExecutor, MarkerStore, ProcessRunner, RunReport, RunStatus, StepOutcome,
        StepRunner,
    };
    pub use crate::merge::{BranchMember, BranchMerger, MergeSummary};
    pub use crate::pipeline::{AnnotationPipeline, PipelineStatus};
    pub use crate::plan::{RunLayout, Stage, StageInput, StageOutputs, StagePlan, StagePlanner};
    pub use crate::registry::{DatabaseHandler, DatabaseKind, DatabaseRegistry};
    pub use crate::selection::{DatabaseSelection, ValidatedSelection};
    pub use crate::stats::{aggregate, AnnotationStats, DatabaseStats, StageCount};
    pub use crate::step::{BuiltinStep, Step, StepAction, StepState};
}
