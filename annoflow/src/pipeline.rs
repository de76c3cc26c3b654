//! The assembled pipeline: configuration in, step list out.
//!
//! Everything up to [`AnnotationPipeline::from_config`] returning is pure; a
//! configuration or selection error never creates the run directory.

use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::errors::AnnoflowError;
use crate::events::EventSink;
use crate::executor::{
    CheckpointedExecutor, FailureRecord, MarkerStore, RunReport, RunStatus, StepRunner,
};
use crate::plan::{RunLayout, StagePlan, StagePlanner};
use crate::registry::DatabaseRegistry;
use crate::step::{render_script, Step, StepState};

/// Run status plus per-step states, read without executing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    /// Terminal state of the run directory.
    pub run: RunStatus,
    /// Every step with its persisted state, in plan order.
    pub steps: Vec<(String, StepState)>,
    /// The recorded failure, if the run is WRONG.
    pub failure: Option<FailureRecord>,
}

impl PipelineStatus {
    /// Returns the first step that is not done.
    #[must_use]
    pub fn next_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|(_, state)| !state.is_done())
            .map(|(name, _)| name.as_str())
    }
}

/// A validated, planned and compiled pipeline.
#[derive(Debug, Clone)]
pub struct AnnotationPipeline {
    config: PipelineConfig,
    layout: RunLayout,
    plan: StagePlan,
    steps: Vec<Step>,
}

impl AnnotationPipeline {
    /// Builds the pipeline with the registry derived from the configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error if the configuration or the selection is invalid.
    pub fn from_config(config: PipelineConfig) -> Result<Self, AnnoflowError> {
        let registry = DatabaseRegistry::from_config(&config);
        Self::with_registry(config, &registry)
    }

    /// Builds the pipeline against an explicit registry.
    ///
    /// # Errors
    ///
    /// Returns a config error if the configuration or the selection is invalid,
    /// or a selected database is not registered.
    pub fn with_registry(
        config: PipelineConfig,
        registry: &DatabaseRegistry,
    ) -> Result<Self, AnnoflowError> {
        config.validate()?;
        let selection = config
            .database_selection()
            .validate(&config.terminal_database)?;
        let layout = RunLayout::new(&config.run_dir);
        let plan = StagePlanner::new(registry, &layout).plan(&selection)?;
        let steps = plan.compile(&layout, &config);

        info!(
            stages = plan.len(),
            steps = steps.len(),
            databases = ?plan.database_ids(),
            "Planned pipeline"
        );
        Ok(Self {
            config,
            layout,
            plan,
            steps,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the run layout.
    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Returns the stage plan.
    #[must_use]
    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Returns the compiled steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Looks a step up by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Renders the steps as a bash script.
    #[must_use]
    pub fn render_script(&self, builtin_invoker: &str) -> String {
        render_script(&self.steps, &self.layout, builtin_invoker)
    }

    /// Reads the run directory's state without executing anything.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the WRONG marker cannot be read.
    pub fn status(&self) -> Result<PipelineStatus, AnnoflowError> {
        let markers = MarkerStore::new(self.layout.clone());
        Ok(PipelineStatus {
            run: markers.status(),
            steps: markers.step_states(&self.steps),
            failure: markers.failure()?,
        })
    }

    /// Creates an executor over this pipeline's run directory.
    #[must_use]
    pub fn executor<R: StepRunner>(&self, runner: R) -> CheckpointedExecutor<R> {
        CheckpointedExecutor::new(self.layout.clone(), runner)
    }

    /// Runs (or resumes) the pipeline.
    ///
    /// # Errors
    ///
    /// As [`CheckpointedExecutor::run`].
    pub async fn run<R: StepRunner>(
        &self,
        runner: R,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<RunReport, AnnoflowError> {
        self.executor(runner)
            .with_event_sink(event_sink)
            .run(&self.steps)
            .await
    }

    /// Removes the run directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if removal fails.
    pub fn clean(&self) -> Result<(), AnnoflowError> {
        self.layout.clean()?;
        info!(run_dir = %self.layout.root().display(), "Removed run directory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigError, SelectionError};

    fn config(run_dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig::new(run_dir, "/data/in.fasta")
            .with_rank("dicots_04", 1)
            .with_rank("gymno_01", 2)
            .with_rank("refseq_plant", 0)
            .with_rank("nt_complete", 3)
    }

    #[test]
    fn test_from_config_plans_and_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = AnnotationPipeline::from_config(config(&dir.path().join("run"))).unwrap();

        assert_eq!(pipeline.plan().database_ids(), ["dicots_04", "gymno_01", "nt_complete"]);
        assert_eq!(pipeline.plan().branch_group().len(), 2);
        assert_eq!(pipeline.steps().first().unwrap().name, "prepare-corpus");
        assert_eq!(pipeline.steps().last().unwrap().name, "statistics");
        assert!(pipeline.step("gymno_01.annotate").is_some());
    }

    #[test]
    fn test_invalid_selection_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let config = PipelineConfig::new(&run_dir, "/data/in.fasta")
            .with_rank("dicots_04", 1)
            .with_rank("gymno_01", 1);

        let err = AnnotationPipeline::from_config(config).unwrap_err();
        match err {
            AnnoflowError::Config(ConfigError::Selection(errors)) => {
                assert!(matches!(errors[0], SelectionError::DuplicateRank { rank: 1, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!run_dir.exists());
    }

    #[test]
    fn test_unknown_database_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path().join("run"), "/data/in.fasta")
            .with_rank("not_a_db", 1);

        let err = AnnotationPipeline::from_config(config).unwrap_err();
        assert!(matches!(
            err,
            AnnoflowError::Config(ConfigError::Selection(ref e))
                if matches!(e[0], SelectionError::UnknownDatabase { .. })
        ));
    }

    #[test]
    fn test_status_of_fresh_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = AnnotationPipeline::from_config(config(&dir.path().join("run"))).unwrap();

        let status = pipeline.status().unwrap();
        assert_eq!(status.run, RunStatus::NotStarted);
        assert_eq!(status.next_step(), Some("prepare-corpus"));
        assert!(status.failure.is_none());
        assert!(status.steps.iter().all(|(_, s)| *s == StepState::Pending));
    }

    #[test]
    fn test_render_script_mentions_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = AnnotationPipeline::from_config(config(&dir.path().join("run"))).unwrap();
        let script = pipeline.render_script("annoflow step --config cfg.json");

        for step in pipeline.steps() {
            assert!(script.contains(&format!("# {}", step.name)), "missing {}", step.name);
        }
    }
}
