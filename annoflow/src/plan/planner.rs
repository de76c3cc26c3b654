//! Validated selection → stage plan.

use tracing::debug;

use super::{RunLayout, Stage, StageInput, StagePlan};
use crate::errors::{ConfigError, SelectionError};
use crate::registry::DatabaseRegistry;
use crate::selection::ValidatedSelection;

/// Builds stage plans from validated selections.
#[derive(Debug, Clone, Copy)]
pub struct StagePlanner<'a> {
    registry: &'a DatabaseRegistry,
    layout: &'a RunLayout,
}

impl<'a> StagePlanner<'a> {
    /// Creates a planner resolving codes against `registry`.
    #[must_use]
    pub fn new(registry: &'a DatabaseRegistry, layout: &'a RunLayout) -> Self {
        Self { registry, layout }
    }

    /// Plans the stage chain for a validated selection.
    ///
    /// Stage 0 reads the original corpus; every later stage reads the
    /// unannotated output of the stage before it. The result depends on the
    /// selection alone.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDatabase` for every selected code missing from the registry.
    pub fn plan(&self, selection: &ValidatedSelection) -> Result<StagePlan, ConfigError> {
        let ordered = selection.ordered_database_ids();

        let unknown: Vec<SelectionError> = ordered
            .iter()
            .filter(|code| !self.registry.contains(code))
            .map(|code| SelectionError::UnknownDatabase {
                code: code.clone(),
                known: self.registry.codes(),
            })
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::Selection(unknown));
        }

        let mut stages = Vec::with_capacity(ordered.len());
        let mut handlers = Vec::with_capacity(ordered.len());
        for (position, code) in ordered.iter().enumerate() {
            let Some(handler) = self.registry.get(code) else {
                continue;
            };
            let input_source = match position.checked_sub(1) {
                None => StageInput::OriginalCorpus,
                Some(previous) => StageInput::PreviousStage {
                    database_id: ordered[previous].clone(),
                },
            };
            stages.push(Stage {
                database_id: code.clone(),
                ordinal_position: position,
                kind: handler.kind(),
                input_source,
                outputs: handler.output_paths(self.layout),
            });
            handlers.push(handler);
        }

        let branch_len = if selection.is_terminal_selected() {
            stages.len() - 1
        } else {
            stages.len()
        };

        debug!(
            stages = ?ordered,
            branch_len,
            "Planned annotation stages"
        );

        Ok(StagePlan {
            stages,
            branch_len,
            handlers,
        })
    }
}
