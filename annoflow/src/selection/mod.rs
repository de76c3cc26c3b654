//! Database selections and their validation.
//!
//! A selection assigns every known database a rank; rank 0 means "not used".
//! [`DatabaseSelection::validate`] turns a raw selection into a
//! [`ValidatedSelection`], the only input the stage planner accepts.

mod validator;

pub use validator::validate;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{ConfigError, SelectionError};

/// One (database, rank) pair of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntry {
    /// The database code.
    pub database_id: String,
    /// The rank; 0 means unused.
    pub rank: u32,
}

/// A user-supplied rank assignment over database codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSelection {
    entries: Vec<SelectionEntry>,
}

impl DatabaseSelection {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rank of a database, replacing any earlier rank for it.
    #[must_use]
    pub fn with(mut self, database_id: impl Into<String>, rank: u32) -> Self {
        let database_id = database_id.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.database_id == database_id) {
            entry.rank = rank;
        } else {
            self.entries.push(SelectionEntry { database_id, rank });
        }
        self
    }

    /// Builds a selection from a code → rank map.
    #[must_use]
    pub fn from_ranks(ranks: &BTreeMap<String, u32>) -> Self {
        ranks
            .iter()
            .fold(Self::new(), |selection, (id, rank)| selection.with(id.clone(), *rank))
    }

    /// Builds a selection from parallel lists.
    ///
    /// # Errors
    ///
    /// Returns `LengthMismatch` if the lists differ in length.
    pub fn from_parallel(database_ids: &[String], ranks: &[u32]) -> Result<Self, ConfigError> {
        if database_ids.len() != ranks.len() {
            return Err(ConfigError::Selection(vec![SelectionError::LengthMismatch {
                databases: database_ids.len(),
                ranks: ranks.len(),
            }]));
        }
        Ok(database_ids
            .iter()
            .zip(ranks)
            .fold(Self::new(), |selection, (id, rank)| selection.with(id.clone(), *rank)))
    }

    /// Returns every entry, used or not, in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    /// Returns the rank of a database (0 if absent).
    #[must_use]
    pub fn rank_of(&self, database_id: &str) -> u32 {
        self.entries
            .iter()
            .find(|e| e.database_id == database_id)
            .map_or(0, |e| e.rank)
    }

    /// Validates the selection against the rank rules.
    ///
    /// # Errors
    ///
    /// Returns every [`SelectionError`] that applies.
    pub fn validate(&self, terminal_database_id: &str) -> Result<ValidatedSelection, ConfigError> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.database_id.clone()).collect();
        let ranks: Vec<u32> = self.entries.iter().map(|e| e.rank).collect();
        validate(&ids, &ranks, terminal_database_id).map_err(ConfigError::Selection)?;

        let mut used: Vec<&SelectionEntry> = self.entries.iter().filter(|e| e.rank > 0).collect();
        used.sort_by_key(|e| e.rank);

        Ok(ValidatedSelection {
            ordered: used.iter().map(|e| e.database_id.clone()).collect(),
            terminal_database_id: terminal_database_id.to_string(),
        })
    }
}

/// A selection that passed validation, ordered by ascending rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedSelection {
    ordered: Vec<String>,
    terminal_database_id: String,
}

impl ValidatedSelection {
    /// Returns the selected database codes in execution order.
    #[must_use]
    pub fn ordered_database_ids(&self) -> &[String] {
        &self.ordered
    }

    /// Returns the designated terminal database code.
    #[must_use]
    pub fn terminal_database_id(&self) -> &str {
        &self.terminal_database_id
    }

    /// Returns true if the terminal database takes part in this run.
    ///
    /// Validation guarantees it is then the last entry.
    #[must_use]
    pub fn is_terminal_selected(&self) -> bool {
        self.ordered.last().is_some_and(|last| *last == self.terminal_database_id)
    }

    /// Returns the number of selected databases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Always false: validation rejects empty selections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
