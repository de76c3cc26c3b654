//! Rank-order validation for database selections.

use std::collections::BTreeMap;

use crate::errors::SelectionError;

/// Validates a rank assignment over parallel lists of database codes and ranks.
///
/// Rank 0 means "not used". Non-zero ranks must be unique, start at 1 and be
/// contiguous. If `terminal_database_id` is used at all it must hold the last
/// rank. Every applicable problem is reported, except that an empty selection
/// short-circuits the rank checks.
///
/// This function is pure: same input, same output, no side effects.
pub fn validate(
    database_ids: &[String],
    ranks: &[u32],
    terminal_database_id: &str,
) -> Result<(), Vec<SelectionError>> {
    if database_ids.len() != ranks.len() {
        return Err(vec![SelectionError::LengthMismatch {
            databases: database_ids.len(),
            ranks: ranks.len(),
        }]);
    }

    let mut by_rank: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for (id, &rank) in database_ids.iter().zip(ranks) {
        if rank > 0 {
            by_rank.entry(rank).or_default().push(id.as_str());
        }
    }

    let mut errors: Vec<SelectionError> = by_rank
        .iter()
        .filter(|(_, claimants)| claimants.len() > 1)
        .map(|(&rank, claimants)| SelectionError::DuplicateRank {
            rank,
            databases: claimants.iter().map(|c| (*c).to_string()).collect(),
        })
        .collect();

    let (Some((&lowest, _)), Some((&highest, _))) =
        (by_rank.first_key_value(), by_rank.last_key_value())
    else {
        return Err(vec![SelectionError::EmptySelection]);
    };

    let used = by_rank.len();
    if lowest != 1 {
        errors.push(SelectionError::MissingBaseRank { lowest });
    }
    if usize::try_from(highest).map_or(true, |highest| highest != used) {
        errors.push(SelectionError::NonContiguousRanks { used, highest });
    }

    let terminal_rank = database_ids
        .iter()
        .zip(ranks)
        .filter(|(id, _)| id.as_str() == terminal_database_id)
        .map(|(_, &rank)| rank)
        .max()
        .unwrap_or(0);
    let last = u32::try_from(used).unwrap_or(u32::MAX);
    if terminal_rank > 0 && terminal_rank != last {
        errors.push(SelectionError::TerminalNotLast {
            terminal: terminal_database_id.to_string(),
            rank: terminal_rank,
            last,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
