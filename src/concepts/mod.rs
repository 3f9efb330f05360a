//! Reference concepts: small in-memory stores with their business rules.
//!
//! They exercise the engine end to end and back the CLI. Each keeps its state
//! behind an `RwLock` and reports refusals as `Outcome::Error` values.

mod meal_log;
mod quick_check_ins;
mod sessioning;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::concept::ConceptRegistry;
use crate::error::{SyncError, ValidationError};

pub use meal_log::MealLog;
pub use quick_check_ins::QuickCheckIns;
pub use sessioning::Sessioning;

/// How concepts mint identifiers for the entities they create.
pub enum IdSource {
    /// Random v4 UUIDs.
    Random,
    /// `{prefix}-1`, `{prefix}-2`, ... Deterministic across runs.
    Sequential {
        /// Text before the counter.
        prefix: String,
        /// Next counter value.
        next: AtomicU64,
    },
}

impl IdSource {
    /// Sequential ids starting at `{prefix}-1`.
    #[must_use]
    pub fn sequential(prefix: impl Into<String>) -> Self {
        Self::Sequential {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh identifier.
    pub fn next_id(&self) -> String {
        match self {
            Self::Random => Uuid::new_v4().to_string(),
            Self::Sequential { prefix, next } => {
                let n = next.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{n}")
            }
        }
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::Random
    }
}

impl fmt::Debug for IdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("Random"),
            Self::Sequential { prefix, next } => f
                .debug_struct("Sequential")
                .field("prefix", prefix)
                .field("next", &next.load(Ordering::Relaxed))
                .finish(),
        }
    }
}

/// Registry with all reference concepts using random ids.
pub fn registry() -> Result<ConceptRegistry, ValidationError> {
    ConceptRegistry::new()
        .with(Sessioning::new())?
        .with(MealLog::new())?
        .with(QuickCheckIns::new())
}

/// Registry with all reference concepts using sequential ids.
pub fn deterministic_registry() -> Result<ConceptRegistry, ValidationError> {
    ConceptRegistry::new()
        .with(Sessioning::with_ids(IdSource::sequential("session")))?
        .with(MealLog::with_ids(IdSource::sequential("meal")))?
        .with(QuickCheckIns::with_ids(
            IdSource::sequential("metric"),
            IdSource::sequential("checkin"),
        ))
}

fn poisoned(concept: &str) -> SyncError {
    SyncError::internal(format!("{concept} state lock poisoned"))
}

fn unknown_action(concept: &str, action: &str) -> SyncError {
    crate::error::ExecutionError::UnknownAction {
        concept: concept.to_string(),
        action: action.to_string(),
    }
    .into()
}

fn unknown_query(concept: &str, query: &str) -> SyncError {
    crate::error::ExecutionError::UnknownQuery {
        concept: concept.to_string(),
        query: query.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let ids = IdSource::sequential("meal");
        assert_eq!(ids.next_id(), "meal-1");
        assert_eq!(ids.next_id(), "meal-2");
        assert_eq!(format!("{ids:?}"), "Sequential { prefix: \"meal\", next: 3 }");
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let ids = IdSource::Random;
        assert_ne!(ids.next_id(), ids.next_id());
    }

    #[test]
    fn test_registries_hold_every_concept() {
        for registry in [registry().unwrap(), deterministic_registry().unwrap()] {
            let names: Vec<_> = registry.names().collect();
            assert_eq!(names, vec!["MealLog", "QuickCheckIns", "Sessioning"]);
        }
    }
}
