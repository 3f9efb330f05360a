//! Abstract action log trait.
//!
//! The read surface is deliberately small: the matcher only needs "records of
//! action X since sequence N", the flow-scoped variant of it, and "most
//! recent record satisfying a template".

use std::sync::Arc;

use crate::action::{ActionRecord, ActionRef, Completion, FlowId, Sequence};
use crate::error::LogError;

/// Storage contract for action log backends.
///
/// # Invariants
/// - `append` assigns strictly increasing sequences and makes the whole
///   record visible at once.
/// - Every listing is returned in ascending sequence order.
pub trait ActionLog: Send + Sync {
    /// Append a completion, assigning the next sequence.
    fn append(&self, completion: Completion) -> Result<Arc<ActionRecord>, LogError>;

    /// Get a record by sequence.
    fn get(&self, sequence: Sequence) -> Result<Option<Arc<ActionRecord>>, LogError>;

    /// All records of `action` with a sequence strictly greater than `after`.
    fn since(&self, action: &ActionRef, after: Sequence) -> Result<Vec<Arc<ActionRecord>>, LogError>;

    /// Records of `action` in `flow` with a sequence strictly below `before`.
    fn in_flow(
        &self,
        flow: FlowId,
        action: &ActionRef,
        before: Sequence,
    ) -> Result<Vec<Arc<ActionRecord>>, LogError>;

    /// Every record of a flow.
    fn flow(&self, flow: FlowId) -> Result<Vec<Arc<ActionRecord>>, LogError>;

    /// The most recent record of `action` (below `before`) accepted by `matches`.
    fn latest_matching(
        &self,
        action: &ActionRef,
        before: Sequence,
        matches: &dyn Fn(&ActionRecord) -> bool,
    ) -> Result<Option<Arc<ActionRecord>>, LogError>;

    /// Sequence of the last appended record (`Sequence::ZERO` when empty).
    fn last_sequence(&self) -> Result<Sequence, LogError>;

    /// Number of retained records.
    fn len(&self) -> Result<usize, LogError>;

    /// Returns true if no records are retained.
    fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }

    /// Archive policy hook: drop every record below `sequence`. Sequences of
    /// the remaining records are unchanged. Returns the number removed.
    fn truncate_before(&self, sequence: Sequence) -> Result<usize, LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: the trait must stay object-safe.
    fn _assert_action_log_object_safe(_: &dyn ActionLog) {}

    #[test]
    fn test_log_error_display() {
        let err = LogError::NotFound(Sequence::new(9));
        assert!(err.to_string().contains("#9"));
    }
}
