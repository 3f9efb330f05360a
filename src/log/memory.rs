//! In-memory action log.
//!
//! Thread-safe arena of records with secondary indices by action and by
//! flow. It is the default backend and the index layer of the file-backed log.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::action::{ActionRecord, ActionRef, Completion, FlowId, Sequence};
use crate::error::LogError;

use super::traits::ActionLog;

fn lock_err(context: &'static str) -> LogError {
    LogError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct LogState {
    records: BTreeMap<Sequence, Arc<ActionRecord>>,
    by_action: HashMap<ActionRef, Vec<Sequence>>,
    by_flow: HashMap<FlowId, Vec<Sequence>>,
    last: Sequence,
}

impl LogState {
    fn insert(&mut self, record: Arc<ActionRecord>) {
        let seq = record.sequence;
        self.by_action.entry(record.action.clone()).or_default().push(seq);
        self.by_flow.entry(record.flow).or_default().push(seq);
        self.records.insert(seq, record);
        self.last = seq;
    }

    fn resolve(&self, seqs: &[Sequence]) -> Vec<Arc<ActionRecord>> {
        seqs.iter().filter_map(|s| self.records.get(s).cloned()).collect()
    }

    fn prune_before(&mut self, sequence: Sequence) -> usize {
        let kept = self.records.split_off(&sequence);
        let removed = self.records.len();
        self.records = kept;

        for seqs in self.by_action.values_mut() {
            seqs.retain(|s| *s >= sequence);
        }
        self.by_action.retain(|_, seqs| !seqs.is_empty());
        for seqs in self.by_flow.values_mut() {
            seqs.retain(|s| *s >= sequence);
        }
        self.by_flow.retain(|_, seqs| !seqs.is_empty());
        removed
    }
}

/// Thread-safe in-memory action log.
#[derive(Debug, Default)]
pub struct InMemoryActionLog {
    state: RwLock<LogState>,
}

impl InMemoryActionLog {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends under the write lock, running `persist` before the record
    /// becomes visible. A failing `persist` leaves the log unchanged.
    pub(crate) fn append_with<F>(&self, completion: Completion, persist: F) -> Result<Arc<ActionRecord>, LogError>
    where
        F: FnOnce(&ActionRecord) -> Result<(), LogError>,
    {
        let mut state = self.state.write().map_err(|_| lock_err("log.append"))?;
        let record = completion.into_record(state.last.next());
        persist(&record)?;
        let record = Arc::new(record);
        state.insert(Arc::clone(&record));
        Ok(record)
    }

    /// Re-inserts a previously persisted record during replay.
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn restore(&self, record: ActionRecord) -> Result<(), LogError> {
        let mut state = self.state.write().map_err(|_| lock_err("log.restore"))?;
        if record.sequence <= state.last {
            return Err(LogError::Corrupt {
                after: state.last,
                reason: format!("sequence {} is not increasing", record.sequence),
            });
        }
        state.insert(Arc::new(record));
        Ok(())
    }

    /// Raises the last assigned sequence to `floor`, so numbering resumes
    /// after records that were compacted away.
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn resume_after(&self, floor: Sequence) -> Result<(), LogError> {
        let mut state = self.state.write().map_err(|_| lock_err("log.resume_after"))?;
        state.last = state.last.max(floor);
        Ok(())
    }

    /// Hands the records at or after `sequence`, together with the last
    /// assigned sequence, to `rewrite` while the write lock is held. The
    /// older records are dropped from memory only once `rewrite` succeeds.
    pub(crate) fn truncate_with<F>(&self, sequence: Sequence, rewrite: F) -> Result<usize, LogError>
    where
        F: FnOnce(&[Arc<ActionRecord>], Sequence) -> Result<(), LogError>,
    {
        let mut state = self.state.write().map_err(|_| lock_err("log.truncate_before"))?;
        let retained: Vec<_> = state.records.range(sequence..).map(|(_, r)| Arc::clone(r)).collect();
        if retained.len() == state.records.len() {
            return Ok(0);
        }
        rewrite(&retained, state.last)?;
        Ok(state.prune_before(sequence))
    }
}

impl ActionLog for InMemoryActionLog {
    fn append(&self, completion: Completion) -> Result<Arc<ActionRecord>, LogError> {
        self.append_with(completion, |_| Ok(()))
    }

    fn get(&self, sequence: Sequence) -> Result<Option<Arc<ActionRecord>>, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.get"))?;
        Ok(state.records.get(&sequence).cloned())
    }

    fn since(&self, action: &ActionRef, after: Sequence) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.since"))?;
        let Some(seqs) = state.by_action.get(action) else {
            return Ok(Vec::new());
        };
        let start = seqs.partition_point(|s| *s <= after);
        Ok(state.resolve(&seqs[start..]))
    }

    fn in_flow(
        &self,
        flow: FlowId,
        action: &ActionRef,
        before: Sequence,
    ) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.in_flow"))?;
        let Some(seqs) = state.by_flow.get(&flow) else {
            return Ok(Vec::new());
        };
        let end = seqs.partition_point(|s| *s < before);
        Ok(seqs[..end]
            .iter()
            .filter_map(|s| state.records.get(s))
            .filter(|r| &r.action == action)
            .cloned()
            .collect())
    }

    fn flow(&self, flow: FlowId) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.flow"))?;
        Ok(state.by_flow.get(&flow).map(|seqs| state.resolve(seqs)).unwrap_or_default())
    }

    fn latest_matching(
        &self,
        action: &ActionRef,
        before: Sequence,
        matches: &dyn Fn(&ActionRecord) -> bool,
    ) -> Result<Option<Arc<ActionRecord>>, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.latest_matching"))?;
        let Some(seqs) = state.by_action.get(action) else {
            return Ok(None);
        };
        let end = seqs.partition_point(|s| *s < before);
        Ok(seqs[..end]
            .iter()
            .rev()
            .filter_map(|s| state.records.get(s))
            .find(|r| matches(r))
            .cloned())
    }

    fn last_sequence(&self) -> Result<Sequence, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.last_sequence"))?;
        Ok(state.last)
    }

    fn len(&self) -> Result<usize, LogError> {
        let state = self.state.read().map_err(|_| lock_err("log.len"))?;
        Ok(state.records.len())
    }

    fn truncate_before(&self, sequence: Sequence) -> Result<usize, LogError> {
        self.truncate_with(sequence, |_, _| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Outcome;
    use crate::value::{Record, Value};

    fn completion(flow: FlowId, action: &ActionRef, owner: &str) -> Completion {
        Completion::new(
            flow,
            action.clone(),
            Record::from([("owner".to_string(), Value::from(owner))]),
            Outcome::empty(),
        )
    }

    #[test]
    fn test_append_assigns_increasing_sequences() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let flow = FlowId::new();

        let a = log.append(completion(flow, &submit, "alice")).unwrap();
        let b = log.append(completion(flow, &submit, "bob")).unwrap();

        assert_eq!(a.sequence, Sequence::new(1));
        assert_eq!(b.sequence, Sequence::new(2));
        assert_eq!(log.last_sequence().unwrap(), Sequence::new(2));
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.get(Sequence::new(1)).unwrap().unwrap().input["owner"], Value::from("alice"));
    }

    #[test]
    fn test_since_and_in_flow_indices() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let edit = ActionRef::new("MealLog", "edit");
        let f1 = FlowId::new();
        let f2 = FlowId::new();

        log.append(completion(f1, &submit, "alice")).unwrap(); // #1
        log.append(completion(f2, &submit, "bob")).unwrap(); // #2
        log.append(completion(f1, &edit, "alice")).unwrap(); // #3
        log.append(completion(f1, &submit, "carol")).unwrap(); // #4

        let since: Vec<_> = log.since(&submit, Sequence::new(1)).unwrap().iter().map(|r| r.sequence).collect();
        assert_eq!(since, vec![Sequence::new(2), Sequence::new(4)]);

        let scoped: Vec<_> = log
            .in_flow(f1, &submit, Sequence::new(4))
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(scoped, vec![Sequence::new(1)]);

        assert_eq!(log.flow(f1).unwrap().len(), 3);
        assert!(log.flow(FlowId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_latest_matching_scans_backwards() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let flow = FlowId::new();
        for owner in ["alice", "bob", "alice", "bob"] {
            log.append(completion(flow, &submit, owner)).unwrap();
        }

        let is_alice = |r: &ActionRecord| r.input.get("owner") == Some(&Value::from("alice"));
        let latest = log.latest_matching(&submit, Sequence::new(u64::MAX), &is_alice).unwrap();
        assert_eq!(latest.unwrap().sequence, Sequence::new(3));

        let earlier = log.latest_matching(&submit, Sequence::new(3), &is_alice).unwrap();
        assert_eq!(earlier.unwrap().sequence, Sequence::new(1));
    }

    #[test]
    fn test_truncate_before_prunes_indices() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let flow = FlowId::new();
        for owner in ["a", "b", "c"] {
            log.append(completion(flow, &submit, owner)).unwrap();
        }

        assert_eq!(log.truncate_before(Sequence::new(3)).unwrap(), 2);
        assert_eq!(log.len().unwrap(), 1);
        assert_eq!(log.since(&submit, Sequence::ZERO).unwrap().len(), 1);
        assert_eq!(log.flow(flow).unwrap()[0].sequence, Sequence::new(3));

        // Sequences keep increasing after archival.
        let next = log.append(completion(flow, &submit, "d")).unwrap();
        assert_eq!(next.sequence, Sequence::new(4));
    }

    #[test]
    fn test_failed_persist_leaves_log_unchanged() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let res = log.append_with(completion(FlowId::new(), &submit, "a"), |_| {
            Err(LogError::Io("disk full".to_string()))
        });
        assert!(res.is_err());
        assert!(log.is_empty().unwrap());
        assert_eq!(log.last_sequence().unwrap(), Sequence::ZERO);
    }

    #[test]
    fn test_failed_rewrite_keeps_records() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        let flow = FlowId::new();
        for owner in ["a", "b", "c"] {
            log.append(completion(flow, &submit, owner)).unwrap();
        }

        let res = log.truncate_with(Sequence::new(3), |retained, last| {
            assert_eq!(retained.len(), 1);
            assert_eq!(last, Sequence::new(3));
            Err(LogError::Io("read-only filesystem".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.since(&submit, Sequence::ZERO).unwrap().len(), 3);
    }

    #[test]
    fn test_resume_after_raises_next_sequence() {
        let log = InMemoryActionLog::new();
        let submit = ActionRef::new("MealLog", "submit");
        log.resume_after(Sequence::new(7)).unwrap();
        log.resume_after(Sequence::new(2)).unwrap();

        let next = log.append(completion(FlowId::new(), &submit, "a")).unwrap();
        assert_eq!(next.sequence, Sequence::new(8));
    }
}
