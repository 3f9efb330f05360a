use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::action::Outcome;
use crate::concept::{settle, ActionFailure, ActionResult, Args, Concept};
use crate::error::SyncResult;
use crate::value::{Record, Value};

use super::{poisoned, unknown_action, unknown_query, IdSource};

const NAME: &str = "QuickCheckIns";

const NOT_OWNER: &str = "You are not the owner of this check-in.";
const METRIC_IN_USE: &str = "Cannot delete metric: there are existing check-ins referencing this metric.";

#[derive(Debug, Clone)]
struct CheckIn {
    owner: String,
    at: Value,
    metric: String,
    value: f64,
}

impl CheckIn {
    fn to_record(&self, id: &str) -> Record {
        Record::from([
            ("id".to_string(), Value::from(id)),
            ("owner".to_string(), Value::from(self.owner.as_str())),
            ("at".to_string(), self.at.clone()),
            ("metric".to_string(), Value::from(self.metric.as_str())),
            ("value".to_string(), Value::Float(self.value)),
        ])
    }
}

#[derive(Debug, Default)]
struct State {
    // metric id -> name
    metrics: BTreeMap<String, String>,
    // Keyed by insertion number so listings keep recording order.
    check_ins: BTreeMap<u64, (String, CheckIn)>,
}

impl State {
    fn check_in_mut(&mut self, id: &str, owner: &str) -> Result<&mut CheckIn, ActionFailure> {
        let check_in = self
            .check_ins
            .values_mut()
            .find(|(cid, _)| cid == id)
            .map(|(_, c)| c)
            .ok_or_else(|| ActionFailure::refused(format!("Check-in with ID '{id}' not found.")))?;
        if check_in.owner != owner {
            return Err(ActionFailure::refused(NOT_OWNER));
        }
        Ok(check_in)
    }
}

/// Numeric self-reports (energy, mood, ...) against named metrics.
#[derive(Debug, Default)]
pub struct QuickCheckIns {
    metric_ids: IdSource,
    check_in_ids: IdSource,
    state: RwLock<State>,
}

impl QuickCheckIns {
    /// An empty store minting random ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses separate id sources for metrics and check-ins.
    #[must_use]
    pub fn with_ids(metric_ids: IdSource, check_in_ids: IdSource) -> Self {
        Self {
            metric_ids,
            check_in_ids,
            state: RwLock::default(),
        }
    }

    fn define_metric(&self, args: Args<'_>) -> ActionResult {
        let name = args.str("name")?;
        let mut state = self.state.write().map_err(|_| poisoned(NAME))?;
        if let Some((id, _)) = state.metrics.iter().find(|(_, n)| n.as_str() == name) {
            return Err(ActionFailure::refused(format!(
                "Metric with name '{name}' already exists with ID '{id}'."
            )));
        }
        let id = self.metric_ids.next_id();
        state.metrics.insert(id.clone(), name.to_string());
        Ok(Record::from([("metric".to_string(), Value::String(id))]))
    }

    fn record(&self, args: Args<'_>) -> ActionResult {
        let owner = args.str("owner")?.to_string();
        let at = args.required("at")?.clone();
        let metric = args.str("metric")?.to_string();
        let value = args.number("value")?;

        let mut state = self.state.write().map_err(|_| poisoned(NAME))?;
        if !state.metrics.contains_key(&metric) {
            return Err(ActionFailure::refused(format!("Metric with ID '{metric}' is not defined.")));
        }
        let id = self.check_in_ids.next_id();
        let key = state.check_ins.last_key_value().map_or(0, |(k, _)| k + 1);
        state.check_ins.insert(
            key,
            (
                id.clone(),
                CheckIn {
                    owner,
                    at,
                    metric,
                    value,
                },
            ),
        );
        Ok(Record::from([("checkIn".to_string(), Value::String(id))]))
    }

    fn edit(&self, args: Args<'_>) -> ActionResult {
        let id = args.str("checkIn")?;
        let owner = args.str("owner")?;
        let metric = args.opt_str("metric")?;
        let value = args.opt_number("value")?;

        let mut state = self.state.write().map_err(|_| poisoned(NAME))?;
        let metric_known = metric.map(|m| state.metrics.contains_key(m));
        let check_in = state.check_in_mut(id, owner)?;
        if let (Some(m), Some(false)) = (metric, metric_known) {
            return Err(ActionFailure::refused(format!("New metric with ID '{m}' is not defined.")));
        }
        if let Some(m) = metric {
            check_in.metric = m.to_string();
        }
        if let Some(v) = value {
            check_in.value = v;
        }
        Ok(Record::new())
    }

    fn delete(&self, args: Args<'_>) -> ActionResult {
        let id = args.str("checkIn")?;
        let owner = args.str("owner")?;
        let mut state = self.state.write().map_err(|_| poisoned(NAME))?;
        state.check_in_mut(id, owner)?;
        state.check_ins.retain(|_, (cid, _)| cid.as_str() != id);
        Ok(Record::new())
    }

    fn delete_metric(&self, args: Args<'_>) -> ActionResult {
        let metric = args.str("metric")?;
        let mut state = self.state.write().map_err(|_| poisoned(NAME))?;
        if !state.metrics.contains_key(metric) {
            return Err(ActionFailure::refused(format!("Metric with ID '{metric}' not found.")));
        }
        if state.check_ins.values().any(|(_, c)| c.metric == metric) {
            return Err(ActionFailure::refused(METRIC_IN_USE));
        }
        state.metrics.remove(metric);
        Ok(Record::new())
    }

    fn get_check_in(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let id = args.str("checkIn")?;
        let state = self.state.read().map_err(|_| poisoned(NAME))?;
        Ok(state
            .check_ins
            .values()
            .filter(|(cid, _)| cid == id)
            .map(|(cid, c)| c.to_record(cid))
            .collect())
    }

    fn metrics_by_name(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let name = args.str("name")?;
        let state = self.state.read().map_err(|_| poisoned(NAME))?;
        Ok(state
            .metrics
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(id, n)| {
                Record::from([
                    ("id".to_string(), Value::from(id.as_str())),
                    ("name".to_string(), Value::from(n.as_str())),
                ])
            })
            .collect())
    }

    fn check_ins_by_owner(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let owner = args.str("owner")?;
        let state = self.state.read().map_err(|_| poisoned(NAME))?;
        Ok(state
            .check_ins
            .values()
            .filter(|(_, c)| c.owner == owner)
            .map(|(cid, c)| Record::from([("checkIn".to_string(), Value::Record(c.to_record(cid)))]))
            .collect())
    }
}

impl Concept for QuickCheckIns {
    fn name(&self) -> &str {
        NAME
    }

    fn perform(&self, action: &str, input: &Record) -> SyncResult<Outcome> {
        let args = Args::new(input);
        match action {
            "defineMetric" => settle(self.define_metric(args)),
            "record" => settle(self.record(args)),
            "edit" => settle(self.edit(args)),
            "delete" => settle(self.delete(args)),
            "deleteMetric" => settle(self.delete_metric(args)),
            other => Err(unknown_action(NAME, other)),
        }
    }

    fn query(&self, query: &str, input: &Record) -> SyncResult<Vec<Record>> {
        let args = Args::new(input);
        let rows = match query {
            "_getCheckIn" => self.get_check_in(args),
            "_getMetricsByName" => self.metrics_by_name(args),
            "_listCheckInsByOwner" => self.check_ins_by_owner(args),
            other => return Err(unknown_query(NAME, other)),
        };
        rows.map_err(|e| e.into_query_error(NAME, query))
    }
}
