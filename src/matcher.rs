//! Pattern matching of rules against newly appended records.
//!
//! Only the last-declared when-pattern of a rule is checked against the new
//! record (the trigger). The remaining patterns are satisfied from records
//! appended earlier, producing one frame per compatible combination.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{ActionRecord, ActionRef, Sequence};
use crate::error::LogError;
use crate::frame::{Frame, Frames};
use crate::log::ActionLog;
use crate::rule::{RuleSet, SyncRule};

/// Which prior records may satisfy non-trigger patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinScope {
    /// Only records of the trigger's flow.
    #[default]
    Flow,
    /// Every earlier record in the log.
    Global,
}

/// Joins rule patterns against the action log.
#[derive(Clone, Copy)]
pub struct Matcher<'a> {
    log: &'a dyn ActionLog,
    scope: JoinScope,
}

impl<'a> Matcher<'a> {
    /// A matcher reading `log` with the given join scope.
    #[must_use]
    pub fn new(log: &'a dyn ActionLog, scope: JoinScope) -> Self {
        Self { log, scope }
    }

    /// Join scope used for earlier when-patterns.
    #[must_use]
    pub const fn scope(&self) -> JoinScope {
        self.scope
    }

    /// Initial frames of `rule` for `trigger`; empty when it does not match.
    ///
    /// Earlier patterns are joined in declaration order. Frames with
    /// identical bindings are merged, so a rule fires once per distinct
    /// binding set however many join paths produced it.
    pub fn match_rule(&self, rule: &SyncRule, trigger: &ActionRecord) -> Result<Frames, LogError> {
        let Some((last, earlier)) = rule.when().split_last() else {
            return Ok(Frames::new());
        };
        let Some(seed) = last.unify(trigger, &Frame::new()) else {
            return Ok(Frames::new());
        };

        let mut frames = Frames::single(seed);
        for pattern in earlier {
            let prior = self.prior_records(&pattern.action, trigger)?;
            frames = frames
                .into_iter()
                .flat_map(|f| prior.iter().filter_map(move |r| pattern.unify(r, &f)).collect::<Vec<_>>())
                .collect();
            if frames.is_empty() {
                break;
            }
        }
        Ok(frames.dedup())
    }

    /// Rules of `rules` matching `trigger`, in declaration order.
    pub fn candidates<'r>(
        &self,
        rules: &'r RuleSet,
        trigger: &ActionRecord,
    ) -> Result<Vec<(&'r Arc<SyncRule>, Frames)>, LogError> {
        let mut out = Vec::new();
        for rule in rules.triggered_by(&trigger.action) {
            let frames = self.match_rule(rule, trigger)?;
            if !frames.is_empty() {
                out.push((rule, frames));
            }
        }
        Ok(out)
    }

    fn prior_records(&self, action: &ActionRef, trigger: &ActionRecord) -> Result<Vec<Arc<ActionRecord>>, LogError> {
        match self.scope {
            JoinScope::Flow => self.log.in_flow(trigger.flow, action, trigger.sequence),
            JoinScope::Global => Ok(self
                .log
                .since(action, Sequence::ZERO)?
                .into_iter()
                .take_while(|r| r.sequence < trigger.sequence)
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Completion, FlowId, Outcome};
    use crate::log::InMemoryActionLog;
    use crate::pattern::{vars, ActionPattern, Template, Var};
    use crate::value::{Record, Value};

    fn request() -> ActionRef {
        ActionRef::new("Requesting", "request")
    }

    fn submit() -> ActionRef {
        ActionRef::new("MealLog", "submit")
    }

    fn append(log: &InMemoryActionLog, flow: FlowId, action: ActionRef, input: &[(&str, &str)], outcome: Outcome) -> Arc<ActionRecord> {
        let input: Record = input.iter().map(|(k, v)| ((*k).to_string(), Value::from(*v))).collect();
        log.append(Completion::new(flow, action, input, outcome)).unwrap()
    }

    fn response_rule() -> SyncRule {
        let [req, meal] = vars(["request", "meal"]);
        SyncRule::builder("SubmitMealOwnerResponseSuccess")
            .when(ActionPattern::success(
                request(),
                Template::new().lit("path", "/MealLog/submit"),
                Template::of(&[&req]),
            ))
            .when(ActionPattern::success(submit(), Template::new(), Template::of(&[&meal])))
            .then(ActionRef::new("Requesting", "respond"), Template::of(&[&req, &meal]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_rule_without_when_patterns_matches_nothing() {
        let log = InMemoryActionLog::new();
        let trigger = append(&log, FlowId::new(), request(), &[("path", "/x")], Outcome::success([("request", "r1")]));
        let rule = SyncRule::builder("Unanchored")
            .then(ActionRef::new("Requesting", "respond"), Template::new().lit("request", "r1"))
            .build()
            .unwrap();

        let matcher = Matcher::new(&log, JoinScope::Flow);
        assert!(matcher.match_rule(&rule, &trigger).unwrap().is_empty());
    }

    #[test]
    fn test_join_is_scoped_to_the_trigger_flow() {
        let log = InMemoryActionLog::new();
        let (f1, f2) = (FlowId::new(), FlowId::new());

        append(&log, f1, request(), &[("path", "/MealLog/submit")], Outcome::success([("request", "r1")]));
        append(&log, f2, request(), &[("path", "/MealLog/submit")], Outcome::success([("request", "r2")]));
        let trigger = append(&log, f1, submit(), &[("owner", "alice")], Outcome::success([("meal", "m1")]));

        let frames = Matcher::new(&log, JoinScope::Flow).match_rule(&response_rule(), &trigger).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = frames.first().unwrap();
        let [req, meal] = vars(["request", "meal"]);
        assert_eq!(frame.get(&req), Some(&Value::from("r1")));
        assert_eq!(frame.get(&meal), Some(&Value::from("m1")));
        assert_eq!(frame.provenance(), &[trigger.sequence, Sequence::new(1)]);

        // Global scope sees both requests and yields one frame per record.
        let frames = Matcher::new(&log, JoinScope::Global).match_rule(&response_rule(), &trigger).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_join_on_shared_variable_picks_agreeing_record() {
        let log = InMemoryActionLog::new();
        let flow = FlowId::new();
        let [owner, meal] = vars(["owner", "meal"]);
        let rule = SyncRule::builder("SameOwner")
            .when(ActionPattern::success(submit(), Template::of(&[&owner]), Template::new()))
            .when(ActionPattern::success(
                ActionRef::new("MealLog", "edit"),
                Template::new().field("caller", &owner).field("meal", &meal),
                Template::new(),
            ))
            .then(ActionRef::new("Audit", "note"), Template::of(&[&owner, &meal]))
            .build()
            .unwrap();

        append(&log, flow, submit(), &[("owner", "alice")], Outcome::empty());
        append(&log, flow, submit(), &[("owner", "bob")], Outcome::empty());
        let trigger = append(
            &log,
            flow,
            ActionRef::new("MealLog", "edit"),
            &[("caller", "bob"), ("meal", "m2")],
            Outcome::empty(),
        );

        let frames = Matcher::new(&log, JoinScope::Flow).match_rule(&rule, &trigger).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames.first().unwrap().get(&owner), Some(&Value::from("bob")));
    }

    #[test]
    fn test_identical_join_paths_fire_once() {
        let log = InMemoryActionLog::new();
        let flow = FlowId::new();
        // Two identical request records satisfy the earlier pattern the same way.
        append(&log, flow, request(), &[("path", "/MealLog/submit")], Outcome::success([("request", "r1")]));
        append(&log, flow, request(), &[("path", "/MealLog/submit")], Outcome::success([("request", "r1")]));
        let trigger = append(&log, flow, submit(), &[("owner", "alice")], Outcome::success([("meal", "m1")]));

        let frames = Matcher::new(&log, JoinScope::Flow).match_rule(&response_rule(), &trigger).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_unsatisfied_earlier_pattern_discards_candidate() {
        let log = InMemoryActionLog::new();
        let trigger = append(&log, FlowId::new(), submit(), &[("owner", "alice")], Outcome::success([("meal", "m1")]));
        let frames = Matcher::new(&log, JoinScope::Flow).match_rule(&response_rule(), &trigger).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn test_repeated_variable_must_agree() {
        let log = InMemoryActionLog::new();
        let flow = FlowId::new();
        let [x, req] = vars(["x", "request"]);
        let rule = SyncRule::builder("Contradiction")
            .when(ActionPattern::success(
                request(),
                Template::new().field("path", &x).field("session", &x),
                Template::of(&[&req]),
            ))
            .then(ActionRef::new("Requesting", "respond"), Template::of(&[&req]))
            .build()
            .unwrap();

        let trigger = append(&log, flow, request(), &[("path", "/a"), ("session", "s1")], Outcome::success([("request", "r1")]));
        assert!(Matcher::new(&log, JoinScope::Flow).match_rule(&rule, &trigger).unwrap().is_empty());

        let trigger = append(&log, flow, request(), &[("path", "same"), ("session", "same")], Outcome::success([("request", "r2")]));
        assert_eq!(Matcher::new(&log, JoinScope::Flow).match_rule(&rule, &trigger).unwrap().len(), 1);
    }

    #[test]
    fn test_candidates_follow_declaration_order() {
        let log = InMemoryActionLog::new();
        let flow = FlowId::new();
        let req = Var::new("request");
        let make = |name: &str| {
            SyncRule::builder(name)
                .when(ActionPattern::success(request(), Template::new(), Template::of(&[&req])))
                .then(ActionRef::new("Requesting", "respond"), Template::of(&[&req]))
                .build()
                .unwrap()
        };
        let rules = RuleSet::from_rules([make("Second"), make("First"), response_rule()]).unwrap();
        let trigger = append(&log, flow, request(), &[("path", "/x")], Outcome::success([("request", "r1")]));

        let matched: Vec<_> = Matcher::new(&log, JoinScope::Flow)
            .candidates(&rules, &trigger)
            .unwrap()
            .into_iter()
            .map(|(r, _)| r.name().to_string())
            .collect();
        assert_eq!(matched, vec!["Second", "First"]);
    }

    #[test]
    fn test_join_scope_deserializes_lowercase() {
        let scope: JoinScope = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(scope, JoinScope::Global);
    }
}
