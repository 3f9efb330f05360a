//! Synchronization rules.
//!
//! A [`SyncRule`] is `when` (ordered action patterns), `where` (a
//! [`Pipeline`] of frame-algebra steps) and `then` (action templates).
//! Rules are built once, validated, and never mutated afterwards.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionRef;
use crate::concept::QuerySource;
use crate::error::{SyncResult, ValidationError};
use crate::frame::Frames;
use crate::pattern::{ActionPattern, Template, Var};
use crate::predicate::{FrameMap, Predicate};

/// Stable identifier of a rule, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    /// Name-based v5 UUID, stable across processes.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of a where-pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereStep {
    /// Inner join against a concept query.
    Query {
        /// Query to call, e.g. `MealLog._getMealById`.
        query: ActionRef,
        /// Arguments, substituted per frame.
        input: Template,
        /// Unified against each returned row.
        output: Template,
    },
    /// Keep the frames satisfying the predicate.
    Filter(Predicate),
    /// Rewrite bindings frame by frame.
    Map(FrameMap),
    /// Group by outer context, collecting `group` into `target`.
    CollectAs {
        /// Variables gathered per group.
        group: Vec<Var>,
        /// Receives the collected list.
        target: Var,
    },
    /// Per source frame: run `pipeline`, then collect its frames as
    /// `CollectAs` would; an empty result binds `target` to `[]` on the
    /// source frame.
    Aggregate {
        /// Sub-pipeline run per source frame.
        pipeline: Pipeline,
        /// Variables gathered from its frames.
        group: Vec<Var>,
        /// Receives the collected list.
        target: Var,
    },
    /// Keeps a frame only if `pipeline` yields nothing for it.
    Unless(Pipeline),
}

/// An ordered composition of [`WhereStep`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    steps: Vec<WhereStep>,
}

impl Pipeline {
    /// An empty pipeline; it passes frames through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: WhereStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a query join.
    #[must_use]
    pub fn query(self, query: ActionRef, input: Template, output: Template) -> Self {
        self.step(WhereStep::Query { query, input, output })
    }

    /// Appends a filter step.
    #[must_use]
    pub fn filter(self, predicate: Predicate) -> Self {
        self.step(WhereStep::Filter(predicate))
    }

    /// Appends a map step.
    #[must_use]
    pub fn map(self, map: FrameMap) -> Self {
        self.step(WhereStep::Map(map))
    }

    /// Appends a `collectAs` over `group` into `target`.
    #[must_use]
    pub fn collect_as(self, group: &[&Var], target: &Var) -> Self {
        self.step(WhereStep::CollectAs {
            group: group.iter().map(|v| (*v).clone()).collect(),
            target: target.clone(),
        })
    }

    /// Appends an aggregate: `pipeline` per frame, collected into `target` (`[]` when it yields nothing).
    #[must_use]
    pub fn aggregate(self, pipeline: Self, group: &[&Var], target: &Var) -> Self {
        self.step(WhereStep::Aggregate {
            pipeline,
            group: group.iter().map(|v| (*v).clone()).collect(),
            target: target.clone(),
        })
    }

    /// Appends a step keeping frames for which `pipeline` yields nothing.
    #[must_use]
    pub fn unless(self, pipeline: Self) -> Self {
        self.step(WhereStep::Unless(pipeline))
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[WhereStep] {
        &self.steps
    }

    /// Whether the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in order.
    pub fn run(&self, frames: Frames, source: &dyn QuerySource) -> SyncResult<Frames> {
        let mut frames = frames;
        for step in &self.steps {
            if frames.is_empty() {
                break;
            }
            frames = match step {
                WhereStep::Query { query, input, output } => frames.query(source, query, input, output)?,
                WhereStep::Filter(p) => frames.try_filter(|f| p.evaluate(f))?,
                WhereStep::Map(m) => frames.filter_map(|f| m.apply(f)),
                WhereStep::CollectAs { group, target } => frames.collect_as(group, target),
                WhereStep::Aggregate { pipeline, group, target } => {
                    let mut out = Vec::new();
                    for frame in frames {
                        let inner = pipeline.run(Frames::single(frame.clone()), source)?;
                        out.extend(inner.collect_as_or(group, target, &frame));
                    }
                    Frames::from(out)
                }
                WhereStep::Unless(pipeline) => {
                    let mut out = Vec::new();
                    for frame in frames {
                        if pipeline.run(Frames::single(frame.clone()), source)?.is_empty() {
                            out.push(frame);
                        }
                    }
                    Frames::from(out)
                }
            };
        }
        Ok(frames)
    }

    /// Variables visible after the pipeline, given those bound before it.
    fn bound_after(&self, before: &BTreeSet<Var>) -> BTreeSet<Var> {
        let mut bound = before.clone();
        for step in &self.steps {
            match step {
                WhereStep::Query { output, .. } => bound.extend(output.vars().cloned()),
                WhereStep::Map(m) => {
                    bound.insert(m.target().clone());
                }
                WhereStep::CollectAs { group, target } | WhereStep::Aggregate { group, target, .. } => {
                    for v in group {
                        bound.remove(v);
                    }
                    bound.insert(target.clone());
                }
                WhereStep::Filter(_) | WhereStep::Unless(_) => {}
            }
        }
        bound
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for step in &self.steps {
            match step {
                WhereStep::Filter(p) => p.validate()?,
                WhereStep::Aggregate { pipeline, .. } | WhereStep::Unless(pipeline) => pipeline.validate()?,
                WhereStep::Query { .. } | WhereStep::Map(_) | WhereStep::CollectAs { .. } => {}
            }
        }
        Ok(())
    }
}

/// One dispatch template of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ThenAction {
    /// Action to invoke.
    pub action: ActionRef,
    /// Input template, substituted per frame.
    pub input: Template,
}

/// A declarative synchronization rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRule {
    id: RuleId,
    name: String,
    when: Vec<ActionPattern>,
    pipeline: Pipeline,
    then: Vec<ThenAction>,
}

impl SyncRule {
    /// Starts building a rule called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SyncRuleBuilder {
        SyncRuleBuilder::new(name)
    }

    /// Identifier derived from the name.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// Unique rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When-patterns in declaration order.
    #[must_use]
    pub fn when(&self) -> &[ActionPattern] {
        &self.when
    }

    /// The last-declared when-pattern, checked against new records.
    #[must_use]
    pub fn trigger(&self) -> Option<&ActionPattern> {
        self.when.last()
    }

    /// The where-pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Then-actions, dispatched in order for each frame.
    #[must_use]
    pub fn then(&self) -> &[ThenAction] {
        &self.then
    }
}

/// Builder for [`SyncRule`].
#[derive(Debug, Clone)]
pub struct SyncRuleBuilder {
    name: String,
    when: Vec<ActionPattern>,
    pipeline: Pipeline,
    then: Vec<ThenAction>,
}

impl SyncRuleBuilder {
    /// Starts an empty rule called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: Vec::new(),
            pipeline: Pipeline::new(),
            then: Vec::new(),
        }
    }

    /// Adds a when-pattern. The last one added is the trigger.
    #[must_use]
    pub fn when(mut self, pattern: ActionPattern) -> Self {
        self.when.push(pattern);
        self
    }

    /// Appends the steps of `pipeline` to the where-pipeline.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline.steps.extend(pipeline.steps);
        self
    }

    /// Adds a query join to the where-pipeline.
    #[must_use]
    pub fn query(mut self, query: ActionRef, input: Template, output: Template) -> Self {
        self.pipeline = self.pipeline.query(query, input, output);
        self
    }

    /// Adds a filter step.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.pipeline = self.pipeline.filter(predicate);
        self
    }

    /// Adds a map step.
    #[must_use]
    pub fn map(mut self, map: FrameMap) -> Self {
        self.pipeline = self.pipeline.map(map);
        self
    }

    /// Adds a `collectAs` step.
    #[must_use]
    pub fn collect_as(mut self, group: &[&Var], target: &Var) -> Self {
        self.pipeline = self.pipeline.collect_as(group, target);
        self
    }

    /// Adds an aggregate step; see [`Pipeline::aggregate`].
    #[must_use]
    pub fn aggregate(mut self, pipeline: Pipeline, group: &[&Var], target: &Var) -> Self {
        self.pipeline = self.pipeline.aggregate(pipeline, group, target);
        self
    }

    /// Adds an `unless` step; see [`Pipeline::unless`].
    #[must_use]
    pub fn unless(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = self.pipeline.unless(pipeline);
        self
    }

    /// Adds a then-action.
    #[must_use]
    pub fn then(mut self, action: ActionRef, input: Template) -> Self {
        self.then.push(ThenAction { action, input });
        self
    }

    /// Validates and builds the rule.
    pub fn build(self) -> Result<SyncRule, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "rule.name".to_string(),
            });
        }
        if self.then.is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("{name}.then"),
            });
        }
        if self.when.is_empty() {
            tracing::warn!(rule = %name, "rule has no when-patterns and will never fire");
        }

        self.pipeline.validate()?;

        let matched: BTreeSet<Var> = self.when.iter().flat_map(|p| p.vars()).cloned().collect();
        let bound = self.pipeline.bound_after(&matched);
        for then in &self.then {
            if let Some(var) = then.input.required_vars().find(|v| !bound.contains(*v)) {
                return Err(ValidationError::UnboundThenVariable {
                    rule: name,
                    var: var.name().to_string(),
                });
            }
        }

        Ok(SyncRule {
            id: RuleId::from_name(&name),
            name,
            when: self.when,
            pipeline: self.pipeline,
            then: self.then,
        })
    }
}

/// Rules in declaration order, indexed by the action of their trigger.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<SyncRule>>,
    by_trigger: HashMap<ActionRef, Vec<usize>>,
}

impl RuleSet {
    /// An empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set, rejecting duplicate names.
    pub fn from_rules(rules: impl IntoIterator<Item = SyncRule>) -> Result<Self, ValidationError> {
        let mut set = Self::new();
        set.extend(rules)?;
        Ok(set)
    }

    /// Appends a rule. Names must be unique; a rule without when-patterns is kept but never triggered.
    pub fn add(&mut self, rule: SyncRule) -> Result<(), ValidationError> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(ValidationError::DuplicateRule { name: rule.name });
        }
        if let Some(trigger) = rule.trigger() {
            self.by_trigger
                .entry(trigger.action.clone())
                .or_default()
                .push(self.rules.len());
        }
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    /// Adds rules in order, stopping at the first duplicate.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = SyncRule>) -> Result<(), ValidationError> {
        rules.into_iter().try_for_each(|r| self.add(r))
    }

    /// Rules whose trigger pattern names `action`, in declaration order.
    pub fn triggered_by<'a>(&'a self, action: &ActionRef) -> impl Iterator<Item = &'a Arc<SyncRule>> + 'a {
        self.by_trigger
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.rules[i])
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<SyncRule>> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Rules in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SyncRule>> {
        self.rules.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::frame::Frame;
    use crate::pattern::vars;
    use crate::value::{Record, Value};

    fn request() -> ActionRef {
        ActionRef::new("Requesting", "request")
    }

    fn respond() -> ActionRef {
        ActionRef::new("Requesting", "respond")
    }

    /// Meals by owner: alice owns m1 and m2, bob owns nothing.
    struct Meals;

    impl QuerySource for Meals {
        fn query(&self, query: &ActionRef, input: &Record) -> SyncResult<Vec<Record>> {
            if query.action == "_explode" {
                return Err(SyncError::internal("boom"));
            }
            let owner = input.get("owner").and_then(Value::as_str);
            Ok(match owner {
                Some("alice") => ["m1", "m2"]
                    .into_iter()
                    .map(|m| Record::from([("meal".to_string(), Value::from(m))]))
                    .collect(),
                _ => Vec::new(),
            })
        }
    }

    fn by_owner() -> ActionRef {
        ActionRef::new("MealLog", "_getMealsByOwner")
    }

    #[test]
    fn test_rule_id_is_stable() {
        assert_eq!(RuleId::from_name("ListMeals"), RuleId::from_name("ListMeals"));
        assert_ne!(RuleId::from_name("ListMeals"), RuleId::from_name("GetMeal"));
    }

    #[test]
    fn test_build_rejects_unbound_then_variable() {
        let [req, meal] = vars(["request", "meal"]);
        let err = SyncRule::builder("Broken")
            .when(ActionPattern::success(request(), Template::new(), Template::of(&[&req])))
            .then(respond(), Template::of(&[&req, &meal]))
            .build()
            .unwrap_err();
        let ValidationError::UnboundThenVariable { rule, var } = err else {
            panic!("expected UnboundThenVariable, got {err:?}");
        };
        assert_eq!(rule, "Broken");
        assert_eq!(var, "meal");
    }

    #[test]
    fn test_build_accepts_vars_bound_by_pipeline() {
        let [req, owner, meal, meals] = vars(["request", "owner", "meal", "meals"]);
        let rule = SyncRule::builder("ListMeals")
            .when(ActionPattern::success(request(), Template::of(&[&owner]), Template::of(&[&req])))
            .query(by_owner(), Template::of(&[&owner]), Template::of(&[&meal]))
            .collect_as(&[&meal], &meals)
            .then(respond(), Template::of(&[&req, &meals]))
            .build()
            .unwrap();
        assert_eq!(rule.trigger().unwrap().action, request());
        assert_eq!(rule.id(), RuleId::from_name("ListMeals"));
    }

    #[test]
    fn test_collected_group_var_is_no_longer_bound() {
        let [req, owner, meal, meals] = vars(["request", "owner", "meal", "meals"]);
        let err = SyncRule::builder("LeaksMeal")
            .when(ActionPattern::success(request(), Template::of(&[&owner]), Template::of(&[&req])))
            .query(by_owner(), Template::of(&[&owner]), Template::of(&[&meal]))
            .collect_as(&[&meal], &meals)
            .then(respond(), Template::of(&[&req, &meal]))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnboundThenVariable { .. }));
    }

    #[test]
    fn test_build_validation_errors() {
        let err = SyncRule::builder("  ").then(respond(), Template::new()).build().unwrap_err();
        assert!(matches!(err, ValidationError::EmptyField { .. }));

        let err = SyncRule::builder("NoThen").build().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { .. }));

        let user = Var::new("user");
        let err = SyncRule::builder("BadRegex")
            .filter(Predicate::matches(&user, "["))
            .then(respond(), Template::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRegex { .. }));
    }

    #[test]
    fn test_aggregate_uses_source_frame_as_fallback() {
        let [owner, meal, meals] = vars(["owner", "meal", "meals"]);
        let pipeline = Pipeline::new().aggregate(
            Pipeline::new().query(by_owner(), Template::of(&[&owner]), Template::of(&[&meal])),
            &[&meal],
            &meals,
        );

        let frames: Frames = vec![Frame::new().with(&owner, "alice"), Frame::new().with(&owner, "bob")].into();
        let out = pipeline.run(frames, &Meals).unwrap();

        assert_eq!(out.len(), 2);
        let lists: Vec<_> = out.iter().map(|f| f.get(&meals).cloned().unwrap()).collect();
        assert_eq!(lists[0], Value::List(vec![Value::from("m1"), Value::from("m2")]));
        assert_eq!(lists[1], Value::List(Vec::new()));
    }

    #[test]
    fn test_unless_is_an_anti_join() {
        let [owner, meal] = vars(["owner", "meal"]);
        let pipeline = Pipeline::new().unless(
            Pipeline::new().query(by_owner(), Template::of(&[&owner]), Template::of(&[&meal])),
        );

        let frames: Frames = vec![Frame::new().with(&owner, "alice"), Frame::new().with(&owner, "bob")].into();
        let out = pipeline.run(frames, &Meals).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().unwrap().get(&owner), Some(&Value::from("bob")));
    }

    #[test]
    fn test_pipeline_failure_propagates() {
        let owner = Var::new("owner");
        let pipeline = Pipeline::new().query(
            ActionRef::new("MealLog", "_explode"),
            Template::of(&[&owner]),
            Template::new(),
        );
        let err = pipeline.run(Frames::single(Frame::new().with(&owner, "alice")), &Meals).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_rule_set_orders_and_indexes() {
        let req = Var::new("request");
        let make = |name: &str| {
            SyncRule::builder(name)
                .when(ActionPattern::success(request(), Template::new(), Template::of(&[&req])))
                .then(respond(), Template::of(&[&req]))
                .build()
                .unwrap()
        };

        let set = RuleSet::from_rules([make("B"), make("A")]).unwrap();
        let names: Vec<_> = set.triggered_by(&request()).map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(set.triggered_by(&respond()).count(), 0);

        let err = RuleSet::from_rules([make("A"), make("A")]).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateRule { .. }));
    }
}
