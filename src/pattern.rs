//! When-patterns and templates.
//!
//! A [`Template`] is an ordered list of `(field, Term)` pairs. Terms are
//! literals or binding variables; unifying a template against a record
//! extends a [`Frame`], substituting a frame into a template produces a
//! concrete record. Variables are plain symbols scoped to one rule.

use std::fmt;
use std::sync::Arc;

use crate::action::{ActionRecord, ActionRef, Outcome};
use crate::error::ExecutionError;
use crate::frame::Frame;
use crate::value::{Record, Value};

/// A binding variable.
///
/// Two occurrences of the same variable within one rule must bind to equal
/// values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(Arc<str>);

impl Var {
    /// A variable called `name`.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Variable name without any sigil.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// Declares several variables at once.
///
/// ```
/// use conceptsync::pattern::vars;
///
/// let [request, meal] = vars(["request", "meal"]);
/// assert_eq!(meal.name(), "meal");
/// # let _ = request;
/// ```
#[must_use]
pub fn vars<const N: usize>(names: [&str; N]) -> [Var; N] {
    names.map(Var::new)
}

/// One position of a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Must equal the field value.
    Literal(Value),
    /// Binds (or must agree with) the field value; the field must exist.
    Var(Var),
    /// Like `Var`, but a missing field binds `Null`, and an unbound or
    /// `Null` variable is omitted on substitution.
    Optional(Var),
}

impl Term {
    /// An optional binding of `var`.
    #[must_use]
    pub fn optional(var: &Var) -> Self {
        Self::Optional(var.clone())
    }

    /// The variable of a non-literal term.
    #[must_use]
    pub const fn var(&self) -> Option<&Var> {
        match self {
            Self::Literal(_) => None,
            Self::Var(v) | Self::Optional(v) => Some(v),
        }
    }

    /// Unifies this term with a field value (`None` when the field is absent).
    fn unify(&self, value: Option<&Value>, frame: Frame) -> Option<Frame> {
        match self {
            Self::Literal(expected) => (value == Some(expected)).then_some(frame),
            Self::Var(var) => frame.unify(var, value?.clone()),
            Self::Optional(var) => frame.unify(var, value.cloned().unwrap_or(Value::Null)),
        }
    }
}

impl From<&Var> for Term {
    fn from(v: &Var) -> Self {
        Self::Var(v.clone())
    }
}

impl From<Var> for Term {
    fn from(v: Var) -> Self {
        Self::Var(v)
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<&str> for Term {
    fn from(v: &str) -> Self {
        Self::Literal(Value::from(v))
    }
}

impl From<bool> for Term {
    fn from(v: bool) -> Self {
        Self::Literal(Value::Bool(v))
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Self::Literal(Value::Int(v))
    }
}

/// An ordered field template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    fields: Vec<(String, Term)>,
}

impl Template {
    /// An empty template; it matches any record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `{ a: ?a, b: ?b }`.
    #[must_use]
    pub fn of(vars: &[&Var]) -> Self {
        vars.iter().fold(Self::new(), |t, v| t.field(v.name(), *v))
    }

    /// Adds a field, replacing an earlier one with the same name.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, term: impl Into<Term>) -> Self {
        let name = name.into();
        let term = term.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = term,
            None => self.fields.push((name, term)),
        }
        self
    }

    /// Adds a literal field.
    #[must_use]
    pub fn lit(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(name, Term::Literal(value.into()))
    }

    /// Adds an optional variable field.
    #[must_use]
    pub fn opt(self, name: impl Into<String>, var: &Var) -> Self {
        self.field(name, Term::optional(var))
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Term)] {
        &self.fields
    }

    /// Whether the template has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Variables mentioned by the template, in field order.
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.fields.iter().filter_map(|(_, t)| t.var())
    }

    /// Variables that substitution requires to be bound.
    pub fn required_vars(&self) -> impl Iterator<Item = &Var> {
        self.fields.iter().filter_map(|(_, t)| match t {
            Term::Var(v) => Some(v),
            Term::Literal(_) | Term::Optional(_) => None,
        })
    }

    /// Extends `frame` so that the template matches `record`, or `None`.
    ///
    /// Fields of `record` the template does not mention are ignored.
    #[must_use]
    pub fn unify(&self, record: &Record, frame: &Frame) -> Option<Frame> {
        self.fields
            .iter()
            .try_fold(frame.clone(), |f, (name, term)| term.unify(record.get(name), f))
    }

    /// Instantiates the template with the bindings of `frame`.
    pub fn substitute(&self, frame: &Frame, context: &str) -> Result<Record, ExecutionError> {
        let mut out = Record::new();
        for (name, term) in &self.fields {
            match term {
                Term::Literal(v) => {
                    out.insert(name.clone(), v.clone());
                }
                Term::Var(var) => {
                    let value = frame.get(var).ok_or_else(|| ExecutionError::UnboundVariable {
                        var: var.name().to_string(),
                        context: context.to_string(),
                    })?;
                    out.insert(name.clone(), value.clone());
                }
                Term::Optional(var) => {
                    if let Some(value) = frame.get(var).filter(|v| !v.is_null()) {
                        out.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Constraint on the outcome of a matched record.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPattern {
    /// Matches success outcomes whose fields unify with the template.
    Success(Template),
    /// Matches error outcomes; the term is unified with the error value.
    Error(Term),
    /// Matches any outcome.
    Any,
}

impl OutputPattern {
    fn unify(&self, outcome: &Outcome, frame: &Frame) -> Option<Frame> {
        match (self, outcome) {
            (Self::Any, _) => Some(frame.clone()),
            (Self::Success(t), Outcome::Success(fields)) => t.unify(fields, frame),
            (Self::Error(term), Outcome::Error(e)) => term.unify(Some(e), frame.clone()),
            _ => None,
        }
    }

    fn vars(&self) -> Vec<&Var> {
        match self {
            Self::Success(t) => t.vars().collect(),
            Self::Error(term) => term.var().into_iter().collect(),
            Self::Any => Vec::new(),
        }
    }
}

/// One when-pattern: an action plus input and output constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPattern {
    /// Action the record must complete.
    pub action: ActionRef,
    /// Constraints on the action input.
    pub input: Template,
    /// Constraints on the outcome.
    pub output: OutputPattern,
}

impl ActionPattern {
    /// A pattern with an explicit output constraint.
    #[must_use]
    pub const fn new(action: ActionRef, input: Template, output: OutputPattern) -> Self {
        Self { action, input, output }
    }

    /// Matches successful completions only.
    #[must_use]
    pub const fn success(action: ActionRef, input: Template, output: Template) -> Self {
        Self::new(action, input, OutputPattern::Success(output))
    }

    /// Matches error completions, binding the error value.
    #[must_use]
    pub fn error(action: ActionRef, input: Template, error: impl Into<Term>) -> Self {
        Self::new(action, input, OutputPattern::Error(error.into()))
    }

    /// Matches a completion regardless of its outcome.
    #[must_use]
    pub const fn completed(action: ActionRef, input: Template) -> Self {
        Self::new(action, input, OutputPattern::Any)
    }

    /// Unifies the pattern with a record, recording it in the provenance.
    #[must_use]
    pub fn unify(&self, record: &ActionRecord, frame: &Frame) -> Option<Frame> {
        if !record.is(&self.action) {
            return None;
        }
        let frame = self.input.unify(&record.input, frame)?;
        let frame = self.output.unify(&record.outcome, &frame)?;
        Some(frame.with_provenance(record.sequence))
    }

    /// Every variable the pattern can bind.
    #[must_use]
    pub fn vars(&self) -> Vec<&Var> {
        let mut out: Vec<&Var> = self.input.vars().collect();
        out.extend(self.output.vars());
        out
    }
}
