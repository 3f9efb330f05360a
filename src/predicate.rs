//! Declarative filters and per-frame transformations for where-pipelines.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::{SyncError, SyncResult, ValidationError};
use crate::frame::Frame;
use crate::pattern::Var;
use crate::value::Value;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

fn cached_regex(pattern: &str) -> SyncResult<regex::Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| SyncError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| SyncError::internal("regex cache lock poisoned"))?;
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// A value position in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The value bound to a variable.
    Var(Var),
    /// A constant.
    Literal(Value),
    /// A field path inside a record bound to a variable, e.g. `mealDoc.owner`.
    Field(Var, Vec<String>),
}

impl Operand {
    /// `var.a.b` style field access.
    #[must_use]
    pub fn field(var: &Var, path: &str) -> Self {
        Self::Field(var.clone(), path.split('.').map(str::to_string).collect())
    }

    /// The value this operand denotes in `frame`, if any.
    #[must_use]
    pub fn resolve<'a>(&'a self, frame: &'a Frame) -> Option<&'a Value> {
        match self {
            Self::Var(v) => frame.get(v),
            Self::Literal(v) => Some(v),
            Self::Field(v, path) => frame.get(v)?.lookup(path),
        }
    }
}

impl From<&Var> for Operand {
    fn from(v: &Var) -> Self {
        Self::Var(v.clone())
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Self::Literal(Value::from(v))
    }
}

/// A side-effect-free condition over one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// The variable is bound, even to `Null`.
    Bound(Var),
    /// The variable is unbound or `Null`.
    Unbound(Var),
    /// Both sides resolve and are equal.
    Eq(Operand, Operand),
    /// Negation of `Eq`: true when either side does not resolve.
    Ne(Operand, Operand),
    /// The operand resolves to a string matching the regex.
    Matches(Operand, String),
    /// Negation.
    Not(Box<Predicate>),
    /// Every predicate holds; true when empty.
    All(Vec<Predicate>),
    /// Some predicate holds; false when empty.
    Any(Vec<Predicate>),
}

impl Predicate {
    /// `var` is bound.
    #[must_use]
    pub fn bound(var: &Var) -> Self {
        Self::Bound(var.clone())
    }

    /// `var` is unbound or `Null`.
    #[must_use]
    pub fn unbound(var: &Var) -> Self {
        Self::Unbound(var.clone())
    }

    /// `lhs == rhs`.
    #[must_use]
    pub fn eq(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Self::Eq(lhs.into(), rhs.into())
    }

    /// `lhs != rhs`.
    #[must_use]
    pub fn ne(lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Self {
        Self::Ne(lhs.into(), rhs.into())
    }

    /// Regex match; the pattern is compiled on first use.
    #[must_use]
    pub fn matches(operand: impl Into<Operand>, pattern: impl Into<String>) -> Self {
        Self::Matches(operand.into(), pattern.into())
    }

    /// Negates `inner`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Evaluates against one frame. Fails only on an invalid regex.
    pub fn evaluate(&self, frame: &Frame) -> SyncResult<bool> {
        Ok(match self {
            Self::Bound(v) => frame.get(v).is_some_and(|x| !x.is_null()),
            Self::Unbound(v) => frame.get(v).map_or(true, Value::is_null),
            Self::Eq(a, b) => matches!((a.resolve(frame), b.resolve(frame)), (Some(x), Some(y)) if x == y),
            Self::Ne(a, b) => !matches!((a.resolve(frame), b.resolve(frame)), (Some(x), Some(y)) if x == y),
            Self::Matches(op, pattern) => match op.resolve(frame).and_then(Value::as_str) {
                Some(s) => cached_regex(pattern)?.is_match(s),
                None => false,
            },
            Self::Not(inner) => !inner.evaluate(frame)?,
            Self::All(items) => {
                for p in items {
                    if !p.evaluate(frame)? {
                        return Ok(false);
                    }
                }
                true
            }
            Self::Any(items) => {
                for p in items {
                    if p.evaluate(frame)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    /// Compiles every regex up front so a bad pattern fails at rule build
    /// time rather than on first use.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Matches(_, pattern) => regex::Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| ValidationError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }),
            Self::Not(inner) => inner.validate(),
            Self::All(items) | Self::Any(items) => items.iter().try_for_each(Self::validate),
            Self::Bound(_) | Self::Unbound(_) | Self::Eq(..) | Self::Ne(..) => Ok(()),
        }
    }
}

/// A pure per-frame transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMap {
    /// Binds `var` to a literal, replacing any binding.
    Assign(Var, Value),
    /// Binds `var` only if it is unbound or `Null`.
    Default(Var, Value),
    /// Binds `to` to the value of `from`; frames where `from` does not
    /// resolve pass through unchanged.
    Copy {
        /// Source operand.
        from: Operand,
        /// Variable to bind.
        to: Var,
    },
    /// Binds `target` to the first non-null source; frames with none are
    /// dropped.
    Coalesce {
        /// Candidates, in priority order.
        sources: Vec<Var>,
        /// Variable to bind.
        target: Var,
    },
}

impl FrameMap {
    /// Binds `var` to `value`, overwriting.
    #[must_use]
    pub fn assign(var: &Var, value: impl Into<Value>) -> Self {
        Self::Assign(var.clone(), value.into())
    }

    /// Binds `var` to `value` when it is unbound or `Null`.
    #[must_use]
    pub fn default(var: &Var, value: impl Into<Value>) -> Self {
        Self::Default(var.clone(), value.into())
    }

    /// Copies the value of `from` into `to` when it resolves.
    #[must_use]
    pub fn copy(from: impl Into<Operand>, to: &Var) -> Self {
        Self::Copy {
            from: from.into(),
            to: to.clone(),
        }
    }

    /// Binds `target` to the first non-null source.
    #[must_use]
    pub fn coalesce(sources: &[&Var], target: &Var) -> Self {
        Self::Coalesce {
            sources: sources.iter().map(|v| (*v).clone()).collect(),
            target: target.clone(),
        }
    }

    /// The variable this map binds.
    #[must_use]
    pub const fn target(&self) -> &Var {
        match self {
            Self::Assign(v, _) | Self::Default(v, _) => v,
            Self::Copy { to, .. } => to,
            Self::Coalesce { target, .. } => target,
        }
    }

    /// Applies the map; `None` drops the frame.
    #[must_use]
    pub fn apply(&self, frame: Frame) -> Option<Frame> {
        match self {
            Self::Assign(var, value) => Some(frame.with(var, value.clone())),
            Self::Default(var, value) => {
                if frame.get(var).is_some_and(|v| !v.is_null()) {
                    Some(frame)
                } else {
                    Some(frame.with(var, value.clone()))
                }
            }
            Self::Copy { from, to } => match from.resolve(&frame).cloned() {
                Some(value) => Some(frame.with(to, value)),
                None => Some(frame),
            },
            Self::Coalesce { sources, target } => {
                let value = sources
                    .iter()
                    .find_map(|v| frame.get(v).filter(|x| !x.is_null()))
                    .cloned()?;
                Some(frame.with(target, value))
            }
        }
    }
}
