//! Action completions and the records the action log stores.
//!
//! Every concept action invocation that completes is appended to the log as
//! an [`ActionRecord`]: which action ran, with which input, and the single
//! terminal [`Outcome`]. Records are immutable once appended; their
//! [`Sequence`] is the only ordering guarantee.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::value::{Record, Value};

/// Monotonic position of a record in the action log. The first appended
/// record has sequence 1; [`Sequence::ZERO`] precedes every record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    /// The position before the first record.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The position right after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies the causal flow of records produced while handling one inbound
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Creates a new random flow id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names an action (or query) of a concept, e.g. `MealLog.submit`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionRef {
    /// Concept name, e.g. `MealLog`.
    pub concept: String,
    /// Action or query name within the concept.
    pub action: String,
}

impl ActionRef {
    /// Creates a reference to `concept.action`.
    #[must_use]
    pub fn new(concept: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            action: action.into(),
        }
    }

    /// Queries are named with a leading underscore, e.g. `_getMealById`.
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.action.starts_with('_')
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.concept, self.action)
    }
}

impl FromStr for ActionRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedActionRef {
            reference: s.to_string(),
        };
        let (concept, action) = s.trim().split_once('.').ok_or_else(malformed)?;
        if concept.is_empty() || action.is_empty() || action.contains('.') {
            return Err(malformed());
        }
        Ok(Self::new(concept, action))
    }
}

/// The single terminal result of an action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum Outcome {
    /// Success fields (possibly empty).
    Success(Record),
    /// The concept refused the action; the value is usually a message string.
    Error(Value),
}

impl Outcome {
    /// A success outcome with no fields.
    #[must_use]
    pub fn empty() -> Self {
        Self::Success(Record::new())
    }

    /// A success outcome from field/value pairs.
    pub fn success<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Success(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// An error outcome carrying a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(Value::String(message.into()))
    }

    /// Whether the concept refused the action.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Success fields, or `None` for an error.
    #[must_use]
    pub const fn fields(&self) -> Option<&Record> {
        match self {
            Self::Success(r) => Some(r),
            Self::Error(_) => None,
        }
    }

    /// The error value, or `None` for a success.
    #[must_use]
    pub const fn error_value(&self) -> Option<&Value> {
        match self {
            Self::Success(_) => None,
            Self::Error(e) => Some(e),
        }
    }

    /// The outcome as a flat record: success fields, or `{error}`.
    #[must_use]
    pub fn to_record(&self) -> Record {
        match self {
            Self::Success(r) => r.clone(),
            Self::Error(e) => Record::from([("error".to_string(), e.clone())]),
        }
    }
}

/// Which rule firing produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    /// Name of the rule that dispatched the action.
    pub rule: String,
    /// The record that triggered the firing.
    pub trigger: Sequence,
}

/// A completed action that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Flow of the request that caused the invocation.
    pub flow: FlowId,
    /// The action that ran.
    pub action: ActionRef,
    /// Arguments the action was invoked with.
    pub input: Record,
    /// Terminal result.
    pub outcome: Outcome,
    /// Rule firing that dispatched the action; `None` for engine-issued records.
    pub cause: Option<Cause>,
}

impl Completion {
    /// A completion without a cause.
    #[must_use]
    pub fn new(flow: FlowId, action: ActionRef, input: Record, outcome: Outcome) -> Self {
        Self {
            flow,
            action,
            input,
            outcome,
            cause: None,
        }
    }

    /// Attributes the completion to a rule firing.
    #[must_use]
    pub fn caused_by(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Stamps the completion with its log position.
    #[must_use]
    pub fn into_record(self, sequence: Sequence) -> ActionRecord {
        ActionRecord {
            sequence,
            flow: self.flow,
            action: self.action,
            input: self.input,
            outcome: self.outcome,
            cause: self.cause,
            recorded_at: Utc::now(),
        }
    }
}

/// An immutable entry of the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Position in the log.
    pub sequence: Sequence,
    /// Flow the record belongs to.
    pub flow: FlowId,
    /// The action that ran.
    pub action: ActionRef,
    /// Arguments the action was invoked with.
    pub input: Record,
    /// Terminal result of the invocation.
    pub outcome: Outcome,
    /// Rule firing that dispatched the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Cause>,
    /// Wall-clock time of the append.
    pub recorded_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Looks up an output field; the error value answers to `error`.
    #[must_use]
    pub fn output_field(&self, name: &str) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success(r) => r.get(name),
            Outcome::Error(e) => (name == "error").then_some(e),
        }
    }

    /// Whether this record completes `action`.
    #[must_use]
    pub fn is(&self, action: &ActionRef) -> bool {
        &self.action == action
    }
}
