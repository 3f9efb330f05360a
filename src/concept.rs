//! The interface concepts present to the engine.
//!
//! A concept owns its state and exposes named actions (single terminal
//! [`Outcome`]) and side-effect-free queries (zero or more rows). The engine
//! reaches concepts only through a [`ConceptRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::{ActionRef, Outcome};
use crate::error::{ExecutionError, SyncError, SyncResult, ValidationError};
use crate::value::{Record, Value};

/// A self-contained unit of state with actions and queries.
pub trait Concept: Send + Sync {
    /// Name used in action references, e.g. `MealLog`.
    fn name(&self) -> &str;

    /// Runs an action. Business-rule refusals are `Ok(Outcome::Error(..))`;
    /// `Err` is reserved for unknown actions and internal faults.
    fn perform(&self, action: &str, input: &Record) -> SyncResult<Outcome>;

    /// Runs a query. Must not mutate state.
    fn query(&self, query: &str, input: &Record) -> SyncResult<Vec<Record>>;
}

/// Anything that can answer concept queries.
pub trait QuerySource {
    /// Rows returned by `query` for `input`.
    fn query(&self, query: &ActionRef, input: &Record) -> SyncResult<Vec<Record>>;
}

/// Name-indexed set of concepts.
#[derive(Clone, Default)]
pub struct ConceptRegistry {
    concepts: BTreeMap<String, Arc<dyn Concept>>,
}

impl std::fmt::Debug for ConceptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptRegistry")
            .field("concepts", &self.concepts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConceptRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a concept under its own name.
    pub fn register(&mut self, concept: Arc<dyn Concept>) -> Result<(), ValidationError> {
        let name = concept.name().trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "concept.name".to_string(),
            });
        }
        if self.concepts.contains_key(&name) {
            return Err(ValidationError::DuplicateConcept { name });
        }
        self.concepts.insert(name, concept);
        Ok(())
    }

    /// Builder form of [`ConceptRegistry::register`].
    pub fn with(mut self, concept: impl Concept + 'static) -> Result<Self, ValidationError> {
        self.register(Arc::new(concept))?;
        Ok(self)
    }

    /// Looks up a concept by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Concept>> {
        self.concepts.get(name)
    }

    /// Registered concept names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    fn resolve(&self, name: &str) -> SyncResult<&Arc<dyn Concept>> {
        self.concepts.get(name).ok_or_else(|| {
            ExecutionError::UnknownConcept {
                concept: name.to_string(),
            }
            .into()
        })
    }

    /// Runs `action` on its concept.
    pub fn perform(&self, action: &ActionRef, input: &Record) -> SyncResult<Outcome> {
        self.resolve(&action.concept)?.perform(&action.action, input)
    }
}

impl QuerySource for ConceptRegistry {
    fn query(&self, query: &ActionRef, input: &Record) -> SyncResult<Vec<Record>> {
        self.resolve(&query.concept)?.query(&query.action, input)
    }
}

/// Why a concept action did not produce a success record.
#[derive(Debug)]
pub enum ActionFailure {
    /// A business rule refused the action; becomes `Outcome::Error`.
    Refused(String),
    /// Something broke; propagates as a Rust error.
    Fault(SyncError),
}

impl ActionFailure {
    /// A business-rule refusal with `message`.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused(message.into())
    }

    /// Maps a failure inside a query to an error for the caller.
    #[must_use]
    pub fn into_query_error(self, concept: &str, query: &str) -> SyncError {
        match self {
            Self::Refused(message) => ExecutionError::QueryFailed {
                query: format!("{concept}.{query}"),
                message,
            }
            .into(),
            Self::Fault(e) => e,
        }
    }
}

impl From<SyncError> for ActionFailure {
    fn from(e: SyncError) -> Self {
        Self::Fault(e)
    }
}

/// Result of one action method of a concept.
pub type ActionResult = Result<Record, ActionFailure>;

/// Turns an action method's result into the outcome the log records.
pub fn settle(result: ActionResult) -> SyncResult<Outcome> {
    match result {
        Ok(fields) => Ok(Outcome::Success(fields)),
        Err(ActionFailure::Refused(message)) => Ok(Outcome::error(message)),
        Err(ActionFailure::Fault(e)) => Err(e),
    }
}

/// Typed access to an action's input record.
///
/// Absent fields and `Null` are treated alike.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a Record);

impl<'a> Args<'a> {
    /// Wraps an action input.
    #[must_use]
    pub const fn new(input: &'a Record) -> Self {
        Self(input)
    }

    /// The field value; `None` when absent or `Null`.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&'a Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// The field value, refusing when it is missing.
    pub fn required(&self, field: &str) -> Result<&'a Value, ActionFailure> {
        self.value(field)
            .ok_or_else(|| ActionFailure::refused(format!("Missing required field '{field}'.")))
    }

    /// A required string field.
    pub fn str(&self, field: &str) -> Result<&'a str, ActionFailure> {
        let value = self.required(field)?;
        value.as_str().ok_or_else(|| type_mismatch(field, "a string", value))
    }

    /// An optional string field.
    pub fn opt_str(&self, field: &str) -> Result<Option<&'a str>, ActionFailure> {
        self.value(field)
            .map(|v| v.as_str().ok_or_else(|| type_mismatch(field, "a string", v)))
            .transpose()
    }

    /// A required numeric field; integers widen to `f64`.
    pub fn number(&self, field: &str) -> Result<f64, ActionFailure> {
        let value = self.required(field)?;
        value.as_float().ok_or_else(|| type_mismatch(field, "a number", value))
    }

    /// An optional numeric field.
    pub fn opt_number(&self, field: &str) -> Result<Option<f64>, ActionFailure> {
        self.value(field)
            .map(|v| v.as_float().ok_or_else(|| type_mismatch(field, "a number", v)))
            .transpose()
    }

    /// A required list field.
    pub fn list(&self, field: &str) -> Result<&'a [Value], ActionFailure> {
        let value = self.required(field)?;
        value.as_list().ok_or_else(|| type_mismatch(field, "a list", value))
    }

    /// An optional list field.
    pub fn opt_list(&self, field: &str) -> Result<Option<&'a [Value]>, ActionFailure> {
        self.value(field)
            .map(|v| v.as_list().ok_or_else(|| type_mismatch(field, "a list", v)))
            .transpose()
    }

    /// An optional boolean field.
    pub fn opt_bool(&self, field: &str) -> Result<Option<bool>, ActionFailure> {
        self.value(field)
            .map(|v| v.as_bool().ok_or_else(|| type_mismatch(field, "a boolean", v)))
            .transpose()
    }
}

fn type_mismatch(field: &str, expected: &str, got: &Value) -> ActionFailure {
    ActionFailure::refused(format!(
        "Field '{field}' must be {expected}, got {}.",
        got.type_name()
    ))
}
