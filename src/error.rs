//! Error types for conceptsync.
//!
//! All errors are strongly typed using thiserror. Concept-reported failures
//! are *not* errors at this level: they travel through the action log as
//! `Outcome::Error` values and are matched by ordinary rules. The types here
//! cover malformed rule definitions, engine-internal faults and storage
//! problems of the action log.

use thiserror::Error;

use crate::action::Sequence;

/// Validation errors raised while building rules, requests or configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required text field is blank.
    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        /// Field name.
        field: String,
    },

    /// A required field is absent.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// Two rules share a name.
    #[error("Rule '{name}' is declared more than once")]
    DuplicateRule {
        /// Duplicated name.
        name: String,
    },

    /// Two concepts share a name.
    #[error("Concept '{name}' is registered more than once")]
    DuplicateConcept {
        /// Duplicated name.
        name: String,
    },

    /// A then-template uses a variable nothing binds.
    #[error("Rule '{rule}' dispatches variable '{var}' that no when-pattern or where-step binds")]
    UnboundThenVariable {
        /// Rule name.
        rule: String,
        /// Variable name.
        var: String,
    },

    /// A `Matches` pattern does not compile.
    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex {
        /// The pattern as written.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Text that is not `Concept.action`.
    #[error("Malformed action reference '{reference}': expected Concept.action")]
    MalformedActionRef {
        /// The text as given.
        reference: String,
    },

    /// An inbound path that cannot be routed.
    #[error("Malformed request path '{path}': {reason}")]
    MalformedPath {
        /// The path as given.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration failed to parse or validate.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Why it was rejected.
        reason: String,
    },
}

/// Execution errors raised while a reaction is running.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No concept is registered under the name.
    #[error("Concept not registered: {concept}")]
    UnknownConcept {
        /// Concept name.
        concept: String,
    },

    /// The concept does not implement the action.
    #[error("Concept '{concept}' has no action '{action}'")]
    UnknownAction {
        /// Concept name.
        concept: String,
        /// Action name.
        action: String,
    },

    /// The concept does not implement the query.
    #[error("Concept '{concept}' has no query '{query}'")]
    UnknownQuery {
        /// Concept name.
        concept: String,
        /// Query name.
        query: String,
    },

    /// Substitution met an unbound required variable.
    #[error("Variable '{var}' is unbound while instantiating {context}")]
    UnboundVariable {
        /// Variable name.
        var: String,
        /// What was being instantiated.
        context: String,
    },

    /// A where-clause query returned an error.
    #[error("Query {query} failed: {message}")]
    QueryFailed {
        /// Query name.
        query: String,
        /// Error text.
        message: String,
    },

    /// A rule firing failed.
    #[error("Rule '{rule}' failed on record {trigger}: {message}")]
    RuleFailed {
        /// Rule name.
        rule: String,
        /// Record being processed.
        trigger: Sequence,
        /// Error text.
        message: String,
    },

    /// A reaction hit `max_firings` or `max_records`.
    #[error("Reaction exceeded {limit_type} limit of {max_value}")]
    LimitExceeded {
        /// `firings` or `records`.
        limit_type: String,
        /// The configured limit.
        max_value: usize,
    },

    /// The runtime queue rejected a request.
    #[error("Request queue is full (capacity {capacity})")]
    Overloaded {
        /// Queue capacity.
        capacity: usize,
    },

    /// A runtime channel closed.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// The path as given.
        path: String,
    },

    /// Waiting on a reaction timed out.
    #[error("Reaction did not finish within {duration_ms}ms")]
    Timeout {
        /// Timeout in milliseconds.
        duration_ms: u64,
    },

    /// A runtime worker thread could not start.
    #[error("Failed to start worker: {reason}")]
    WorkerSpawn {
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors of the action log backends.
#[derive(Debug, Error)]
pub enum LogError {
    /// Record not found.
    #[error("Action record not found: {0}")]
    NotFound(Sequence),

    /// Backend error (poisoned lock, inconsistent index).
    #[error("Action log backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Checksum or framing mismatch in a persisted log.
    #[error("Corrupt log entry after sequence {after}: {reason}")]
    Corrupt {
        /// Last record that decoded cleanly.
        after: Sequence,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Top-level error type for conceptsync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid rule, request or configuration.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Failure while running a reaction.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Action log failure.
    #[error("Action log error: {0}")]
    Log(#[from] LogError),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Error text.
        message: String,
    },
}

impl SyncError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an action log error.
    #[must_use]
    pub const fn is_log(&self) -> bool {
        matches!(self, Self::Log(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::Overloaded { .. } | ExecutionError::Timeout { .. }),
            Self::Log(e) => matches!(e, LogError::Io(_)),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for conceptsync operations.
pub type SyncResult<T> = Result<T, SyncError>;
