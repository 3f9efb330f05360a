//! The synchronization engine.
//!
//! [`SyncEngine`] owns the action log, the concept registry and the rule set,
//! and turns each [`InboundRequest`] into exactly one [`Response`] by running
//! the fixpoint loop in [`reaction`]. The engine is cheap to clone and safe to
//! share; independent requests may be handled concurrently (see
//! [`runtime::SyncRuntime`]).

pub mod passthrough;
pub mod reaction;
pub mod request;

/// Worker pool handling requests concurrently.
pub mod runtime;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::Outcome;
use crate::concept::ConceptRegistry;
use crate::error::{SyncResult, ValidationError};
use crate::log::{ActionLog, InMemoryActionLog};
use crate::matcher::JoinScope;
use crate::rule::RuleSet;
use crate::value::Value;

pub use passthrough::PassthroughConfig;
pub use reaction::{Reaction, RuleFault};
pub use request::{request_action, respond_action, InboundRequest, RequestId, Response, ResponseOrigin};

use passthrough::{strip_base_path, PassthroughRoutes};
use reaction::Reactor;

/// Default message of the response given when no rule answered.
pub const DEFAULT_UNROUTED_ERROR: &str = "No synchronization responded to this request.";

/// `[engine]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rule evaluations allowed per reaction.
    pub max_firings: usize,
    /// Records a reaction may append before it is stopped.
    pub max_records: usize,
    /// Which records earlier when-patterns may join against.
    pub join_scope: JoinScope,
    /// Prefix stripped from inbound paths, e.g. `/api`.
    pub base_path: Option<String>,
    /// Error message of the default response.
    pub unrouted_error: String,
    /// Routes answered without running rules.
    pub passthrough: PassthroughConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_firings: 10_000,
            max_records: 1_000,
            join_scope: JoinScope::Flow,
            base_path: None,
            unrouted_error: DEFAULT_UNROUTED_ERROR.to_string(),
            passthrough: PassthroughConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks limits and passthrough routes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_firings == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "engine.max_firings must be positive".to_string(),
            });
        }
        if self.max_records < 2 {
            return Err(ValidationError::InvalidConfig {
                reason: "engine.max_records must be at least 2".to_string(),
            });
        }
        if let Some(base) = &self.base_path {
            if !base.starts_with('/') {
                return Err(ValidationError::MalformedPath {
                    path: base.clone(),
                    reason: "base_path must start with '/'".to_string(),
                });
            }
        }
        PassthroughRoutes::from_config(&self.passthrough).map(|_| ())
    }
}

/// Handles inbound requests by synchronizing concepts through rules.
#[derive(Clone)]
pub struct SyncEngine {
    log: Arc<dyn ActionLog>,
    concepts: Arc<ConceptRegistry>,
    rules: Arc<RuleSet>,
    config: Arc<EngineConfig>,
    passthrough: Arc<PassthroughRoutes>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("concepts", &self.concepts)
            .field("rules", &self.rules.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine with the default configuration and an in-memory log.
    #[must_use]
    pub fn new(concepts: ConceptRegistry, rules: RuleSet) -> Self {
        Self {
            log: Arc::new(InMemoryActionLog::new()),
            concepts: Arc::new(concepts),
            rules: Arc::new(rules),
            config: Arc::new(EngineConfig::default()),
            passthrough: Arc::new(PassthroughRoutes::default()),
        }
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(concepts: ConceptRegistry, rules: RuleSet, config: EngineConfig) -> SyncResult<Self> {
        config.validate()?;
        let passthrough = PassthroughRoutes::from_config(&config.passthrough)?;
        if !passthrough.is_empty() {
            tracing::info!(routes = passthrough.len(), "passthrough routes enabled");
        }
        Ok(Self {
            passthrough: Arc::new(passthrough),
            config: Arc::new(config),
            ..Self::new(concepts, rules)
        })
    }

    /// Replaces the action log (e.g. with a file-backed one).
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn ActionLog>) -> Self {
        self.log = log;
        self
    }

    /// Handles one request to completion.
    ///
    /// Rule faults are collected in [`Reaction::faults`] and never fail the
    /// call. `Err` is returned only for action log failures, which leave the
    /// request without a recorded response.
    pub fn handle(&self, request: InboundRequest) -> SyncResult<Reaction> {
        let InboundRequest { id, path, params } = request;
        let path = strip_base_path(&path, self.config.base_path.as_deref());
        tracing::debug!(request = %id, path = %path, "handling request");

        let mut input = params;
        input.insert("path".to_string(), Value::from(path.as_str()));

        let reactor = Reactor::new(&*self.log, &self.concepts, &self.config, id);
        match self.passthrough.lookup(&path) {
            Some(action) => reactor.passthrough(input, action),
            None => reactor.run(input, &self.rules),
        }
    }

    /// The last recorded response for `request`, if any, with the origin it
    /// was recorded under.
    pub fn last_response(&self, request: &RequestId) -> SyncResult<Option<Response>> {
        let before = self.log.last_sequence()?.next();
        let matches = |r: &crate::action::ActionRecord| match &r.outcome {
            Outcome::Success(out) => out.get("request").and_then(Value::as_str) == Some(request.as_str()),
            Outcome::Error(_) => false,
        };
        let Some(record) = self.log.latest_matching(&respond_action(), before, &matches)? else {
            return Ok(None);
        };
        let mut payload = record.input.clone();
        payload.remove("request");
        Ok(Some(Response {
            request: request.clone(),
            payload,
            origin: ResponseOrigin::of_record(&record),
        }))
    }

    /// The action log this engine appends to.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn ActionLog> {
        &self.log
    }

    /// Registered concepts.
    #[must_use]
    pub fn concepts(&self) -> &ConceptRegistry {
        &self.concepts
    }

    /// The loaded synchronization rules.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Validated engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
