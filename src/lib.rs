//! # ConceptSync - Declarative Synchronization of Independent Concepts
//!
//! Concepts are self-contained services that never call each other. An
//! application is assembled by synchronization rules: "when these actions
//! have happened, where this state holds, then perform that action".
//! ConceptSync records every action invocation and completion in an
//! append-only action log and runs the rules to a fixpoint for each inbound
//! request, producing exactly one response.
//!
//! ## Core Pieces
//!
//! - **Action log**: ordered, flow-scoped history of [`ActionRecord`]s
//! - **Pattern matcher**: joins a rule's `when` patterns against the log
//! - **Frame algebra**: `where` pipelines of queries, filters and collections
//! - **Rule executor**: instantiates `then` templates and dispatches them
//! - **Engine**: the per-request fixpoint loop with consume-once semantics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conceptsync::engine::{InboundRequest, SyncEngine};
//! use conceptsync::{concepts, syncs};
//!
//! let engine = SyncEngine::new(concepts::registry()?, syncs::all()?);
//! let reaction = engine.handle(
//!     InboundRequest::new("/MealLog/list").param("session", "s-1"),
//! )?;
//! println!("{}", reaction.response.to_json());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod action;
pub mod error;
pub mod value;

// Storage
pub mod log;

// Rule language
pub mod frame;
pub mod pattern;
pub mod predicate;
pub mod rule;

// Execution
pub mod concept;
pub mod executor;
pub mod matcher;

pub mod engine;

pub mod config;

// Reference application
pub mod concepts;
pub mod syncs;

// Re-export primary types at crate root for convenience
pub use action::{ActionRecord, ActionRef, Cause, Completion, FlowId, Outcome, Sequence};
pub use concept::{Concept, ConceptRegistry};
pub use config::AppConfig;
pub use engine::{EngineConfig, InboundRequest, Reaction, RequestId, Response, ResponseOrigin, SyncEngine};
pub use error::{ExecutionError, LogError, SyncError, SyncResult, ValidationError};
pub use frame::{Frame, Frames};
pub use log::{ActionLog, InMemoryActionLog};
pub use matcher::JoinScope;
pub use pattern::{vars, ActionPattern, Template, Term, Var};
pub use predicate::{FrameMap, Operand, Predicate};
pub use rule::{Pipeline, RuleId, RuleSet, SyncRule};
pub use value::{Record, Value};
