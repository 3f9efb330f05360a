//! The dispatch/fixpoint loop of one inbound request.
//!
//! Records appended in the request's flow are processed breadth-first in
//! append order. Each (rule, record) pair is evaluated at most once. The loop
//! ends when a response has been produced, when no unprocessed record
//! remains, or when a limit is hit; in the last two cases the engine answers
//! with an error payload itself so every request gets exactly one response.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::action::{ActionRecord, ActionRef, Cause, Completion, FlowId, Outcome, Sequence};
use crate::concept::{ConceptRegistry, QuerySource};
use crate::error::{ExecutionError, SyncError, SyncResult, ValidationError};
use crate::executor::{Dispatch, Invocation, RuleExecutor};
use crate::log::ActionLog;
use crate::matcher::Matcher;
use crate::rule::{RuleId, RuleSet};
use crate::value::{record_to_json, Record, Value};

use super::request::{request_action, respond_action, RequestId, Response, ResponseOrigin, REQUESTING};
use super::EngineConfig;

/// An engine-internal fault observed during a reaction. Faults abort only
/// the firing that raised them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFault {
    /// Rule name (or the action, for passthrough calls).
    pub rule: String,
    /// Record being processed when the fault happened.
    pub trigger: Sequence,
    /// Display text of the error.
    pub message: String,
}

/// Everything that happened while handling one request.
#[derive(Debug, Clone)]
pub struct Reaction {
    /// Request the reaction answered.
    pub request: RequestId,
    /// Flow the reaction's records were appended under.
    pub flow: FlowId,
    /// The single response produced for the request.
    pub response: Response,
    /// Records appended for this request, in sequence order.
    pub records: Vec<Arc<ActionRecord>>,
    /// Faults isolated while the loop kept running.
    pub faults: Vec<RuleFault>,
    /// Rule evaluations performed.
    pub firings: usize,
    /// Respond invocations dropped because a response already existed.
    pub suppressed_responses: usize,
}

impl Reaction {
    /// Whether the response carries an `error` field.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }

    /// Records of one action, in sequence order.
    pub fn records_of<'a>(&'a self, action: &'a ActionRef) -> impl Iterator<Item = &'a Arc<ActionRecord>> + 'a {
        self.records.iter().filter(move |r| r.is(action))
    }

    /// Fingerprint of the appended records: action, input and outcome of
    /// each, in order. Sequences, flow ids and timestamps are left out, so two
    /// runs that dispatched the same things produce the same digest.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for record in &self.records {
            hasher.update(record.action.to_string().as_bytes());
            hasher.update(&[0]);
            hasher.update(record_to_json(&record.input).to_string().as_bytes());
            hasher.update(&[0, u8::from(record.outcome.is_error())]);
            hasher.update(record_to_json(&record.outcome.to_record()).to_string().as_bytes());
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Mutable state of a running reaction. Implements [`Dispatch`] so the rule
/// executor sends its invocations here.
pub(crate) struct Reactor<'e> {
    log: &'e dyn ActionLog,
    concepts: &'e ConceptRegistry,
    config: &'e EngineConfig,
    request: RequestId,
    flow: FlowId,
    queue: VecDeque<Arc<ActionRecord>>,
    records: Vec<Arc<ActionRecord>>,
    response: Option<Response>,
    faults: Vec<RuleFault>,
    firings: usize,
    suppressed: usize,
}

impl<'e> Reactor<'e> {
    pub(crate) fn new(
        log: &'e dyn ActionLog,
        concepts: &'e ConceptRegistry,
        config: &'e EngineConfig,
        request: RequestId,
    ) -> Self {
        Self {
            log,
            concepts,
            config,
            request,
            flow: FlowId::new(),
            queue: VecDeque::new(),
            records: Vec::new(),
            response: None,
            faults: Vec::new(),
            firings: 0,
            suppressed: 0,
        }
    }

    /// Runs synchronization rules to a fixpoint for a request whose
    /// `Requesting.request` input is `input`.
    pub(crate) fn run(mut self, input: Record, rules: &RuleSet) -> SyncResult<Reaction> {
        self.open(input)?;

        let executor = RuleExecutor::new(Matcher::new(self.log, self.config.join_scope), self.concepts);
        let mut consumed: HashSet<(RuleId, Sequence)> = HashSet::new();
        let mut halted: Option<String> = None;

        'records: while let Some(record) = self.queue.pop_front() {
            for rule in rules.triggered_by(&record.action) {
                if !consumed.insert((rule.id(), record.sequence)) {
                    continue;
                }
                if self.firings >= self.config.max_firings {
                    let err = ExecutionError::LimitExceeded {
                        limit_type: "firings".to_string(),
                        max_value: self.config.max_firings,
                    };
                    self.fault(rule.name(), record.sequence, &err.to_string());
                    halted = Some(err.to_string());
                    break 'records;
                }
                self.firings += 1;

                match executor.execute(rule, &record, &mut self) {
                    Ok(dispatched) => {
                        if !dispatched.is_empty() {
                            tracing::debug!(
                                rule = rule.name(),
                                trigger = %record.sequence,
                                dispatched = dispatched.len(),
                                "rule fired"
                            );
                        }
                    }
                    Err(SyncError::Execution(err @ ExecutionError::LimitExceeded { .. })) => {
                        self.fault(rule.name(), record.sequence, &err.to_string());
                        halted = Some(err.to_string());
                        break 'records;
                    }
                    Err(err @ SyncError::Log(_)) => return Err(err),
                    Err(err) => self.fault(rule.name(), record.sequence, &err.to_string()),
                }

                if self.response.is_some() {
                    break 'records;
                }
            }
        }

        if self.response.is_none() {
            let message = halted.unwrap_or_else(|| self.config.unrouted_error.clone());
            let payload = Record::from([("error".to_string(), Value::String(message))]);
            self.respond_with(payload, ResponseOrigin::Default, None)?;
        }
        self.finish()
    }

    /// Invokes `action` directly and answers with its result.
    pub(crate) fn passthrough(mut self, input: Record, action: &ActionRef) -> SyncResult<Reaction> {
        let trigger = self.open(input.clone())?.sequence;
        let mut args = input;
        args.remove("path");

        let payload = if action.is_query() {
            match self.concepts.query(action, &args) {
                Ok(rows) => Record::from([(
                    "results".to_string(),
                    Value::List(rows.into_iter().map(Value::Record).collect()),
                )]),
                Err(err) => self.failed_call(action, trigger, &err),
            }
        } else {
            match self.concepts.perform(action, &args) {
                Ok(outcome) => {
                    let payload = outcome.to_record();
                    self.append(Completion::new(self.flow, action.clone(), args, outcome), false)?;
                    payload
                }
                Err(err @ SyncError::Log(_)) => return Err(err),
                Err(err) => self.failed_call(action, trigger, &err),
            }
        };

        self.respond_with(payload, ResponseOrigin::Passthrough, None)?;
        self.finish()
    }

    /// Appends the `Requesting.request` record that starts the flow.
    fn open(&mut self, input: Record) -> SyncResult<Arc<ActionRecord>> {
        let outcome = Outcome::success([("request", self.request.as_str())]);
        self.append(Completion::new(self.flow, request_action(), input, outcome), true)
    }

    /// Appends a completion. Records that may trigger rules count against
    /// `max_records` and are queued.
    fn append(&mut self, completion: Completion, enqueue: bool) -> SyncResult<Arc<ActionRecord>> {
        if enqueue && self.records.len() >= self.config.max_records {
            return Err(ExecutionError::LimitExceeded {
                limit_type: "records".to_string(),
                max_value: self.config.max_records,
            }
            .into());
        }
        let record = self.log.append(completion)?;
        self.records.push(Arc::clone(&record));
        if enqueue {
            self.queue.push_back(Arc::clone(&record));
        }
        Ok(record)
    }

    fn respond_with(&mut self, payload: Record, origin: ResponseOrigin, cause: Option<Cause>) -> SyncResult<Arc<ActionRecord>> {
        let mut input = payload.clone();
        input.insert("request".to_string(), Value::from(self.request.as_str()));
        let mut completion = Completion::new(
            self.flow,
            respond_action(),
            input,
            Outcome::success([("request", self.request.as_str()), ("origin", origin.tag())]),
        );
        completion.cause = cause;
        let record = self.append(completion, false)?;
        self.response = Some(Response {
            request: self.request.clone(),
            payload,
            origin,
        });
        Ok(record)
    }

    fn respond(&mut self, invocation: Invocation) -> SyncResult<Option<Arc<ActionRecord>>> {
        let mut payload = invocation.input;
        let target = match payload.remove("request") {
            Some(Value::String(id)) => id,
            Some(_) | None => {
                return Err(ValidationError::MissingField {
                    field: "request".to_string(),
                }
                .into())
            }
        };

        if self.response.is_some() || target != self.request.as_str() {
            self.suppressed += 1;
            tracing::warn!(
                rule = %invocation.cause.rule,
                trigger = %invocation.cause.trigger,
                request = %target,
                "duplicate response suppressed"
            );
            return Ok(None);
        }

        let origin = ResponseOrigin::Rule(invocation.cause.rule.clone());
        self.respond_with(payload, origin, Some(invocation.cause)).map(Some)
    }

    fn failed_call(&mut self, action: &ActionRef, trigger: Sequence, err: &SyncError) -> Record {
        let message = err.to_string();
        self.fault(&action.to_string(), trigger, &message);
        Record::from([("error".to_string(), Value::String(message))])
    }

    fn fault(&mut self, rule: &str, trigger: Sequence, message: &str) {
        tracing::warn!(rule, trigger = %trigger, request = %self.request, error = message, "rule faulted");
        self.faults.push(RuleFault {
            rule: rule.to_string(),
            trigger,
            message: message.to_string(),
        });
    }

    fn finish(mut self) -> SyncResult<Reaction> {
        let response = self
            .response
            .take()
            .ok_or_else(|| SyncError::internal("reaction finished without a response"))?;
        tracing::debug!(
            request = %self.request,
            flow = %self.flow,
            records = self.records.len(),
            firings = self.firings,
            faults = self.faults.len(),
            error = response.is_error(),
            "reaction complete"
        );
        Ok(Reaction {
            request: self.request,
            flow: self.flow,
            response,
            records: self.records,
            faults: self.faults,
            firings: self.firings,
            suppressed_responses: self.suppressed,
        })
    }
}

impl Dispatch for Reactor<'_> {
    fn dispatch(&mut self, invocation: Invocation) -> SyncResult<Option<Arc<ActionRecord>>> {
        if invocation.action == respond_action() {
            return self.respond(invocation);
        }
        if invocation.action.concept == REQUESTING {
            return Err(ExecutionError::UnknownAction {
                concept: REQUESTING.to_string(),
                action: invocation.action.action,
            }
            .into());
        }

        let outcome = self.concepts.perform(&invocation.action, &invocation.input)?;
        let completion =
            Completion::new(self.flow, invocation.action, invocation.input, outcome).caused_by(invocation.cause);
        self.append(completion, true).map(Some)
    }
}
