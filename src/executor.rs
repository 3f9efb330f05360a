//! Rule execution: refine matched frames, instantiate `then` templates,
//! dispatch.
//!
//! All invocations of one firing are computed before the first one is
//! dispatched, so a failing `where` step or substitution dispatches nothing.

use std::sync::Arc;

use crate::action::{ActionRecord, ActionRef, Cause};
use crate::concept::QuerySource;
use crate::error::{ExecutionError, SyncError, SyncResult};
use crate::frame::Frames;
use crate::matcher::Matcher;
use crate::rule::SyncRule;
use crate::value::Record;

/// A concrete action invocation produced by a rule firing.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Action to perform.
    pub action: ActionRef,
    /// Substituted then-template.
    pub input: Record,
    /// The firing that produced it.
    pub cause: Cause,
}

/// Where invocations go. Implemented by the reaction loop, which performs
/// the action and appends its completion.
pub trait Dispatch {
    /// Performs one invocation. `None` means the invocation was absorbed
    /// without producing a record (a suppressed duplicate response).
    fn dispatch(&mut self, invocation: Invocation) -> SyncResult<Option<Arc<ActionRecord>>>;
}

/// Executes rules against trigger records.
#[derive(Clone, Copy)]
pub struct RuleExecutor<'a> {
    matcher: Matcher<'a>,
    source: &'a dyn QuerySource,
}

impl<'a> RuleExecutor<'a> {
    /// Executor joining through `matcher` and querying `source`.
    #[must_use]
    pub fn new(matcher: Matcher<'a>, source: &'a dyn QuerySource) -> Self {
        Self { matcher, source }
    }

    /// Matches, refines and dispatches `rule` for `trigger`, returning the
    /// records the dispatches appended.
    ///
    /// A failure while refining or instantiating is reported as
    /// [`ExecutionError::RuleFailed`] and dispatches nothing. A failure while
    /// dispatching is returned as is; invocations dispatched before it stand.
    pub fn execute(
        &self,
        rule: &SyncRule,
        trigger: &ActionRecord,
        dispatch: &mut dyn Dispatch,
    ) -> SyncResult<Vec<Arc<ActionRecord>>> {
        let frames = self.matcher.match_rule(rule, trigger)?;
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let plan = self.plan(rule, trigger, frames)?;

        let mut dispatched = Vec::with_capacity(plan.len());
        for invocation in plan {
            tracing::debug!(
                rule = rule.name(),
                trigger = %trigger.sequence,
                action = %invocation.action,
                "dispatching"
            );
            if let Some(record) = dispatch.dispatch(invocation)? {
                dispatched.push(record);
            }
        }
        Ok(dispatched)
    }

    /// Runs the where-pipeline and instantiates every `then` template:
    /// frame order first, declaration order within a frame.
    pub fn plan(&self, rule: &SyncRule, trigger: &ActionRecord, frames: Frames) -> SyncResult<Vec<Invocation>> {
        let failed = |e: SyncError| -> SyncError {
            ExecutionError::RuleFailed {
                rule: rule.name().to_string(),
                trigger: trigger.sequence,
                message: e.to_string(),
            }
            .into()
        };

        let refined = rule.pipeline().run(frames, self.source).map_err(failed)?;
        let cause = Cause {
            rule: rule.name().to_string(),
            trigger: trigger.sequence,
        };

        let mut plan = Vec::with_capacity(refined.len() * rule.then().len());
        for frame in &refined {
            for then in rule.then() {
                let input = then
                    .input
                    .substitute(frame, &then.action.to_string())
                    .map_err(|e| failed(e.into()))?;
                plan.push(Invocation {
                    action: then.action.clone(),
                    input,
                    cause: cause.clone(),
                });
            }
        }
        Ok(plan)
    }
}
