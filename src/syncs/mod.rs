//! Synchronizations wiring HTTP-style requests to the reference concepts.
//!
//! Every endpoint follows the same shape: a request rule performs the
//! concept action, success and error rules answer once it completes, and
//! session-guarded endpoints carry an auth-failure rule answering when the
//! session has no user.

mod meal_log;
mod quick_check_ins;

use crate::action::ActionRef;
use crate::engine::{request_action, respond_action};
use crate::error::ValidationError;
use crate::pattern::{ActionPattern, Template, Var};
use crate::rule::{Pipeline, RuleSet, SyncRule};

pub use meal_log::rules as meal_log_rules;
pub use quick_check_ins::rules as quick_check_ins_rules;

/// Answer for a session that resolves to no user.
pub const AUTH_ERROR: &str = "Authentication failed: Invalid or expired session.";

/// All reference synchronizations.
pub fn all() -> Result<RuleSet, ValidationError> {
    let mut rules = RuleSet::new();
    rules.extend(meal_log::rules()?)?;
    rules.extend(quick_check_ins::rules()?)?;
    Ok(rules)
}

fn request_var() -> Var {
    Var::new("request")
}

/// `Requesting.request` for `path`, binding `request` to the request id.
fn on_request(path: &str, fields: Template) -> ActionPattern {
    ActionPattern::success(request_action(), fields.lit("path", path), Template::of(&[&request_var()]))
}

/// Payload of a response: `fields` plus the request id.
fn answer(fields: Template) -> (ActionRef, Template) {
    (respond_action(), fields.field("request", &request_var()))
}

/// `Sessioning._getUser {session} -> {user}`.
fn session_user(session: &Var, user: &Var) -> Pipeline {
    Pipeline::new().query(
        ActionRef::new("Sessioning", "_getUser"),
        Template::of(&[session]),
        Template::of(&[user]),
    )
}

/// Answers `{error}` when `action` fails for a request to `path`.
fn error_response(name: &str, path: &str, action: ActionRef) -> Result<SyncRule, ValidationError> {
    let error = Var::new("error");
    let (respond, payload) = answer(Template::of(&[&error]));
    SyncRule::builder(name)
        .when(on_request(path, Template::new()))
        .when(ActionPattern::error(action, Template::new(), &error))
        .then(respond, payload)
        .build()
}

/// Answers [`AUTH_ERROR`] when the request's session resolves to no user.
fn auth_failure(name: &str, path: &str) -> Result<SyncRule, ValidationError> {
    let [session, user] = crate::pattern::vars(["session", "user"]);
    let (respond, payload) = answer(Template::new().lit("error", AUTH_ERROR));
    SyncRule::builder(name)
        .when(on_request(path, Template::of(&[&session])))
        .unless(session_user(&session, &user))
        .then(respond, payload)
        .build()
}
