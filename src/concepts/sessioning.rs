use std::collections::HashMap;
use std::sync::RwLock;

use crate::action::Outcome;
use crate::concept::{settle, ActionFailure, ActionResult, Args, Concept};
use crate::error::SyncResult;
use crate::value::{Record, Value};

use super::{poisoned, unknown_action, unknown_query, IdSource};

const NAME: &str = "Sessioning";

/// Maps session tokens to users.
#[derive(Debug, Default)]
pub struct Sessioning {
    ids: IdSource,
    sessions: RwLock<HashMap<String, String>>,
}

impl Sessioning {
    /// No sessions; random session ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints session ids from `ids`.
    #[must_use]
    pub fn with_ids(ids: IdSource) -> Self {
        Self {
            ids,
            sessions: RwLock::default(),
        }
    }

    fn start(&self, args: Args<'_>) -> ActionResult {
        let user = args.str("user")?.to_string();
        let session = self.ids.next_id();
        self.sessions
            .write()
            .map_err(|_| poisoned(NAME))?
            .insert(session.clone(), user);
        Ok(Record::from([("session".to_string(), Value::String(session))]))
    }

    fn end(&self, args: Args<'_>) -> ActionResult {
        let session = args.str("session")?;
        match self.sessions.write().map_err(|_| poisoned(NAME))?.remove(session) {
            Some(_) => Ok(Record::new()),
            None => Err(ActionFailure::refused(format!("Session '{session}' not found."))),
        }
    }

    fn get_user(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let session = args.str("session")?;
        let sessions = self.sessions.read().map_err(|_| poisoned(NAME))?;
        Ok(sessions
            .get(session)
            .map(|user| Record::from([("user".to_string(), Value::from(user.as_str()))]))
            .into_iter()
            .collect())
    }
}

impl Concept for Sessioning {
    fn name(&self) -> &str {
        NAME
    }

    fn perform(&self, action: &str, input: &Record) -> SyncResult<Outcome> {
        let args = Args::new(input);
        match action {
            "start" => settle(self.start(args)),
            "end" => settle(self.end(args)),
            other => Err(unknown_action(NAME, other)),
        }
    }

    fn query(&self, query: &str, input: &Record) -> SyncResult<Vec<Record>> {
        match query {
            // An absent or malformed session simply has no user.
            "_getUser" => match self.get_user(Args::new(input)) {
                Ok(rows) => Ok(rows),
                Err(ActionFailure::Refused(_)) => Ok(Vec::new()),
                Err(ActionFailure::Fault(e)) => Err(e),
            },
            other => Err(unknown_query(NAME, other)),
        }
    }
}
