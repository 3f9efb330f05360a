//! The built-in `Requesting` concept: inbound requests and their responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionRecord, ActionRef};
use crate::error::ValidationError;
use crate::value::{record_to_json, Record, Value};

/// Concept name of the transport boundary.
pub const REQUESTING: &str = "Requesting";
/// Action recorded for every inbound request.
pub const REQUEST: &str = "request";
/// Action carrying the terminal response.
pub const RESPOND: &str = "respond";

/// `Requesting.request`.
#[must_use]
pub fn request_action() -> ActionRef {
    ActionRef::new(REQUESTING, REQUEST)
}

/// `Requesting.respond`.
#[must_use]
pub fn respond_action() -> ActionRef {
    ActionRef::new(REQUESTING, RESPOND)
}

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A request as delivered by the transport: a path plus named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// Correlation id echoed in the response.
    pub id: RequestId,
    /// Route, e.g. `/MealLog/submit`.
    pub path: String,
    /// Request parameters other than `path`.
    pub params: Record,
}

impl InboundRequest {
    /// A request for `path` with a fresh id and no parameters.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            path: path.into(),
            params: Record::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Uses a caller-chosen id instead of a random one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    /// Parses `{"path": "/Concept/action", ...params}`.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ValidationError> {
        let serde_json::Value::Object(map) = json else {
            return Err(ValidationError::MalformedPath {
                path: json.to_string(),
                reason: "request must be a JSON object".to_string(),
            });
        };
        let mut params: Record = map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
        let path = match params.remove("path") {
            Some(Value::String(p)) if !p.trim().is_empty() => p,
            Some(Value::String(_)) => {
                return Err(ValidationError::EmptyField {
                    field: "path".to_string(),
                })
            }
            Some(other) => {
                return Err(ValidationError::MalformedPath {
                    path: other.to_string(),
                    reason: "path must be a string".to_string(),
                })
            }
            None => {
                return Err(ValidationError::MissingField {
                    field: "path".to_string(),
                })
            }
        };
        Ok(Self {
            id: RequestId::new(),
            path,
            params,
        })
    }
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rule", rename_all = "snake_case")]
pub enum ResponseOrigin {
    /// Dispatched by the named rule.
    Rule(String),
    /// Synthesized by the engine (no route, or a limit was hit).
    Default,
    /// Answered by a passthrough route.
    Passthrough,
}

impl ResponseOrigin {
    /// Tag stored in the `origin` output of a `Requesting.respond` record.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Rule(_) => "rule",
            Self::Default => "default",
            Self::Passthrough => "passthrough",
        }
    }

    /// Recovers the origin of a logged `Requesting.respond` record. Rule
    /// names come from the record's cause.
    #[must_use]
    pub fn of_record(record: &ActionRecord) -> Self {
        let tag = record.output_field("origin").and_then(Value::as_str);
        match (tag, &record.cause) {
            (Some("passthrough"), _) => Self::Passthrough,
            (Some("default"), _) | (_, None) => Self::Default,
            (_, Some(cause)) => Self::Rule(cause.rule.clone()),
        }
    }
}

/// The terminal response of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Request being answered.
    pub request: RequestId,
    /// The respond input minus the `request` field.
    pub payload: Record,
    /// How the response was produced.
    pub origin: ResponseOrigin,
}

impl Response {
    /// Whether the payload carries an `error` field.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.payload.contains_key("error")
    }

    /// The `error` field, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.payload.get("error")
    }

    /// A payload field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// `{"request": id, ...payload}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = record_to_json(&self.payload);
        if let serde_json::Value::Object(map) = &mut out {
            map.insert("request".to_string(), serde_json::Value::String(self.request.to_string()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_splits_path_and_params() {
        let req = InboundRequest::from_json(serde_json::json!({
            "path": "/MealLog/submit",
            "owner": "alice",
            "items": ["x"],
        }))
        .unwrap();
        assert_eq!(req.path, "/MealLog/submit");
        assert_eq!(req.params.get("owner"), Some(&Value::from("alice")));
        assert!(!req.params.contains_key("path"));
    }

    #[test]
    fn test_from_json_rejects_bad_shapes() {
        assert!(matches!(
            InboundRequest::from_json(serde_json::json!({"owner": "alice"})),
            Err(ValidationError::MissingField { .. })
        ));
        assert!(matches!(
            InboundRequest::from_json(serde_json::json!({"path": 3})),
            Err(ValidationError::MalformedPath { .. })
        ));
        assert!(matches!(
            InboundRequest::from_json(serde_json::json!({"path": " "})),
            Err(ValidationError::EmptyField { .. })
        ));
        assert!(InboundRequest::from_json(serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_response_json_includes_request() {
        let resp = Response {
            request: RequestId::from("r1"),
            payload: Record::from([("meal".to_string(), Value::from("m1"))]),
            origin: ResponseOrigin::Rule("SubmitMealOwnerResponseSuccess".to_string()),
        };
        assert!(!resp.is_error());
        assert_eq!(resp.to_json(), serde_json::json!({"request": "r1", "meal": "m1"}));
    }

    #[test]
    fn test_builder_params() {
        let req = InboundRequest::new("/MealLog/list").param("session", "s1").with_id("fixed");
        assert_eq!(req.id.as_str(), "fixed");
        assert_eq!(req.params.len(), 1);
    }

    #[test]
    fn test_origin_recovered_from_respond_record() {
        use crate::action::{Cause, Completion, FlowId, Outcome, Sequence};

        let record = |origin: &ResponseOrigin, cause: Option<Cause>| {
            let mut completion = Completion::new(
                FlowId::new(),
                respond_action(),
                Record::new(),
                Outcome::success([("request", "r1"), ("origin", origin.tag())]),
            );
            completion.cause = cause;
            completion.into_record(Sequence::new(2))
        };
        let cause = Cause {
            rule: "ListMeals".to_string(),
            trigger: Sequence::new(1),
        };

        let rule = ResponseOrigin::Rule("ListMeals".to_string());
        assert_eq!(ResponseOrigin::of_record(&record(&rule, Some(cause))), rule);
        let passthrough = ResponseOrigin::Passthrough;
        assert_eq!(ResponseOrigin::of_record(&record(&passthrough, None)), passthrough);
        let default = ResponseOrigin::Default;
        assert_eq!(ResponseOrigin::of_record(&record(&default, None)), default);
    }
}