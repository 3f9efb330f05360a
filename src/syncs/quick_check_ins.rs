use crate::action::ActionRef;
use crate::error::ValidationError;
use crate::pattern::{vars, ActionPattern, Template, Var};
use crate::predicate::FrameMap;
use crate::rule::{Pipeline, SyncRule};

use super::{answer, auth_failure, error_response, on_request, session_user};

fn check_ins(action: &str) -> ActionRef {
    ActionRef::new("QuickCheckIns", action)
}

/// One session-guarded endpoint `/QuickCheckIns/{action}`.
struct Endpoint<'a> {
    label: &'a str,
    action: &'a str,
    /// Request fields copied into the action input.
    required: &'a [&'a str],
    optional: &'a [&'a str],
    /// Whether the session's user is passed on as `owner`.
    owned: bool,
    /// Success payload: the named output field, or `{success: true}`.
    returns: Option<&'a str>,
}

impl Endpoint<'_> {
    fn rules(&self) -> Result<Vec<SyncRule>, ValidationError> {
        let path = format!("/QuickCheckIns/{}", self.action);
        let [session, user] = vars(["session", "user"]);

        let mut request_fields = Template::of(&[&session]);
        let mut action_input = Template::new();
        if self.owned {
            action_input = action_input.field("owner", &user);
        }
        for name in self.required {
            let var = Var::new(name);
            request_fields = request_fields.field(*name, &var);
            action_input = action_input.field(*name, &var);
        }
        for name in self.optional {
            let var = Var::new(name);
            request_fields = request_fields.opt(*name, &var);
            action_input = action_input.opt(*name, &var);
        }

        let (output, payload) = match self.returns {
            Some(field) => {
                let var = Var::new(field);
                (Template::of(&[&var]), Template::of(&[&var]))
            }
            None => (Template::new(), Template::new().lit("success", true)),
        };
        let (respond, payload) = answer(payload);

        Ok(vec![
            SyncRule::builder(format!("{}Request", self.label))
                .when(on_request(&path, request_fields))
                .pipeline(session_user(&session, &user))
                .then(check_ins(self.action), action_input)
                .build()?,
            SyncRule::builder(format!("{}ResponseSuccess", self.label))
                .when(on_request(&path, Template::new()))
                .when(ActionPattern::success(check_ins(self.action), Template::new(), output))
                .then(respond, payload)
                .build()?,
            error_response(&format!("{}ResponseError", self.label), &path, check_ins(self.action))?,
            auth_failure(&format!("{}AuthFailure", self.label), &path)?,
        ])
    }
}

const ENDPOINTS: [Endpoint<'static>; 5] = [
    Endpoint {
        label: "RecordCheckIn",
        action: "record",
        required: &["at", "metric", "value"],
        optional: &[],
        owned: true,
        returns: Some("checkIn"),
    },
    Endpoint {
        label: "DefineMetric",
        action: "defineMetric",
        required: &["name"],
        optional: &[],
        owned: false,
        returns: Some("metric"),
    },
    Endpoint {
        label: "EditCheckIn",
        action: "edit",
        required: &["checkIn"],
        optional: &["metric", "value"],
        owned: true,
        returns: None,
    },
    Endpoint {
        label: "DeleteCheckIn",
        action: "delete",
        required: &["checkIn"],
        optional: &[],
        owned: true,
        returns: None,
    },
    Endpoint {
        label: "DeleteMetric",
        action: "deleteMetric",
        required: &["metric"],
        optional: &[],
        owned: false,
        returns: None,
    },
];

/// QuickCheckIns synchronizations.
pub fn rules() -> Result<Vec<SyncRule>, ValidationError> {
    let mut rules = Vec::new();
    for endpoint in &ENDPOINTS {
        rules.extend(endpoint.rules()?);
    }
    rules.push(list_by_owner()?);
    Ok(rules)
}

/// Older clients name the owner under several keys; the first present wins.
fn list_by_owner() -> Result<SyncRule, ValidationError> {
    let [owner, owner_id, user, uid, requester, check_in, all] =
        vars(["owner", "ownerId", "user", "uid", "requester", "checkIn", "checkIns"]);
    let (respond, payload) = answer(Template::of(&[&all]));
    SyncRule::builder("ListCheckInsByOwner")
        .when(on_request(
            "/QuickCheckIns/_listCheckInsByOwner",
            Template::new()
                .opt("owner", &owner)
                .opt("ownerId", &owner_id)
                .opt("user", &user)
                .opt("uid", &uid)
                .opt("requester", &requester),
        ))
        .map(FrameMap::coalesce(&[&owner, &owner_id, &user, &uid, &requester], &owner))
        .aggregate(
            Pipeline::new().query(
                check_ins("_listCheckInsByOwner"),
                Template::of(&[&owner]),
                Template::of(&[&check_in]),
            ),
            &[&check_in],
            &all,
        )
        .then(respond, payload)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::respond_action;

    #[test]
    fn test_every_endpoint_has_four_rules() {
        let rules = rules().unwrap();
        assert_eq!(rules.len(), ENDPOINTS.len() * 4 + 1);
        for label in ["RecordCheckIn", "DefineMetric", "EditCheckIn", "DeleteCheckIn", "DeleteMetric"] {
            for suffix in ["Request", "ResponseSuccess", "ResponseError", "AuthFailure"] {
                let name = format!("{label}{suffix}");
                assert!(rules.iter().any(|r| r.name() == name), "missing {name}");
            }
        }
    }

    #[test]
    fn test_owned_actions_receive_the_session_user() {
        let rules = ENDPOINTS[0].rules().unwrap();
        let then = &rules[0].then()[0];
        assert_eq!(then.action, check_ins("record"));
        let fields: Vec<_> = then.input.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(fields, vec!["owner", "at", "metric", "value"]);

        let define = ENDPOINTS[1].rules().unwrap();
        let fields: Vec<_> = define[0].then()[0].input.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(fields, vec!["name"]);
    }

    #[test]
    fn test_list_by_owner_responds() {
        let rule = list_by_owner().unwrap();
        assert_eq!(rule.then()[0].action, respond_action());
    }
}
