//! End-to-end flows through the reference concepts and synchronizations.

use conceptsync::engine::passthrough::PassthroughConfig;
use conceptsync::engine::{InboundRequest, Reaction, Response, ResponseOrigin, SyncEngine};
use conceptsync::syncs::AUTH_ERROR;
use conceptsync::{concepts, syncs, ActionRef, EngineConfig, Value};

fn engine() -> SyncEngine {
    let config = EngineConfig {
        passthrough: PassthroughConfig {
            routes: vec!["/Sessioning/start".to_string()],
        },
        ..EngineConfig::default()
    };
    SyncEngine::with_config(concepts::deterministic_registry().unwrap(), syncs::all().unwrap(), config).unwrap()
}

fn call(engine: &SyncEngine, path: &str, params: &[(&str, Value)]) -> Reaction {
    let request = params
        .iter()
        .fold(InboundRequest::new(path), |r, (k, v)| r.param(*k, v.clone()));
    engine.handle(request).unwrap()
}

fn respond(engine: &SyncEngine, path: &str, params: &[(&str, Value)]) -> Response {
    call(engine, path, params).response
}

fn login(engine: &SyncEngine, user: &str) -> Value {
    let response = respond(engine, "/Sessioning/start", &[("user", Value::from(user))]);
    assert_eq!(response.origin, ResponseOrigin::Passthrough);
    response.get("session").cloned().unwrap()
}

fn apple() -> Value {
    Value::record([("id", "food:apple"), ("name", "Apple")])
}

fn submit(engine: &SyncEngine, session: &Value) -> Response {
    respond(
        engine,
        "/MealLog/submit",
        &[
            ("session", session.clone()),
            ("items", Value::List(vec![apple()])),
            ("notes", Value::from("A healthy snack.")),
        ],
    )
}

fn error_of(response: &Response) -> &str {
    response.error().and_then(Value::as_str).unwrap_or_default()
}

#[test]
fn submit_meal_responds_with_owner_meals() {
    let engine = engine();
    let session = login(&engine, "alice");
    assert_eq!(session, Value::from("session-1"));

    let reaction = call(
        &engine,
        "/MealLog/submit",
        &[("session", session.clone()), ("items", Value::List(vec![apple()]))],
    );
    let response = &reaction.response;
    assert_eq!(response.origin, ResponseOrigin::Rule("SubmitMealResponseSuccess".to_string()));
    let meals = response.get("meals").and_then(Value::as_list).unwrap();
    assert_eq!(meals.len(), 1);
    assert_eq!(meals[0].field("id"), Some(&Value::from("meal-1")));
    assert_eq!(meals[0].field("owner"), Some(&Value::from("alice")));
    assert_eq!(meals[0].field("status"), Some(&Value::from("ACTIVE")));

    // request, submit, respond
    let actions: Vec<_> = reaction.records.iter().map(|r| r.action.to_string()).collect();
    assert_eq!(actions, vec!["Requesting.request", "MealLog.submit", "Requesting.respond"]);
    assert!(reaction.faults.is_empty());
    assert_eq!(reaction.suppressed_responses, 0);

    let submit = ActionRef::new("MealLog", "submit");
    let submit_record = reaction.records_of(&submit).next().unwrap();
    assert_eq!(submit_record.cause.as_ref().unwrap().rule, "SubmitMealRequest");
}

#[test]
fn submit_meal_reports_concept_refusal() {
    let engine = engine();
    let session = login(&engine, "alice");
    let response = respond(
        &engine,
        "/MealLog/submit",
        &[("session", session), ("items", Value::List(Vec::new()))],
    );
    assert_eq!(error_of(&response), "A meal must contain at least one food item.");
    assert_eq!(response.origin, ResponseOrigin::Rule("SubmitMealResponseError".to_string()));
}

#[test]
fn submit_meal_with_explicit_owner() {
    let engine = engine();
    let response = respond(
        &engine,
        "/MealLog/submit",
        &[("owner", Value::from("carol")), ("items", Value::List(vec![apple()]))],
    );
    assert_eq!(response.get("meal"), Some(&Value::from("meal-1")));
    assert_eq!(response.origin, ResponseOrigin::Rule("SubmitMealOwnerResponseSuccess".to_string()));

    let listed = respond(&engine, "/MealLog/_getMealsByOwner", &[("owner", Value::from("carol"))]);
    assert_eq!(listed.get("meals").and_then(Value::as_list).map(<[Value]>::len), Some(1));
}

#[test]
fn invalid_session_gets_auth_error() {
    let engine = engine();
    for path in ["/MealLog/submit", "/MealLog/list", "/MealLog/get", "/QuickCheckIns/defineMetric"] {
        let response = respond(
            &engine,
            path,
            &[
                ("session", Value::from("bogus")),
                ("meal", Value::from("meal-1")),
                ("name", Value::from("mood")),
                ("items", Value::List(vec![apple()])),
            ],
        );
        assert_eq!(error_of(&response), AUTH_ERROR, "{path}");
    }
}

#[test]
fn list_meals_returns_empty_list_for_new_user() {
    let engine = engine();
    let session = login(&engine, "alice");
    let response = respond(&engine, "/MealLog/list", &[("session", session)]);
    assert_eq!(response.get("meals"), Some(&Value::List(Vec::new())));
    assert!(!response.is_error());
}

#[test]
fn edit_and_delete_are_owner_only() {
    let engine = engine();
    let alice = login(&engine, "alice");
    let bob = login(&engine, "bob");
    submit(&engine, &alice);
    let meal = Value::from("meal-1");

    let denied = respond(&engine, "/MealLog/edit", &[("session", bob.clone()), ("meal", meal.clone())]);
    assert_eq!(error_of(&denied), "Permission denied");
    let denied = respond(&engine, "/MealLog/delete", &[("session", bob), ("meal", meal.clone())]);
    assert_eq!(error_of(&denied), "Permission denied");

    let missing = respond(&engine, "/MealLog/edit", &[("session", alice.clone()), ("meal", Value::from("meal-9"))]);
    assert_eq!(error_of(&missing), "Meal not found");

    let edited = respond(
        &engine,
        "/MealLog/edit",
        &[("session", alice.clone()), ("meal", meal.clone()), ("notes", Value::from("Dinner."))],
    );
    assert_eq!(edited.get("status"), Some(&Value::from("ok")));

    let empty = respond(
        &engine,
        "/MealLog/edit",
        &[("session", alice.clone()), ("meal", meal.clone()), ("items", Value::List(Vec::new()))],
    );
    assert_eq!(error_of(&empty), "A meal must contain at least one food item.");

    let fetched = respond(&engine, "/MealLog/get", &[("session", alice.clone()), ("meal", meal.clone())]);
    assert_eq!(fetched.get("meal").and_then(|m| m.field("notes")), Some(&Value::from("Dinner.")));

    let deleted = respond(&engine, "/MealLog/delete", &[("session", alice.clone()), ("meal", meal.clone())]);
    assert_eq!(deleted.get("status"), Some(&Value::from("deleted")));
    let again = respond(&engine, "/MealLog/delete", &[("session", alice.clone()), ("meal", meal)]);
    assert_eq!(error_of(&again), "Meal with ID 'meal-1' has been deleted.");

    let listed = respond(&engine, "/MealLog/list", &[("session", alice)]);
    assert_eq!(listed.get("meals"), Some(&Value::List(Vec::new())));
    let all = respond(
        &engine,
        "/MealLog/_getMealsByOwner",
        &[("owner", Value::from("alice")), ("includeDeleted", Value::from(true))],
    );
    let meals = all.get("meals").and_then(Value::as_list).unwrap();
    assert_eq!(meals[0].field("status"), Some(&Value::from("DELETED")));
}

#[test]
fn get_meal_variants() {
    let engine = engine();
    let alice = login(&engine, "alice");
    let bob = login(&engine, "bob");
    submit(&engine, &alice);

    let own = respond(&engine, "/MealLog/get", &[("session", alice.clone()), ("meal", Value::from("meal-1"))]);
    assert_eq!(own.get("meal").and_then(|m| m.field("owner")), Some(&Value::from("alice")));
    assert_eq!(own.origin, ResponseOrigin::Rule("GetMealSuccess".to_string()));

    let other = respond(&engine, "/MealLog/get", &[("session", bob), ("meal", Value::from("meal-1"))]);
    assert_eq!(error_of(&other), "Permission denied");

    let missing = respond(&engine, "/MealLog/get", &[("session", alice), ("meal", Value::from("meal-2"))]);
    assert_eq!(error_of(&missing), "Meal not found");

    let by_id = respond(&engine, "/MealLog/_getMealById", &[("meal", Value::from("meal-1"))]);
    assert_eq!(by_id.get("meal").and_then(|m| m.field("id")), Some(&Value::from("meal-1")));
    let by_id = respond(&engine, "/MealLog/_getMealById", &[("meal", Value::from("meal-7"))]);
    assert_eq!(error_of(&by_id), "Meal not found");
}

#[test]
fn check_in_lifecycle() {
    let engine = engine();
    let alice = login(&engine, "alice");
    let bob = login(&engine, "bob");

    let defined = respond(&engine, "/QuickCheckIns/defineMetric", &[("session", alice.clone()), ("name", Value::from("mood"))]);
    assert_eq!(defined.get("metric"), Some(&Value::from("metric-1")));
    let duplicate = respond(&engine, "/QuickCheckIns/defineMetric", &[("session", bob.clone()), ("name", Value::from("mood"))]);
    assert!(error_of(&duplicate).starts_with("Metric with name 'mood' already exists"));

    let record = |session: &Value, metric: &str| {
        respond(
            &engine,
            "/QuickCheckIns/record",
            &[
                ("session", session.clone()),
                ("at", Value::from("2025-10-01T08:00:00Z")),
                ("metric", Value::from(metric)),
                ("value", Value::from(7)),
            ],
        )
    };
    assert_eq!(record(&alice, "metric-1").get("checkIn"), Some(&Value::from("checkin-1")));
    assert_eq!(error_of(&record(&alice, "metric-9")), "Metric with ID 'metric-9' is not defined.");

    let check_in = Value::from("checkin-1");
    let stolen = respond(
        &engine,
        "/QuickCheckIns/edit",
        &[("session", bob), ("checkIn", check_in.clone()), ("value", Value::from(1))],
    );
    assert_eq!(error_of(&stolen), "You are not the owner of this check-in.");
    let edited = respond(
        &engine,
        "/QuickCheckIns/edit",
        &[("session", alice.clone()), ("checkIn", check_in.clone()), ("value", Value::from(8))],
    );
    assert_eq!(edited.get("success"), Some(&Value::from(true)));

    let blocked = respond(&engine, "/QuickCheckIns/deleteMetric", &[("session", alice.clone()), ("metric", Value::from("metric-1"))]);
    assert_eq!(
        error_of(&blocked),
        "Cannot delete metric: there are existing check-ins referencing this metric."
    );

    let listed = respond(&engine, "/QuickCheckIns/_listCheckInsByOwner", &[("ownerId", Value::from("alice"))]);
    let check_ins = listed.get("checkIns").and_then(Value::as_list).unwrap();
    assert_eq!(check_ins.len(), 1);
    assert_eq!(check_ins[0].field("value").and_then(Value::as_float), Some(8.0));

    let deleted = respond(&engine, "/QuickCheckIns/delete", &[("session", alice.clone()), ("checkIn", check_in)]);
    assert_eq!(deleted.get("success"), Some(&Value::from(true)));
    let dropped = respond(&engine, "/QuickCheckIns/deleteMetric", &[("session", alice), ("metric", Value::from("metric-1"))]);
    assert_eq!(dropped.get("success"), Some(&Value::from(true)));

    let empty = respond(&engine, "/QuickCheckIns/_listCheckInsByOwner", &[("requester", Value::from("alice"))]);
    assert_eq!(empty.get("checkIns"), Some(&Value::List(Vec::new())));
}

#[test]
fn unknown_path_gets_default_response() {
    let engine = engine();
    let reaction = call(&engine, "/Nowhere/at-all", &[]);
    assert_eq!(reaction.response.origin, ResponseOrigin::Default);
    assert_eq!(
        error_of(&reaction.response),
        conceptsync::engine::DEFAULT_UNROUTED_ERROR
    );
    assert_eq!(reaction.records.len(), 2);

    let stored = engine.last_response(&reaction.request).unwrap().unwrap();
    assert_eq!(stored.payload, reaction.response.payload);
    assert_eq!(stored.origin, ResponseOrigin::Default);
}

#[test]
fn json_requests_round_trip_through_the_engine() {
    let engine = engine();
    let request = InboundRequest::from_json(serde_json::json!({
        "path": "/Sessioning/start",
        "user": "dora",
    }))
    .unwrap();
    let id = request.id.clone();
    let json = engine.handle(request).unwrap().response.to_json();
    assert_eq!(json["session"], "session-1");
    assert_eq!(json["request"], id.as_str());
}
