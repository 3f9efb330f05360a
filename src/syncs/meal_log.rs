use crate::action::ActionRef;
use crate::error::ValidationError;
use crate::pattern::{vars, ActionPattern, Template, Var};
use crate::predicate::{Operand, Predicate};
use crate::rule::{Pipeline, SyncRule};

use super::{answer, auth_failure, error_response, on_request, session_user};

const NOT_FOUND: &str = "Meal not found";
const PERMISSION_DENIED: &str = "Permission denied";

fn meal_log(action: &str) -> ActionRef {
    ActionRef::new("MealLog", action)
}

/// `_getMealsByOwner {owner} -> [{meal}]` collected into `meals`.
fn meals_of(owner: &Var, include_deleted: Option<&Var>, meals: &Var) -> Pipeline {
    let doc = Var::new("mealDoc");
    let mut input = Template::new().field("owner", owner);
    if let Some(flag) = include_deleted {
        input = input.opt("includeDeleted", flag);
    }
    Pipeline::new().aggregate(
        Pipeline::new().query(meal_log("_getMealsByOwner"), input, Template::new().field("meal", &doc)),
        &[&doc],
        meals,
    )
}

fn meal_owner(meal: &Var, owner: &Var) -> Pipeline {
    Pipeline::new().query(meal_log("_getMealOwner"), Template::of(&[meal]), Template::of(&[owner]))
}

/// MealLog synchronizations.
pub fn rules() -> Result<Vec<SyncRule>, ValidationError> {
    let mut rules = submit()?;
    rules.extend(guarded("Edit", "edit", "ok")?);
    rules.extend(guarded("Delete", "delete", "deleted")?);
    rules.extend(listings()?);
    rules.extend(lookups()?);
    Ok(rules)
}

fn submit() -> Result<Vec<SyncRule>, ValidationError> {
    const PATH: &str = "/MealLog/submit";
    let [session, owner, user, at, items, notes, meal, meals] =
        vars(["session", "owner", "user", "at", "items", "notes", "meal", "meals"]);
    let meal_input = |owner: &Var| {
        Template::new()
            .field("owner", owner)
            .opt("at", &at)
            .field("items", &items)
            .opt("notes", &notes)
    };
    let request_fields = |who: &Var| {
        Template::new()
            .field(who.name(), who)
            .opt("at", &at)
            .field("items", &items)
            .opt("notes", &notes)
    };

    let (respond, with_meals) = answer(Template::of(&[&meals]));
    let (_, with_meal) = answer(Template::of(&[&meal]));
    Ok(vec![
        SyncRule::builder("SubmitMealRequest")
            .when(on_request(PATH, request_fields(&session)))
            .pipeline(session_user(&session, &user))
            .then(meal_log("submit"), meal_input(&user))
            .build()?,
        SyncRule::builder("SubmitMealResponseSuccess")
            .when(on_request(PATH, Template::of(&[&session])))
            .when(ActionPattern::success(
                meal_log("submit"),
                Template::new().field("owner", &user),
                Template::of(&[&meal]),
            ))
            .pipeline(meals_of(&user, None, &meals))
            .then(respond.clone(), with_meals)
            .build()?,
        // Trusted callers may name the owner directly, without a session.
        SyncRule::builder("SubmitMealOwnerRequest")
            .when(on_request(PATH, request_fields(&owner).opt("session", &session)))
            .filter(Predicate::unbound(&session))
            .then(meal_log("submit"), meal_input(&owner))
            .build()?,
        SyncRule::builder("SubmitMealOwnerResponseSuccess")
            .when(on_request(PATH, Template::of(&[&owner]).opt("session", &session)))
            .when(ActionPattern::success(meal_log("submit"), Template::new(), Template::of(&[&meal])))
            .filter(Predicate::unbound(&session))
            .then(respond, with_meal)
            .build()?,
        error_response("SubmitMealResponseError", PATH, meal_log("submit"))?,
        auth_failure("SubmitMealAuthFailure", PATH)?,
    ])
}

/// Rules for an owner-only mutation of one meal: the caller's session must
/// resolve to the meal's owner before the action runs.
fn guarded(label: &str, action: &str, status: &str) -> Result<Vec<SyncRule>, ValidationError> {
    let path = format!("/MealLog/{action}");
    let [session, meal, user, owner, at, items, notes] =
        vars(["session", "meal", "user", "owner", "at", "items", "notes"]);
    let mut request_fields = Template::of(&[&session, &meal]);
    let mut action_input = Template::new().field("caller", &user).field("meal", &meal);
    if action == "edit" {
        for var in [&at, &items, &notes] {
            request_fields = request_fields.opt(var.name(), var);
            action_input = action_input.opt(var.name(), var);
        }
    }

    let (respond, ok) = answer(Template::new().lit("status", status));
    let (_, not_found) = answer(Template::new().lit("error", NOT_FOUND));
    let (_, denied) = answer(Template::new().lit("error", PERMISSION_DENIED));
    Ok(vec![
        SyncRule::builder(format!("{label}MealRequest"))
            .when(on_request(&path, request_fields))
            .pipeline(session_user(&session, &user))
            .pipeline(meal_owner(&meal, &owner))
            .filter(Predicate::eq(&user, &owner))
            .then(meal_log(action), action_input)
            .build()?,
        SyncRule::builder(format!("{label}MealResponseSuccess"))
            .when(on_request(&path, Template::new()))
            .when(ActionPattern::success(meal_log(action), Template::new(), Template::new()))
            .then(respond.clone(), ok)
            .build()?,
        error_response(&format!("{label}MealResponseError"), &path, meal_log(action))?,
        SyncRule::builder(format!("{label}MealNotFound"))
            .when(on_request(&path, Template::of(&[&session, &meal])))
            .pipeline(session_user(&session, &user))
            .unless(meal_owner(&meal, &owner))
            .then(respond.clone(), not_found)
            .build()?,
        SyncRule::builder(format!("{label}MealPermissionDenied"))
            .when(on_request(&path, Template::of(&[&session, &meal])))
            .pipeline(session_user(&session, &user))
            .pipeline(meal_owner(&meal, &owner))
            .filter(Predicate::ne(&user, &owner))
            .then(respond, denied)
            .build()?,
        auth_failure(&format!("{label}MealAuthFailure"), &path)?,
    ])
}

fn listings() -> Result<Vec<SyncRule>, ValidationError> {
    const LIST: &str = "/MealLog/list";
    const BY_OWNER: &str = "/MealLog/_getMealsByOwner";
    let [session, user, owner, include_deleted, meals] =
        vars(["session", "user", "owner", "includeDeleted", "meals"]);
    let (respond, with_meals) = answer(Template::of(&[&meals]));
    Ok(vec![
        SyncRule::builder("ListMeals")
            .when(on_request(LIST, Template::of(&[&session])))
            .pipeline(session_user(&session, &user))
            .pipeline(meals_of(&user, None, &meals))
            .then(respond.clone(), with_meals.clone())
            .build()?,
        auth_failure("ListMealsAuthFailure", LIST)?,
        SyncRule::builder("GetMealsByOwner")
            .when(on_request(
                BY_OWNER,
                Template::of(&[&owner]).opt("includeDeleted", &include_deleted),
            ))
            .pipeline(meals_of(&owner, Some(&include_deleted), &meals))
            .then(respond, with_meals)
            .build()?,
    ])
}

fn lookups() -> Result<Vec<SyncRule>, ValidationError> {
    const BY_ID: &str = "/MealLog/_getMealById";
    const GET: &str = "/MealLog/get";
    let [session, user, meal, doc] = vars(["session", "user", "meal", "mealDoc"]);
    let by_id = || {
        Pipeline::new().query(
            meal_log("_getMealById"),
            Template::of(&[&meal]),
            Template::new().field("meal", &doc),
        )
    };
    let doc_owner = || Operand::field(&doc, "owner");

    let (respond, found) = answer(Template::new().field("meal", &doc));
    let (_, not_found) = answer(Template::new().lit("error", NOT_FOUND));
    let (_, denied) = answer(Template::new().lit("error", PERMISSION_DENIED));
    Ok(vec![
        SyncRule::builder("GetMealByIdSuccess")
            .when(on_request(BY_ID, Template::of(&[&meal])))
            .pipeline(by_id())
            .then(respond.clone(), found.clone())
            .build()?,
        SyncRule::builder("GetMealByIdNotFound")
            .when(on_request(BY_ID, Template::of(&[&meal])))
            .unless(by_id())
            .then(respond.clone(), not_found.clone())
            .build()?,
        SyncRule::builder("GetMealSuccess")
            .when(on_request(GET, Template::of(&[&session, &meal])))
            .pipeline(session_user(&session, &user))
            .pipeline(by_id())
            .filter(Predicate::eq(doc_owner(), &user))
            .then(respond.clone(), found)
            .build()?,
        SyncRule::builder("GetMealNotFound")
            .when(on_request(GET, Template::of(&[&session, &meal])))
            .pipeline(session_user(&session, &user))
            .unless(by_id())
            .then(respond.clone(), not_found)
            .build()?,
        SyncRule::builder("GetMealPermissionDenied")
            .when(on_request(GET, Template::of(&[&session, &meal])))
            .pipeline(session_user(&session, &user))
            .pipeline(by_id())
            .filter(Predicate::ne(doc_owner(), &user))
            .then(respond, denied)
            .build()?,
        auth_failure("GetMealAuthFailure", GET)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{request_action, respond_action};

    #[test]
    fn test_rule_names_are_unique() {
        let rules = rules().unwrap();
        let mut names: Vec<_> = rules.iter().map(SyncRule::name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_guarded_rules_cover_every_outcome() {
        let rules = guarded("Edit", "edit", "ok").unwrap();
        let names: Vec<_> = rules.iter().map(SyncRule::name).collect();
        assert_eq!(
            names,
            vec![
                "EditMealRequest",
                "EditMealResponseSuccess",
                "EditMealResponseError",
                "EditMealNotFound",
                "EditMealPermissionDenied",
                "EditMealAuthFailure",
            ]
        );
        let request = &rules[0];
        assert_eq!(request.trigger().unwrap().action, request_action());
        assert_eq!(request.then()[0].action, meal_log("edit"));
        assert!(rules[1..].iter().all(|r| r.then()[0].action == respond_action()));
    }

    #[test]
    fn test_delete_request_ignores_edit_fields() {
        let rules = guarded("Delete", "delete", "deleted").unwrap();
        let fields: Vec<_> = rules[0].then()[0].input.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(fields, vec!["caller", "meal"]);
    }
}
