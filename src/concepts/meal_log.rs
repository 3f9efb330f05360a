use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::action::Outcome;
use crate::concept::{settle, ActionFailure, ActionResult, Args, Concept};
use crate::error::SyncResult;
use crate::value::{Record, Value};

use super::{poisoned, unknown_action, unknown_query, IdSource};

const NAME: &str = "MealLog";

const EMPTY_ITEMS: &str = "A meal must contain at least one food item.";
const NOT_OWNER: &str = "Caller is not the owner of this meal.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Deleted,
}

impl Status {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deleted => "DELETED",
        }
    }
}

#[derive(Debug, Clone)]
struct Meal {
    id: String,
    owner: String,
    at: Value,
    items: Vec<Value>,
    notes: Option<String>,
    status: Status,
}

impl Meal {
    fn to_value(&self) -> Value {
        let mut doc = Record::from([
            ("id".to_string(), Value::from(self.id.as_str())),
            ("owner".to_string(), Value::from(self.owner.as_str())),
            ("at".to_string(), self.at.clone()),
            ("items".to_string(), Value::List(self.items.clone())),
            ("status".to_string(), Value::from(self.status.as_str())),
        ]);
        if let Some(notes) = &self.notes {
            doc.insert("notes".to_string(), Value::from(notes.as_str()));
        }
        Value::Record(doc)
    }
}

/// Meals recorded by users. Deletion is soft: deleted meals stay queryable
/// with `includeDeleted`.
///
/// Actions: `submit {owner, at?, items, notes?} -> {meal}`,
/// `edit {caller, meal, at?, items?, notes?} -> {}`,
/// `delete {caller, meal} -> {}`.
/// Queries: `_getMealsByOwner {owner, includeDeleted?} -> [{meal}]`,
/// `_getMealById {meal} -> [{meal}]`, `_getMealOwner {meal} -> [{owner}]`.
#[derive(Debug, Default)]
pub struct MealLog {
    ids: IdSource,
    // Keyed by insertion number so listings keep submission order.
    meals: RwLock<BTreeMap<u64, Meal>>,
}

impl MealLog {
    /// An empty meal log minting random ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty meal log minting meal ids from `ids`.
    #[must_use]
    pub fn with_ids(ids: IdSource) -> Self {
        Self {
            ids,
            meals: RwLock::default(),
        }
    }

    fn submit(&self, args: Args<'_>) -> ActionResult {
        let owner = args.str("owner")?.to_string();
        let items = args.list("items")?;
        if items.is_empty() {
            return Err(ActionFailure::refused(EMPTY_ITEMS));
        }
        let notes = args.opt_str("notes")?.map(str::to_string);
        let at = args
            .value("at")
            .cloned()
            .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339()));

        let id = self.ids.next_id();
        let mut meals = self.meals.write().map_err(|_| poisoned(NAME))?;
        let key = meals.last_key_value().map_or(0, |(k, _)| k + 1);
        meals.insert(
            key,
            Meal {
                id: id.clone(),
                owner,
                at,
                items: items.to_vec(),
                notes,
                status: Status::Active,
            },
        );
        Ok(Record::from([("meal".to_string(), Value::String(id))]))
    }

    fn edit(&self, args: Args<'_>) -> ActionResult {
        let caller = args.str("caller")?;
        let meal_id = args.str("meal")?;
        let items = args.opt_list("items")?;
        if items.is_some_and(<[Value]>::is_empty) {
            return Err(ActionFailure::refused(EMPTY_ITEMS));
        }
        let notes = args.opt_str("notes")?;

        let mut meals = self.meals.write().map_err(|_| poisoned(NAME))?;
        let meal = active_meal(meals.values_mut(), meal_id, caller)?;
        if let Some(at) = args.value("at") {
            meal.at = at.clone();
        }
        if let Some(items) = items {
            meal.items = items.to_vec();
        }
        if let Some(notes) = notes {
            meal.notes = Some(notes.to_string());
        }
        Ok(Record::new())
    }

    fn delete(&self, args: Args<'_>) -> ActionResult {
        let caller = args.str("caller")?;
        let meal_id = args.str("meal")?;
        let mut meals = self.meals.write().map_err(|_| poisoned(NAME))?;
        let meal = active_meal(meals.values_mut(), meal_id, caller)?;
        meal.status = Status::Deleted;
        Ok(Record::new())
    }

    fn meals_by_owner(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let owner = args.str("owner")?;
        let include_deleted = args.opt_bool("includeDeleted")?.unwrap_or(false);
        let meals = self.meals.read().map_err(|_| poisoned(NAME))?;
        Ok(meals
            .values()
            .filter(|m| m.owner == owner && (include_deleted || m.status == Status::Active))
            .map(|m| Record::from([("meal".to_string(), m.to_value())]))
            .collect())
    }

    fn meal_by_id(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let meal_id = args.str("meal")?;
        let meals = self.meals.read().map_err(|_| poisoned(NAME))?;
        Ok(meals
            .values()
            .filter(|m| m.id == meal_id)
            .map(|m| Record::from([("meal".to_string(), m.to_value())]))
            .collect())
    }

    fn meal_owner(&self, args: Args<'_>) -> Result<Vec<Record>, ActionFailure> {
        let meal_id = args.str("meal")?;
        let meals = self.meals.read().map_err(|_| poisoned(NAME))?;
        Ok(meals
            .values()
            .filter(|m| m.id == meal_id)
            .map(|m| Record::from([("owner".to_string(), Value::from(m.owner.as_str()))]))
            .collect())
    }
}

/// The active meal `meal_id`, if `caller` owns it.
fn active_meal<'m>(
    mut meals: impl Iterator<Item = &'m mut Meal>,
    meal_id: &str,
    caller: &str,
) -> Result<&'m mut Meal, ActionFailure> {
    let meal = meals
        .find(|m| m.id == meal_id)
        .ok_or_else(|| ActionFailure::refused(format!("Meal with ID '{meal_id}' not found.")))?;
    if meal.owner != caller {
        return Err(ActionFailure::refused(NOT_OWNER));
    }
    if meal.status == Status::Deleted {
        return Err(ActionFailure::refused(format!("Meal with ID '{meal_id}' has been deleted.")));
    }
    Ok(meal)
}

impl Concept for MealLog {
    fn name(&self) -> &str {
        NAME
    }

    fn perform(&self, action: &str, input: &Record) -> SyncResult<Outcome> {
        let args = Args::new(input);
        match action {
            "submit" => settle(self.submit(args)),
            "edit" => settle(self.edit(args)),
            "delete" => settle(self.delete(args)),
            other => Err(unknown_action(NAME, other)),
        }
    }

    fn query(&self, query: &str, input: &Record) -> SyncResult<Vec<Record>> {
        let args = Args::new(input);
        let rows = match query {
            "_getMealsByOwner" => self.meals_by_owner(args),
            "_getMealById" => self.meal_by_id(args),
            "_getMealOwner" => self.meal_owner(args),
            other => return Err(unknown_query(NAME, other)),
        };
        rows.map_err(|e| e.into_query_error(NAME, query))
    }
}
