use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Server-assigned meal identifier. Negative values are temporary ids
/// handed out while a create is still queued offline.
pub type MealId = i64;

/// Local-only synchronization tag. Never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    #[default]
    Unchanged,
    Added,
    Updated,
    Deleted,
}

impl EntityState {
    /// True when the record has a local change that has not reached the server.
    pub fn is_pending(&self) -> bool {
        !matches!(self, EntityState::Unchanged)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Unchanged => write!(f, "unchanged"),
            EntityState::Added => write!(f, "added"),
            EntityState::Updated => write!(f, "updated"),
            EntityState::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for EntityState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unchanged" => Ok(EntityState::Unchanged),
            "added" => Ok(EntityState::Added),
            "updated" => Ok(EntityState::Updated),
            "deleted" => Ok(EntityState::Deleted),
            _ => Err(format!(
                "Invalid entity state '{}'. Valid options: unchanged, added, updated, deleted",
                s
            )),
        }
    }
}

/// A meal record as held by the client.
///
/// The business fields travel over the wire; `etag`, `entity_state` and
/// `has_conflict` are bookkeeping that only the local cache persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MealId>,
    #[serde(default)]
    pub comment: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub foods: String,
    #[serde(default)]
    pub eaten: bool,
    #[serde(default)]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub entity_state: EntityState,
    #[serde(default)]
    pub has_conflict: bool,
}

/// The wire representation of a meal: business fields only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MealId>,
    pub comment: &'a str,
    pub date: DateTime<Utc>,
    pub foods: &'a str,
    pub eaten: bool,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<&'a str>,
}

impl Meal {
    pub fn new(comment: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            id: None,
            comment: comment.into(),
            date,
            foods: String::new(),
            eaten: false,
            price: 0.0,
            latitude: None,
            longitude: None,
            user_id: None,
            etag: None,
            entity_state: EntityState::Unchanged,
            has_conflict: false,
        }
    }

    pub fn with_id(mut self, id: MealId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_foods(mut self, foods: impl Into<String>) -> Self {
        self.foods = foods.into();
        self
    }

    pub fn with_eaten(mut self, eaten: bool) -> Self {
        self.eaten = eaten;
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// True when the id was generated locally and the server has never seen it.
    pub fn is_temporary(&self) -> bool {
        matches!(self.id, Some(id) if id < 0)
    }

    /// Body sent to the REST endpoints. The etag travels in headers there.
    pub fn payload(&self) -> MealPayload<'_> {
        MealPayload {
            id: self.id,
            comment: &self.comment,
            date: self.date,
            foods: &self.foods,
            eaten: self.eaten,
            price: self.price,
            latitude: self.latitude,
            longitude: self.longitude,
            user_id: self.user_id,
            etag: None,
        }
    }

    /// Body used by push notifications, which carry the version inline.
    pub fn payload_with_etag(&self) -> MealPayload<'_> {
        MealPayload {
            etag: self.etag.as_deref(),
            ..self.payload()
        }
    }

    /// Compares the fields a user can edit, ignoring sync bookkeeping.
    pub fn same_content(&self, other: &Meal) -> bool {
        self.comment == other.comment
            && self.date == other.date
            && self.foods == other.foods
            && self.eaten == other.eaten
            && self.price == other.price
            && self.latitude == other.latitude
            && self.longitude == other.longitude
    }

    /// Marks the record as confirmed by the server at `etag`.
    pub fn confirmed(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self.entity_state = EntityState::Unchanged;
        self.has_conflict = false;
        self
    }
}

/// Listing order shared by the server and offline page synthesis:
/// most recent date first, ties broken by descending id.
pub fn compare_recent_first(a: &Meal, b: &Meal) -> Ordering {
    b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id))
}

impl fmt::Display for Meal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => writeln!(f, "Meal #{}: {}", id, self.comment)?,
            None => writeln!(f, "Meal (unsaved): {}", self.comment)?,
        }
        writeln!(f, "  Date:   {}", self.date.format("%Y-%m-%d %H:%M"))?;
        if !self.foods.is_empty() {
            writeln!(f, "  Foods:  {}", self.foods)?;
        }
        writeln!(f, "  Eaten:  {}", if self.eaten { "yes" } else { "no" })?;
        writeln!(f, "  Price:  {:.2}", self.price)?;
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            writeln!(f, "  Where:  {:.5}, {:.5}", lat, lng)?;
        }
        if self.entity_state.is_pending() {
            writeln!(f, "  Sync:   {} (pending)", self.entity_state)?;
        }
        if self.has_conflict {
            writeln!(f, "  Sync:   conflict with server version")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_meal_new() {
        let meal = Meal::new("Lunch", sample_date());

        assert!(meal.id.is_none());
        assert_eq!(meal.comment, "Lunch");
        assert_eq!(meal.entity_state, EntityState::Unchanged);
        assert!(!meal.has_conflict);
        assert!(meal.etag.is_none());
    }

    #[test]
    fn test_temporary_id() {
        let meal = Meal::new("Lunch", sample_date());
        assert!(!meal.is_temporary());
        assert!(meal.clone().with_id(-42).is_temporary());
        assert!(!meal.with_id(42).is_temporary());
    }

    #[test]
    fn test_payload_omits_local_fields() {
        let mut meal = Meal::new("Dinner", sample_date())
            .with_id(7)
            .with_foods("rice, beans")
            .with_user_id(3);
        meal.etag = Some("\"7-1\"".to_string());
        meal.entity_state = EntityState::Updated;
        meal.has_conflict = true;

        let json = serde_json::to_value(meal.payload()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["userId"], 3);
        assert_eq!(json["foods"], "rice, beans");
        assert!(json.get("etag").is_none());
        assert!(json.get("entityState").is_none());
        assert!(json.get("hasConflict").is_none());

        let json = serde_json::to_value(meal.payload_with_etag()).unwrap();
        assert_eq!(json["etag"], "\"7-1\"");
    }

    #[test]
    fn test_server_json_defaults_local_fields() {
        let json = r#"{"id":5,"comment":"Snack","date":"2025-01-15T12:30:00Z","userId":1}"#;
        let meal: Meal = serde_json::from_str(json).unwrap();

        assert_eq!(meal.id, Some(5));
        assert_eq!(meal.entity_state, EntityState::Unchanged);
        assert!(!meal.has_conflict);
        assert!(!meal.eaten);
        assert_eq!(meal.price, 0.0);
    }

    #[test]
    fn test_cache_json_keeps_local_fields() {
        let mut meal = Meal::new("Breakfast", sample_date()).with_id(-9);
        meal.entity_state = EntityState::Added;

        let json = serde_json::to_string(&meal).unwrap();
        assert!(json.contains("\"entityState\":\"added\""));

        let parsed: Meal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meal);
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = Meal::new("Lunch", sample_date()).with_price(4.5);
        let mut b = a.clone().with_id(10);
        b.etag = Some("x".to_string());
        b.entity_state = EntityState::Updated;
        assert!(a.same_content(&b));

        b.price = 5.0;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_compare_recent_first() {
        let older = Meal::new("old", sample_date()).with_id(1);
        let newer = Meal::new("new", sample_date() + chrono::Duration::hours(1)).with_id(2);
        let tie = Meal::new("tie", sample_date()).with_id(3);

        let mut meals = vec![older.clone(), newer.clone(), tie.clone()];
        meals.sort_by(compare_recent_first);

        let ids: Vec<_> = meals.iter().map(|m| m.id.unwrap()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_entity_state_from_str() {
        assert_eq!(EntityState::from_str("ADDED").unwrap(), EntityState::Added);
        assert_eq!(
            EntityState::from_str("deleted").unwrap(),
            EntityState::Deleted
        );
        assert!(EntityState::from_str("gone").is_err());
    }

    #[test]
    fn test_display_flags_pending_and_conflict() {
        let mut meal = Meal::new("Dinner", sample_date()).with_id(4);
        meal.entity_state = EntityState::Updated;
        meal.has_conflict = true;

        let output = format!("{}", meal);
        assert!(output.contains("Meal #4: Dinner"));
        assert!(output.contains("updated (pending)"));
        assert!(output.contains("conflict"));
    }
}
