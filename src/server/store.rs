//! In-memory meal storage for the reference server.
//!
//! Each record carries a version counter; its strong ETag is
//! `"<id>-<version>"`. Listing ETags are derived from the ETags of the
//! items on the page, so any change to a listed record changes the page tag.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{compare_recent_first, Meal, MealFilter, MealId};

#[derive(Debug, Error, PartialEq)]
pub enum ServerStoreError {
    #[error("Meal {0} not found")]
    NotFound(MealId),
    /// `If-Match` did not match; carries the current record.
    #[error("Meal was modified by someone else")]
    PreconditionFailed(Box<Meal>),
}

#[derive(Debug, Clone)]
struct StoredMeal {
    meal: Meal,
    version: u64,
}

impl StoredMeal {
    fn etag(&self, id: MealId) -> String {
        format!("\"{}-{}\"", id, self.version)
    }

    fn snapshot(&self, id: MealId) -> Meal {
        self.meal.clone().with_id(id).confirmed(Some(self.etag(id)))
    }
}

#[derive(Debug)]
struct StoreInner {
    next_id: MealId,
    meals: BTreeMap<MealId, StoredMeal>,
}

/// Thread-safe meal table keyed by server id.
#[derive(Debug)]
pub struct MealStore {
    inner: Mutex<StoreInner>,
}

impl Default for MealStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Strips bookkeeping a client may have sent along.
fn sanitize(meal: &Meal, user_id: i64) -> Meal {
    let mut clean = meal.clone().confirmed(None);
    clean.user_id = Some(user_id);
    clean
}

/// Weak validators (`W/"..."`) compare equal to their strong form.
pub(crate) fn etag_matches(candidate: &str, current: &str) -> bool {
    let candidate = candidate.trim();
    candidate == "*" || candidate.trim_start_matches("W/") == current
}

impl MealStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_id: 1,
                meals: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new record under a fresh id. Any id in the payload is ignored.
    pub fn create(&self, user_id: i64, meal: &Meal) -> Meal {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let stored = StoredMeal {
            meal: sanitize(meal, user_id),
            version: 1,
        };
        let snapshot = stored.snapshot(id);
        inner.meals.insert(id, stored);
        snapshot
    }

    pub fn get(&self, user_id: i64, id: MealId) -> Result<Meal, ServerStoreError> {
        let inner = self.lock();
        match inner.meals.get(&id) {
            Some(stored) if stored.meal.user_id == Some(user_id) => Ok(stored.snapshot(id)),
            _ => Err(ServerStoreError::NotFound(id)),
        }
    }

    /// Replaces a record. With `if_match`, the write only happens when the
    /// tag matches the current version.
    pub fn update(
        &self,
        user_id: i64,
        id: MealId,
        meal: &Meal,
        if_match: Option<&str>,
    ) -> Result<Meal, ServerStoreError> {
        let mut inner = self.lock();
        let stored = match inner.meals.get_mut(&id) {
            Some(stored) if stored.meal.user_id == Some(user_id) => stored,
            _ => return Err(ServerStoreError::NotFound(id)),
        };

        if let Some(tag) = if_match {
            if !etag_matches(tag, &stored.etag(id)) {
                return Err(ServerStoreError::PreconditionFailed(Box::new(
                    stored.snapshot(id),
                )));
            }
        }

        stored.meal = sanitize(meal, user_id);
        stored.version += 1;
        Ok(stored.snapshot(id))
    }

    pub fn delete(&self, user_id: i64, id: MealId) -> Result<Meal, ServerStoreError> {
        let mut inner = self.lock();
        match inner.meals.get(&id) {
            Some(stored) if stored.meal.user_id == Some(user_id) => {}
            _ => return Err(ServerStoreError::NotFound(id)),
        }
        let stored = inner
            .meals
            .remove(&id)
            .ok_or(ServerStoreError::NotFound(id))?;
        Ok(stored.snapshot(id))
    }

    /// One page of the user's meals, most recent first, and the page's ETag.
    pub fn list(
        &self,
        user_id: i64,
        page: u32,
        size: usize,
        filter: &MealFilter,
    ) -> (Vec<Meal>, String) {
        let inner = self.lock();
        let mut matching: Vec<Meal> = inner
            .meals
            .iter()
            .filter(|(_, stored)| stored.meal.user_id == Some(user_id))
            .map(|(id, stored)| stored.snapshot(*id))
            .filter(|meal| filter.matches(meal))
            .collect();
        drop(inner);

        matching.sort_by(compare_recent_first);
        let items: Vec<Meal> = matching
            .into_iter()
            .skip(page as usize * size)
            .take(size)
            .collect();

        let etag = page_etag(&items);
        (items, etag)
    }
}

fn page_etag(items: &[Meal]) -> String {
    let mut hasher = Sha256::new();
    for meal in items {
        if let Some(etag) = &meal.etag {
            hasher.update(etag.as_bytes());
        }
        hasher.update(b",");
    }
    let hash = hasher.finalize();
    let hex: String = hash[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", hex)
}
