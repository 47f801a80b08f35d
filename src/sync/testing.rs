//! In-process `MealApi` for coordinator tests.
//!
//! Backed by the reference server's [`MealStore`] so conditional-request
//! semantics match the HTTP server; `set_online(false)` makes every call
//! fail with `NetworkUnavailable`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::client::{Fetched, MealApi, PageQuery, UpdateOutcome};
use super::error::RemoteError;
use crate::models::{Batch, Meal, MealId};
use crate::server::store::{MealStore, ServerStoreError};

pub struct FakeApi {
    user_id: i64,
    store: MealStore,
    online: AtomicBool,
    list_etags: AtomicBool,
    calls: AtomicUsize,
    not_modified: AtomicUsize,
    token: Mutex<Option<String>>,
}

impl FakeApi {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            store: MealStore::new(),
            online: AtomicBool::new(true),
            list_etags: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            not_modified: AtomicUsize::new(0),
            token: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &MealStore {
        &self.store
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// When off, listed items come back without versions, as a server
    /// that only sends them in the per-record `ETag` header would.
    pub fn set_list_etags(&self, enabled: bool) {
        self.list_etags.store(enabled, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn not_modified_count(&self) -> usize {
        self.not_modified.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.not_modified.store(0, Ordering::SeqCst);
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NetworkUnavailable("connection refused".into()))
        }
    }

    fn not_modified<T>(&self) -> Fetched<T> {
        self.not_modified.fetch_add(1, Ordering::SeqCst);
        Fetched::NotModified
    }
}

fn not_found(id: MealId) -> RemoteError {
    RemoteError::Status {
        status: 404,
        body: format!("Meal {} not found", id),
    }
}

impl MealApi for FakeApi {
    async fn save(&self, meal: &Meal) -> Result<Meal, RemoteError> {
        self.enter()?;
        Ok(self.store.create(self.user_id, meal))
    }

    async fn update(&self, meal: &Meal, etag: Option<&str>) -> Result<UpdateOutcome, RemoteError> {
        self.enter()?;
        let id = meal.id.ok_or_else(|| not_found(0))?;
        match self.store.update(self.user_id, id, meal, etag) {
            Ok(saved) => Ok(UpdateOutcome::Saved(saved)),
            Err(ServerStoreError::PreconditionFailed(current)) => Ok(UpdateOutcome::Conflict(*current)),
            Err(ServerStoreError::NotFound(id)) => Err(not_found(id)),
        }
    }

    async fn get_by_id(&self, id: MealId, etag: Option<&str>) -> Result<Fetched<Meal>, RemoteError> {
        self.enter()?;
        let meal = self.store.get(self.user_id, id).map_err(|_| not_found(id))?;
        if etag.is_some() && etag == meal.etag.as_deref() {
            return Ok(self.not_modified());
        }
        Ok(Fetched::Fresh(meal))
    }

    async fn list_page(&self, query: &PageQuery, etag: Option<&str>) -> Result<Fetched<Batch>, RemoteError> {
        self.enter()?;
        let (mut items, page_etag) = self
            .store
            .list(self.user_id, query.page, query.size, &query.filter);
        if !self.list_etags.load(Ordering::SeqCst) {
            for item in &mut items {
                item.etag = None;
            }
        }
        if etag == Some(page_etag.as_str()) {
            return Ok(self.not_modified());
        }
        Ok(Fetched::Fresh(Batch::new(query.page, items, Some(page_etag))))
    }

    async fn delete_by_id(&self, id: MealId) -> Result<Meal, RemoteError> {
        self.enter()?;
        self.store.delete(self.user_id, id).map_err(|_| not_found(id))
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn health(&self) -> Result<(), RemoteError> {
        self.enter()
    }
}
