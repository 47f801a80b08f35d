//! Read-through/write-through orchestration between the local cache and
//! the remote meal service.
//!
//! Outcome mapping for every operation:
//!
//! | remote result        | lifecycle  | effect                                   |
//! |----------------------|------------|------------------------------------------|
//! | success              | SUCCEEDED  | cache confirmed copy (`Unchanged`)       |
//! | `NotModified`        | SUCCEEDED  | serve cached copy                        |
//! | `Conflict`           | SUCCEEDED  | store shadow, flag record                |
//! | `NetworkUnavailable` | SUCCEEDED  | queue locally (`Added/Updated/Deleted`)  |
//! | any other error      | FAILED     | nothing written                          |

use std::sync::{Arc, PoisonError, RwLock};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::action::{reduce, ActionKind, ActionPayload, MealEvent, MealState};
use super::client::{Fetched, MealApi, PageQuery, UpdateOutcome};
use super::connectivity::Connectivity;
use super::error::{RemoteError, SyncError};
use super::liveness::Liveness;
use crate::db::LocalCache;
use crate::models::{compare_recent_first, EntityState, Meal, MealFilter, MealId, Session};

/// Where the items of a listed page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Remote,
    /// The server answered 304; the cached batch was replayed verbatim.
    NotModified,
    /// Synthesized from cached records while offline.
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page: u32,
    pub items: Vec<Meal>,
    pub is_last: bool,
    pub source: PageSource,
}

pub struct SyncCoordinator<A: MealApi> {
    api: Arc<A>,
    cache: LocalCache,
    state: watch::Sender<MealState>,
    session: watch::Sender<Session>,
    connectivity: Connectivity,
    page_size: usize,
    filter: RwLock<MealFilter>,
}

fn random_temporary_id() -> MealId {
    -rand::rng().random_range(1..i64::MAX)
}

impl<A: MealApi> SyncCoordinator<A> {
    pub fn new(api: Arc<A>, cache: LocalCache, connectivity: Connectivity, page_size: usize) -> Self {
        let (state, _) = watch::channel(MealState::default());
        let (session, _) = watch::channel(Session::anonymous());
        Self {
            api,
            cache,
            state,
            session,
            connectivity,
            page_size: page_size.max(1),
            filter: RwLock::new(MealFilter::default()),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Snapshot of the published listing state.
    pub fn state(&self) -> MealState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MealState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn active_filter(&self) -> MealFilter {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Folds one event into the published state.
    pub fn dispatch(&self, event: MealEvent) {
        self.state
            .send_modify(|state| *state = reduce(std::mem::take(state), event));
    }

    /// Re-authenticates the transport and, when signed in, reloads page 0.
    pub async fn set_session(&self, session: Session, liveness: &Liveness) -> Result<(), SyncError> {
        self.api.set_token(session.token.clone());
        let authenticated = session.is_authenticated();
        self.session.send_replace(session);

        if authenticated {
            self.refresh(liveness).await?;
        } else {
            self.dispatch(MealEvent::Succeeded(
                ActionKind::GetPaged,
                ActionPayload::Listed {
                    page: 0,
                    items: Vec::new(),
                },
            ));
        }
        Ok(())
    }

    /// `list(0)` under the active filter.
    pub async fn refresh(&self, liveness: &Liveness) -> Result<Page, SyncError> {
        self.list(0, self.active_filter(), liveness).await
    }

    /// Cached record without network access.
    pub async fn get(&self, id: MealId) -> Result<Option<Meal>, SyncError> {
        Ok(self.cache.get(id).await?)
    }

    /// The server version recorded when an update conflicted.
    pub async fn conflict(&self, id: MealId) -> Result<Option<Meal>, SyncError> {
        Ok(self.cache.get_conflict(id).await?)
    }

    pub async fn create(&self, meal: &Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::Save));
        let result = self.create_inner(meal, liveness).await;
        self.finish(ActionKind::Save, result)
    }

    pub async fn read(&self, id: MealId, liveness: &Liveness) -> Result<Meal, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::GetOne));
        let result = self
            .read_inner(id, liveness)
            .await
            .map(|meal| (meal.clone(), ActionPayload::Fetched(meal)));
        self.finish(ActionKind::GetOne, result)
    }

    /// Returns the stored record; check `has_conflict` to see whether the
    /// server rejected the write.
    pub async fn update(&self, meal: &Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::Update));
        let result = self
            .update_inner(meal, liveness)
            .await
            .map(|meal| (meal.clone(), ActionPayload::Upserted(meal)));
        self.finish(ActionKind::Update, result)
    }

    /// Sends the user's merged version with the shadow's etag and, on
    /// success, drops the shadow.
    pub async fn resolve_conflict(&self, merged: &Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::Update));
        let result = self
            .resolve_inner(merged, liveness)
            .await
            .map(|meal| (meal.clone(), ActionPayload::Upserted(meal)));
        self.finish(ActionKind::Update, result)
    }

    pub async fn remove(&self, id: MealId, liveness: &Liveness) -> Result<MealId, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::Delete));
        let result = self
            .remove_inner(id, liveness)
            .await
            .map(|id| (id, ActionPayload::Removed(id)));
        self.finish(ActionKind::Delete, result)
    }

    pub async fn list(&self, page: u32, filter: MealFilter, liveness: &Liveness) -> Result<Page, SyncError> {
        self.dispatch(MealEvent::Started(ActionKind::GetPaged));
        *self.filter.write().unwrap_or_else(PoisonError::into_inner) = filter.clone();

        let result = self.list_inner(page, &filter, liveness).await.map(|listed| {
            let payload = ActionPayload::Listed {
                page,
                items: listed.items.clone(),
            };
            (listed, payload)
        });
        self.finish(ActionKind::GetPaged, result)
    }

    fn finish<T>(&self, kind: ActionKind, result: Result<(T, ActionPayload), SyncError>) -> Result<T, SyncError> {
        match result {
            Ok((value, payload)) => {
                debug!(action = %kind, "Action succeeded");
                self.dispatch(MealEvent::Succeeded(kind, payload));
                Ok(value)
            }
            Err(SyncError::Cancelled) => {
                debug!(action = %kind, "Action cancelled");
                self.state.send_modify(|state| state.executing = false);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                debug!(action = %kind, error = %e, "Action failed");
                self.dispatch(MealEvent::Failed(kind, e.to_string()));
                Err(e)
            }
        }
    }

    fn ensure_alive(&self, liveness: &Liveness) -> Result<(), SyncError> {
        if liveness.is_alive() {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    /// Any server response proves connectivity; only transport failures
    /// mean offline.
    fn observe<T>(&self, result: &Result<T, RemoteError>) {
        let online = !matches!(result, Err(e) if e.is_network_unavailable());
        self.connectivity.set_online(online);
    }

    async fn temporary_id(&self) -> Result<MealId, SyncError> {
        loop {
            let candidate = random_temporary_id();
            if !self.cache.contains(candidate).await? {
                return Ok(candidate);
            }
        }
    }

    /// Writes a server-confirmed copy unless the local copy holds changes
    /// that have not reached the server. Returns the copy now in the cache.
    async fn store_confirmed(&self, meal: Meal) -> Result<Meal, SyncError> {
        let id = meal.id.ok_or(SyncError::MissingId)?;
        if let Some(local) = self.cache.get(id).await? {
            if local.entity_state.is_pending() || local.has_conflict {
                debug!(id, state = %local.entity_state, "Keeping local copy with pending changes");
                return Ok(local);
            }
        }
        self.cache.set(id, &meal).await?;
        Ok(meal)
    }

    /// Caches one item of a listed page. List bodies may omit item
    /// versions; those go through the read path so the `ETag` header of
    /// `GET /meal/{id}` supplies one. An item whose version cannot be
    /// fetched is shown but not cached.
    async fn confirm_listed(&self, item: Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        if item.etag.is_some() {
            return self.store_confirmed(item).await;
        }
        let id = item.id.ok_or(SyncError::MissingId)?;
        match self.read_inner(id, liveness).await {
            Ok(read) => Ok(read),
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                warn!(id, error = %e, "Could not fetch version of listed meal");
                Ok(item)
            }
        }
    }

    async fn create_inner(&self, meal: &Meal, liveness: &Liveness) -> Result<(Meal, ActionPayload), SyncError> {
        let mut meal = meal.clone();
        if meal.user_id.is_none() {
            meal.user_id = self.session.borrow().user_id;
        }
        let previous = meal.id.filter(|id| *id < 0);

        let result = self.api.save(&meal).await;
        self.observe(&result);

        let stored = match result {
            Ok(saved) => {
                let id = saved.id.ok_or(SyncError::MissingId)?;
                let refetched = self.api.get_by_id(id, None).await;
                self.observe(&refetched);
                self.ensure_alive(liveness)?;

                let confirmed = match refetched {
                    Ok(Fetched::Fresh(fresh)) => fresh,
                    Ok(Fetched::NotModified) => saved,
                    Err(e) => {
                        warn!(id, error = %e, "Re-fetch after create failed");
                        if saved.etag.is_some() {
                            saved
                        } else {
                            // Without a version the next replay has to confirm it.
                            Meal {
                                entity_state: EntityState::Updated,
                                ..saved
                            }
                        }
                    }
                };

                self.cache.set(id, &confirmed).await?;
                if let Some(temp) = previous {
                    self.cache.purge(temp).await?;
                }
                confirmed
            }
            Err(e) if e.is_network_unavailable() => {
                self.ensure_alive(liveness)?;
                let id = match previous {
                    Some(temp) => temp,
                    None => self.temporary_id().await?,
                };
                debug!(id, "Offline: queued create under temporary id");

                meal.id = Some(id);
                meal.etag = None;
                meal.entity_state = EntityState::Added;
                meal.has_conflict = false;
                self.cache.set(id, &meal).await?;
                meal
            }
            Err(e) => return Err(e.into()),
        };

        let payload = match previous {
            Some(previous) if stored.id != Some(previous) => ActionPayload::Replaced {
                previous,
                meal: stored.clone(),
            },
            _ => ActionPayload::Upserted(stored.clone()),
        };
        Ok((stored, payload))
    }

    async fn read_inner(&self, id: MealId, liveness: &Liveness) -> Result<Meal, SyncError> {
        let cached = self.cache.get(id).await?;

        if let Some(local) = &cached {
            if local.is_temporary() || local.entity_state.is_pending() || local.has_conflict {
                self.ensure_alive(liveness)?;
                return Ok(local.clone());
            }
        }

        let etag = cached.as_ref().and_then(|meal| meal.etag.clone());
        let result = self.api.get_by_id(id, etag.as_deref()).await;
        self.observe(&result);
        self.ensure_alive(liveness)?;

        match result {
            Ok(Fetched::NotModified) => cached.ok_or(SyncError::NotCached(id)),
            Ok(Fetched::Fresh(fresh)) => {
                self.cache.set(id, &fresh).await?;
                Ok(fresh)
            }
            Err(e) if e.is_network_unavailable() => cached.ok_or(SyncError::NotCached(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_inner(&self, meal: &Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        let id = meal.id.ok_or(SyncError::MissingId)?;
        let cached = self.cache.get(id).await?;

        // Never seen by the server: the queued create will carry the edit.
        if meal.is_temporary() || cached.as_ref().map(|c| c.entity_state) == Some(EntityState::Added) {
            self.ensure_alive(liveness)?;
            let mut local = meal.clone();
            local.entity_state = EntityState::Added;
            local.etag = None;
            self.cache.set(id, &local).await?;
            return Ok(local);
        }

        let etag = cached.as_ref().and_then(|c| c.etag.clone());
        let result = self.api.update(meal, etag.as_deref()).await;
        self.observe(&result);

        match result {
            Ok(UpdateOutcome::Saved(saved)) => {
                self.ensure_alive(liveness)?;
                self.cache.set(id, &saved).await?;
                self.cache.remove_conflict(id).await?;
                Ok(saved)
            }
            Ok(UpdateOutcome::Conflict(server)) => {
                self.ensure_alive(liveness)?;
                debug!(id, "Update conflicted with server version");
                self.cache.set_conflict(id, &server).await?;

                let mut flagged = meal.clone();
                flagged.has_conflict = true;
                flagged.etag = None;
                flagged.entity_state = EntityState::Updated;
                self.cache.set(id, &flagged).await?;
                Ok(flagged)
            }
            Err(e) if e.is_network_unavailable() => {
                self.ensure_alive(liveness)?;
                let mut local = meal.clone();
                local.entity_state = EntityState::Updated;
                local.etag = etag;
                local.has_conflict = cached.map(|c| c.has_conflict).unwrap_or(false);
                self.cache.set(id, &local).await?;
                Ok(local)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_inner(&self, merged: &Meal, liveness: &Liveness) -> Result<Meal, SyncError> {
        let id = merged.id.ok_or(SyncError::MissingId)?;
        let shadow = self
            .cache
            .get_conflict(id)
            .await?
            .ok_or(SyncError::NoConflict(id))?;

        let result = self.api.update(merged, shadow.etag.as_deref()).await;
        self.observe(&result);

        match result {
            Ok(UpdateOutcome::Saved(saved)) => {
                self.ensure_alive(liveness)?;
                self.cache.set(id, &saved).await?;
                self.cache.remove_conflict(id).await?;
                Ok(saved)
            }
            Ok(UpdateOutcome::Conflict(newer)) => {
                self.ensure_alive(liveness)?;
                self.cache.set_conflict(id, &newer).await?;
                let mut flagged = merged.clone();
                flagged.has_conflict = true;
                flagged.etag = None;
                flagged.entity_state = EntityState::Updated;
                self.cache.set(id, &flagged).await?;
                Ok(flagged)
            }
            Err(e) if e.is_network_unavailable() => {
                // The merge is decided; replay sends it against the shadow's version.
                self.ensure_alive(liveness)?;
                let mut local = merged.clone();
                local.has_conflict = false;
                local.etag = shadow.etag;
                local.entity_state = EntityState::Updated;
                self.cache.set(id, &local).await?;
                self.cache.remove_conflict(id).await?;
                Ok(local)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_inner(&self, id: MealId, liveness: &Liveness) -> Result<MealId, SyncError> {
        if id < 0 {
            self.ensure_alive(liveness)?;
            self.cache.purge(id).await?;
            return Ok(id);
        }

        let result = self.api.delete_by_id(id).await;
        self.observe(&result);

        match result {
            Ok(_) => {
                self.ensure_alive(liveness)?;
                self.cache.purge(id).await?;
                Ok(id)
            }
            Err(RemoteError::Status { status: 404, .. }) => {
                self.ensure_alive(liveness)?;
                debug!(id, "Meal already gone on the server");
                self.cache.purge(id).await?;
                Ok(id)
            }
            Err(e) if e.is_network_unavailable() => {
                self.ensure_alive(liveness)?;
                match self.cache.get(id).await? {
                    Some(mut local) => {
                        local.entity_state = EntityState::Deleted;
                        self.cache.set(id, &local).await?;
                    }
                    None => warn!(id, "Offline delete of a meal that is not cached"),
                }
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_inner(&self, page: u32, filter: &MealFilter, liveness: &Liveness) -> Result<Page, SyncError> {
        let fingerprint = filter.fingerprint(page);
        let cached = self.cache.get_batch(&fingerprint).await?;
        let etag = if page == 0 {
            cached.as_ref().and_then(|batch| batch.etag.clone())
        } else {
            None
        };

        let query = PageQuery::new(page, self.page_size, filter.clone());
        let result = self.api.list_page(&query, etag.as_deref()).await;
        self.observe(&result);
        self.ensure_alive(liveness)?;

        match result {
            Ok(Fetched::Fresh(batch)) => {
                let is_last = batch.is_last(self.page_size);
                let mut items = Vec::with_capacity(batch.items.len());
                for item in batch.items.iter().cloned() {
                    let stored = self.confirm_listed(item, liveness).await?;
                    if stored.entity_state != EntityState::Deleted {
                        items.push(stored);
                    }
                }
                self.cache.set_batch(&fingerprint, &batch).await?;
                Ok(Page {
                    page,
                    items,
                    is_last,
                    source: PageSource::Remote,
                })
            }
            Ok(Fetched::NotModified) => match cached {
                Some(batch) => Ok(Page {
                    page,
                    is_last: batch.is_last(self.page_size),
                    items: batch.items,
                    source: PageSource::NotModified,
                }),
                None => self.offline_page(page, filter).await,
            },
            Err(e) if e.is_network_unavailable() => self.offline_page(page, filter).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Builds a page from cached records of the signed-in user.
    async fn offline_page(&self, page: u32, filter: &MealFilter) -> Result<Page, SyncError> {
        let user_id = self.session.borrow().user_id;
        let mut meals: Vec<Meal> = self
            .cache
            .meals()
            .await?
            .into_iter()
            .filter(|meal| meal.entity_state != EntityState::Deleted)
            .filter(|meal| user_id.is_none() || meal.user_id == user_id)
            .filter(|meal| filter.matches(meal))
            .collect();
        meals.sort_by(compare_recent_first);

        let items: Vec<Meal> = meals
            .into_iter()
            .skip(page as usize * self.page_size)
            .take(self.page_size)
            .collect();

        Ok(Page {
            page,
            is_last: items.len() < self.page_size,
            items,
            source: PageSource::Offline,
        })
    }
}
