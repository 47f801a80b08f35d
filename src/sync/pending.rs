//! Replays writes queued while offline.
//!
//! Records with a pending `entity_state` and no conflict are sent again in
//! cache order: `Added` as a create (retiring the temporary id), `Updated`
//! as an update against the cached etag, `Deleted` as a delete. Conflicted
//! records wait for the user.

use std::sync::Arc;

use tracing::{info, warn};

use super::client::MealApi;
use super::connectivity::wait_for_reconnect;
use super::coordinator::SyncCoordinator;
use super::error::SyncError;
use super::liveness::Liveness;
use crate::models::EntityState;

/// Counts from one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Conflicted records left for the user.
    pub skipped: usize,
    pub failed: usize,
    /// Writes that hit the network outage again and stay queued.
    pub deferred: usize,
}

impl ReplaySummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

pub struct PendingChangeTracker<A: MealApi> {
    coordinator: Arc<SyncCoordinator<A>>,
}

impl<A: MealApi + 'static> PendingChangeTracker<A> {
    pub fn new(coordinator: Arc<SyncCoordinator<A>>) -> Self {
        Self { coordinator }
    }

    /// Sends every queued write once.
    pub async fn replay(&self, liveness: &Liveness) -> Result<ReplaySummary, SyncError> {
        let mut summary = ReplaySummary::default();
        let pending: Vec<_> = self
            .coordinator
            .cache()
            .meals()
            .await?
            .into_iter()
            .filter(|meal| meal.entity_state.is_pending())
            .collect();

        for meal in pending {
            if meal.has_conflict {
                summary.skipped += 1;
                continue;
            }
            let Some(id) = meal.id else {
                continue;
            };

            let result = match meal.entity_state {
                EntityState::Added => self
                    .coordinator
                    .create(&meal, liveness)
                    .await
                    .map(|stored| !stored.is_temporary()),
                EntityState::Updated => self
                    .coordinator
                    .update(&meal, liveness)
                    .await
                    .map(|stored| stored.entity_state == EntityState::Unchanged || stored.has_conflict),
                // Still cached afterwards means the delete met the outage again.
                EntityState::Deleted => match self.coordinator.remove(id, liveness).await {
                    Ok(_) => self.coordinator.get(id).await.map(|left| left.is_none()),
                    Err(e) => Err(e),
                },
                EntityState::Unchanged => continue,
            };

            match result {
                Ok(true) => match meal.entity_state {
                    EntityState::Added => summary.created += 1,
                    EntityState::Updated => summary.updated += 1,
                    _ => summary.deleted += 1,
                },
                Ok(false) => summary.deferred += 1,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(id, error = %e, "Replay of queued change failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            failed = summary.failed,
            deferred = summary.deferred,
            "Replayed queued changes"
        );
        Ok(summary)
    }

    /// Replays once per offline→online transition, then reloads page 0.
    /// Returns when the connectivity signal is dropped or `liveness` is
    /// cancelled.
    pub async fn run(self, liveness: Liveness) {
        let mut online = self.coordinator.connectivity().subscribe();
        while liveness.is_alive() {
            if !wait_for_reconnect(&mut online).await {
                break;
            }
            if !liveness.is_alive() {
                break;
            }
            info!("Back online, replaying queued changes");
            if let Err(e) = self.replay(&liveness).await {
                warn!(error = %e, "Replay failed");
                continue;
            }
            if let Err(e) = self.coordinator.refresh(&liveness).await {
                warn!(error = %e, "Refresh after replay failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_cache, TestContext};
    use crate::models::{Meal, MealFilter, Session};
    use crate::sync::connectivity::Connectivity;
    use crate::sync::testing::FakeApi;
    use chrono::{Duration, TimeZone, Utc};

    const USER: i64 = 1;

    struct Harness {
        coordinator: Arc<SyncCoordinator<FakeApi>>,
        api: Arc<FakeApi>,
        _ctx: TestContext,
    }

    async fn harness() -> Harness {
        let ctx = setup_cache().await;
        let api = Arc::new(FakeApi::new(USER));
        let coordinator = Arc::new(SyncCoordinator::new(
            api.clone(),
            ctx.cache.clone(),
            Connectivity::new(true),
            5,
        ));
        coordinator
            .set_session(Session::new("token", USER), &Liveness::new())
            .await
            .unwrap();
        Harness {
            coordinator,
            api,
            _ctx: ctx,
        }
    }

    fn meal(comment: &str, hour: i64) -> Meal {
        let base = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        Meal::new(comment, base + Duration::hours(hour))
    }

    async fn snapshot(coordinator: &SyncCoordinator<FakeApi>) -> Vec<Meal> {
        let mut meals = coordinator.cache().meals().await.unwrap();
        meals.sort_by_key(|m| m.id);
        meals
    }

    #[tokio::test]
    async fn test_offline_create_is_replaced_by_server_id() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        h.api.set_online(false);
        let queued = h.coordinator.create(&meal("Offline", 1), &live).await.unwrap();
        let temp = queued.id.unwrap();
        assert!(temp < 0);

        h.api.set_online(true);
        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary.created, 1);

        assert!(h.coordinator.get(temp).await.unwrap().is_none());
        let meals = snapshot(&h.coordinator).await;
        assert_eq!(meals.len(), 1);
        assert!(meals[0].id.unwrap() > 0);
        assert_eq!(meals[0].entity_state, EntityState::Unchanged);
        assert_eq!(meals[0].comment, "Offline");

        let state = h.coordinator.state();
        assert!(state.find(temp).is_none());
        assert_eq!(state.data.len(), 1);
    }

    #[tokio::test]
    async fn test_added_then_updated_collapses_into_one_create() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        h.api.set_online(false);
        let queued = h.coordinator.create(&meal("Draft", 1), &live).await.unwrap();
        let mut edited = queued.clone();
        edited.comment = "Final".into();
        h.coordinator.update(&edited, &live).await.unwrap();

        h.api.set_online(true);
        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 0);

        let (items, _) = h.api.store().list(USER, 0, 5, &MealFilter::new());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].comment, "Final");
    }

    #[tokio::test]
    async fn test_replays_updates_and_deletes() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        let keep = h.coordinator.create(&meal("Keep", 1), &live).await.unwrap();
        let drop_me = h.coordinator.create(&meal("Drop", 2), &live).await.unwrap();

        h.api.set_online(false);
        let mut edited = keep.clone();
        edited.eaten = true;
        h.coordinator.update(&edited, &live).await.unwrap();
        h.coordinator.remove(drop_me.id.unwrap(), &live).await.unwrap();

        h.api.set_online(true);
        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.failed, 0);

        assert!(h.api.store().get(USER, keep.id.unwrap()).unwrap().eaten);
        assert!(h.api.store().get(USER, drop_me.id.unwrap()).is_err());
        assert!(h.coordinator.get(drop_me.id.unwrap()).await.unwrap().is_none());
        let cached = h.coordinator.get(keep.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(cached.entity_state, EntityState::Unchanged);
    }

    #[tokio::test]
    async fn test_conflicted_records_are_skipped() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        let created = h.coordinator.create(&meal("Shared", 1), &live).await.unwrap();
        let id = created.id.unwrap();
        h.api.store().update(USER, id, &meal("Other device", 1), None).unwrap();
        h.coordinator.update(&created, &live).await.unwrap();

        h.api.reset_counters();
        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 0);
        assert_eq!(h.api.call_count(), 0);
        assert!(h.coordinator.get(id).await.unwrap().unwrap().has_conflict);
    }

    #[tokio::test]
    async fn test_offline_update_replay_can_conflict() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        let created = h.coordinator.create(&meal("Mine", 1), &live).await.unwrap();
        let id = created.id.unwrap();
        h.api.set_online(false);
        let mut edited = created.clone();
        edited.comment = "Mine, offline".into();
        h.coordinator.update(&edited, &live).await.unwrap();

        h.api.set_online(true);
        h.api.store().update(USER, id, &meal("Theirs", 1), None).unwrap();

        tracker.replay(&live).await.unwrap();
        let cached = h.coordinator.get(id).await.unwrap().unwrap();
        assert!(cached.has_conflict);
        assert_eq!(cached.comment, "Mine, offline");
        assert_eq!(h.coordinator.conflict(id).await.unwrap().unwrap().comment, "Theirs");
    }

    #[tokio::test]
    async fn test_replay_while_still_offline_defers() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        h.api.set_online(false);
        let queued = h.coordinator.create(&meal("Later", 1), &live).await.unwrap();

        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.created, 0);
        // Same temporary id is reused.
        let meals = snapshot(&h.coordinator).await;
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].id, queued.id);
    }

    #[tokio::test]
    async fn test_replay_twice_is_idempotent() {
        let h = harness().await;
        let live = Liveness::new();
        let tracker = PendingChangeTracker::new(h.coordinator.clone());

        let keep = h.coordinator.create(&meal("Keep", 1), &live).await.unwrap();
        h.api.set_online(false);
        h.coordinator.create(&meal("New", 2), &live).await.unwrap();
        let mut edited = keep.clone();
        edited.price = 3.0;
        h.coordinator.update(&edited, &live).await.unwrap();
        h.api.set_online(true);

        tracker.replay(&live).await.unwrap();
        let once = snapshot(&h.coordinator).await;

        let summary = tracker.replay(&live).await.unwrap();
        assert_eq!(summary, ReplaySummary::default());
        assert_eq!(snapshot(&h.coordinator).await, once);
    }

    #[tokio::test]
    async fn test_run_replays_once_per_reconnect() {
        let h = harness().await;
        let live = Liveness::new();
        let connectivity = h.coordinator.connectivity().clone();

        h.api.set_online(false);
        h.coordinator.create(&meal("Queued", 1), &live).await.unwrap();
        assert!(!connectivity.is_online());

        let tracker = PendingChangeTracker::new(h.coordinator.clone());
        let run_liveness = Liveness::new();
        let handle = tokio::spawn(tracker.run(run_liveness.clone()));
        tokio::task::yield_now().await;

        h.api.set_online(true);
        connectivity.set_online(true);

        let mut replayed = false;
        for _ in 0..100 {
            let (items, _) = h.api.store().list(USER, 0, 5, &MealFilter::new());
            if items.len() == 1 {
                replayed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(replayed);

        // Another "online" notification without an offline period does nothing.
        connectivity.set_online(true);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.api.store().list(USER, 0, 5, &MealFilter::new()).0.len(), 1);

        run_liveness.cancel();
        handle.abort();
    }
}
