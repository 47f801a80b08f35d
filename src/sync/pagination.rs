//! Page bookkeeping for infinite-scroll listings.

use std::sync::Arc;

use super::client::MealApi;
use super::coordinator::{Page, SyncCoordinator};
use super::error::SyncError;
use super::liveness::Liveness;
use crate::models::MealFilter;

/// Walks the pages of one filter.
///
/// `fetch_next` advances the page counter whether or not the fetch
/// succeeds, so a failing page is skipped rather than retried forever.
pub struct PaginationCursor<A: MealApi> {
    coordinator: Arc<SyncCoordinator<A>>,
    filter: MealFilter,
    fingerprint: String,
    page: u32,
    reached_end: bool,
}

impl<A: MealApi> PaginationCursor<A> {
    pub fn new(coordinator: Arc<SyncCoordinator<A>>, filter: MealFilter) -> Self {
        let fingerprint = filter.fingerprint(0);
        Self {
            coordinator,
            filter,
            fingerprint,
            page: 0,
            reached_end: false,
        }
    }

    /// The page the next `fetch_next` will request.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn filter(&self) -> &MealFilter {
        &self.filter
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    /// Switches filters. A different filter restarts at page 0.
    pub fn set_filter(&mut self, filter: MealFilter) {
        let fingerprint = filter.fingerprint(0);
        if fingerprint != self.fingerprint {
            self.filter = filter;
            self.fingerprint = fingerprint;
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.page = 0;
        self.reached_end = false;
    }

    pub async fn fetch_next(&mut self, liveness: &Liveness) -> Result<Page, SyncError> {
        let page = self.page;
        self.page += 1;

        let result = self
            .coordinator
            .list(page, self.filter.clone(), liveness)
            .await;
        if let Ok(listed) = &result {
            self.reached_end = listed.is_last;
        }
        result
    }
}
