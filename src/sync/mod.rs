//! Offline-first synchronization of meal records.
//!
//! [`SyncCoordinator`] serves reads and writes from the local cache and
//! the remote service. While the service is unreachable, changes are
//! tagged with an [`crate::models::EntityState`] and later replayed by the
//! [`PendingChangeTracker`]. The [`LiveUpdateChannel`] applies changes
//! other devices push over a WebSocket.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nutrisync::db::{init_db, LocalCache};
//! use nutrisync::models::{MealFilter, Session};
//! use nutrisync::sync::{Connectivity, Liveness, RemoteClient, SyncCoordinator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = init_db(std::path::Path::new("/tmp/nutrisync.db")).await?;
//! let api = Arc::new(RemoteClient::new("http://localhost:8080", Duration::from_secs(10))?);
//! let coordinator = SyncCoordinator::new(api, LocalCache::new(pool), Connectivity::new(true), 5);
//!
//! let liveness = Liveness::new();
//! coordinator.set_session(Session::new("api-key", 1), &liveness).await?;
//! let page = coordinator.list(0, MealFilter::new(), &liveness).await?;
//! println!("{} meals", page.items.len());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod client;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod live;
pub mod liveness;
pub mod pagination;
pub mod pending;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{reduce, ActionKind, ActionPayload, MealEvent, MealState};
pub use client::{Fetched, MealApi, PageQuery, RemoteClient, UpdateOutcome};
pub use connectivity::{monitor, wait_for_reconnect, Connectivity};
pub use coordinator::{Page, PageSource, SyncCoordinator};
pub use error::{RemoteError, SyncError};
pub use live::LiveUpdateChannel;
pub use liveness::Liveness;
pub use pagination::PaginationCursor;
pub use pending::{PendingChangeTracker, ReplaySummary};
