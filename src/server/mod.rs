//! Reference meal service: REST endpoints with ETag concurrency control
//! and a WebSocket change feed.

pub mod auth;
pub mod notify;
pub mod routes;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use auth::{ApiKeyStore, AuthUser};
pub use notify::{Notification, Notifier};
pub use routes::{router, AppState};
pub use store::{MealStore, ServerStoreError};
