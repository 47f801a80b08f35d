//! Sync error types.

use thiserror::Error;

use crate::db::CacheError;
use crate::models::MealId;

/// Classified failure of a call to the remote meal service.
///
/// `NotModified` and `Conflict` are not errors; they are outcome variants
/// of the calls that can produce them.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// No response reached us: connection refused, DNS failure, timeout.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    /// Any non-2xx status other than 304 and 412.
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The server answered but the body could not be decoded.
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// The single signal used to choose the offline path.
    pub fn is_network_unavailable(&self) -> bool {
        matches!(self, RemoteError::NetworkUnavailable(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors returned by the sync coordinator and the components around it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Meal {0} is not available offline")]
    NotCached(MealId),
    #[error("Meal has no id")]
    MissingId,
    #[error("No conflict recorded for meal {0}")]
    NoConflict(MealId),
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Cache(CacheError::Storage(e))
    }
}
