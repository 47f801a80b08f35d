use serde::{Deserialize, Serialize};
use std::fmt;

/// The signed-in user as seen by the sync engine.
///
/// Changing the session re-authenticates the transport, triggers a fresh
/// page-0 listing and reconnects the push channel.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: Option<String>,
    pub user_id: Option<i64>,
}

impl Session {
    pub fn new(token: impl Into<String>, user_id: i64) -> Self {
        Self {
            token: Some(token.into()),
            user_id: Some(user_id),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty()) && self.user_id.is_some()
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .finish()
    }
}
