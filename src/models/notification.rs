use serde::{Deserialize, Serialize};

/// What happened to the entity carried by a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushAction {
    Save,
    Update,
    Delete,
}

/// A message on `/topic/meal/notification`:
/// `{"actionType": "SAVE", "data": {"userId": 1, "entity": {...}}}`.
///
/// The server sends wire payloads; clients decode full [`super::Meal`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope<E> {
    pub action_type: PushAction,
    pub data: PushData<E>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData<E> {
    pub user_id: i64,
    pub entity: E,
}

impl<E> PushEnvelope<E> {
    pub fn new(action_type: PushAction, user_id: i64, entity: E) -> Self {
        Self {
            action_type,
            data: PushData { user_id, entity },
        }
    }
}
