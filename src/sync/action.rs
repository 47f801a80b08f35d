//! Observable lifecycle of coordinator operations.
//!
//! Every public operation emits `Started` and then exactly one of
//! `Succeeded` or `Failed`. [`reduce`] folds those events into the
//! [`MealState`] that presentation code renders.

use std::fmt;

use crate::models::{compare_recent_first, Meal, MealId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    GetOne,
    GetPaged,
    Save,
    Update,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::GetOne => write!(f, "GET_ONE"),
            ActionKind::GetPaged => write!(f, "GET_PAGED"),
            ActionKind::Save => write!(f, "SAVE"),
            ActionKind::Update => write!(f, "UPDATE"),
            ActionKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// What a successful operation changed in the listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// A page of results. Page 0 replaces the listing; later pages extend it.
    Listed { page: u32, items: Vec<Meal> },
    /// A single record was read; replaces a listed copy if there is one.
    Fetched(Meal),
    /// A record was created or changed; inserted at the front when new.
    Upserted(Meal),
    /// A record is gone from the listing.
    Removed(MealId),
    /// A queued create reached the server: the temporary id is retired.
    Replaced { previous: MealId, meal: Meal },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MealEvent {
    Started(ActionKind),
    Succeeded(ActionKind, ActionPayload),
    Failed(ActionKind, String),
}

/// Listing state published to observers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MealState {
    pub data: Vec<Meal>,
    pub executing: bool,
    pub action: Option<ActionKind>,
    pub action_error: Option<String>,
}

impl MealState {
    pub fn find(&self, id: MealId) -> Option<&Meal> {
        self.data.iter().find(|meal| meal.id == Some(id))
    }
}

/// Applies one event to the state. Pure; never touches I/O.
pub fn reduce(mut state: MealState, event: MealEvent) -> MealState {
    match event {
        MealEvent::Started(kind) => {
            state.executing = true;
            state.action = Some(kind);
            state.action_error = None;
        }
        MealEvent::Failed(kind, message) => {
            state.executing = false;
            state.action = Some(kind);
            state.action_error = Some(message);
        }
        MealEvent::Succeeded(kind, payload) => {
            state.executing = false;
            state.action = Some(kind);
            state.action_error = None;
            apply_payload(&mut state.data, payload);
        }
    }
    state
}

fn apply_payload(data: &mut Vec<Meal>, payload: ActionPayload) {
    match payload {
        ActionPayload::Listed { page: 0, items } => {
            *data = items;
        }
        ActionPayload::Listed { items, .. } => {
            for item in items {
                match position(data, item.id) {
                    Some(index) => data[index] = item,
                    None => data.push(item),
                }
            }
        }
        ActionPayload::Fetched(meal) => {
            if let Some(index) = position(data, meal.id) {
                data[index] = meal;
            }
        }
        ActionPayload::Upserted(meal) => match position(data, meal.id) {
            Some(index) => data[index] = meal,
            None => {
                data.insert(0, meal);
                data.sort_by(compare_recent_first);
            }
        },
        ActionPayload::Removed(id) => {
            data.retain(|meal| meal.id != Some(id));
        }
        ActionPayload::Replaced { previous, meal } => {
            data.retain(|existing| existing.id != Some(previous));
            apply_payload(data, ActionPayload::Upserted(meal));
        }
    }
}

fn position(data: &[Meal], id: Option<MealId>) -> Option<usize> {
    id.and_then(|id| data.iter().position(|meal| meal.id == Some(id)))
}
