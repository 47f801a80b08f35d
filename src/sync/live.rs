//! Push-driven reconciliation over the `/topic/meal/notification` socket.
//!
//! Missed events are never replayed: after every (re)connect the channel
//! reloads page 0, which is the only recovery path.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::action::{ActionKind, ActionPayload, MealEvent};
use super::client::{ws_base_url, Fetched, MealApi};
use super::connectivity::wait_for_reconnect;
use super::coordinator::SyncCoordinator;
use super::error::SyncError;
use super::liveness::Liveness;
use crate::models::{EntityState, Meal, MealId, PushAction, PushEnvelope, Session};

fn unconfirmed(entity: Meal) -> Meal {
    Meal {
        entity_state: EntityState::Updated,
        etag: None,
        has_conflict: false,
        ..entity
    }
}

/// Why a connected socket stopped being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Dropped,
    SessionChanged,
    Reconnect,
    Cancelled,
}

pub struct LiveUpdateChannel<A: MealApi> {
    coordinator: Arc<SyncCoordinator<A>>,
    ws_base: String,
    reconnect_delay: Duration,
}

impl<A: MealApi + 'static> LiveUpdateChannel<A> {
    pub fn new(coordinator: Arc<SyncCoordinator<A>>, server_url: &str, reconnect_delay: Duration) -> Self {
        Self {
            coordinator,
            ws_base: ws_base_url(server_url),
            reconnect_delay,
        }
    }

    pub fn notification_url(&self, token: &str) -> String {
        format!(
            "{}/topic/meal/notification?token={}",
            self.ws_base,
            urlencoding::encode(token)
        )
    }

    /// Applies one push event. Returns `false` when the event belongs to
    /// another user and was discarded.
    pub async fn apply(&self, envelope: PushEnvelope<Meal>) -> Result<bool, SyncError> {
        let session = self.coordinator.session();
        if session.user_id != Some(envelope.data.user_id) {
            debug!(user_id = envelope.data.user_id, "Discarding push for another user");
            return Ok(false);
        }

        let entity = envelope.data.entity;
        let id = entity.id.ok_or(SyncError::MissingId)?;
        let cache = self.coordinator.cache();

        match envelope.action_type {
            PushAction::Save | PushAction::Update => {
                let meal = match entity.etag.clone() {
                    Some(etag) => entity.confirmed(Some(etag)),
                    None => self.fetch_version(id, entity).await,
                };
                cache.set(id, &meal).await?;
                let kind = if envelope.action_type == PushAction::Save {
                    ActionKind::Save
                } else {
                    ActionKind::Update
                };
                self.coordinator
                    .dispatch(MealEvent::Succeeded(kind, ActionPayload::Upserted(meal)));
            }
            PushAction::Delete => {
                cache.purge(id).await?;
                self.coordinator.dispatch(MealEvent::Succeeded(
                    ActionKind::Delete,
                    ActionPayload::Removed(id),
                ));
            }
        }
        Ok(true)
    }

    /// Events may arrive without a version. The record is re-fetched so the
    /// cached copy carries the server's `ETag`; if that fails it is queued
    /// as `Updated` and the next replay confirms it.
    async fn fetch_version(&self, id: MealId, entity: Meal) -> Meal {
        let result = self.coordinator.api().get_by_id(id, None).await;
        match result {
            Ok(Fetched::Fresh(fresh)) if fresh.etag.is_some() => fresh,
            Ok(_) => {
                warn!(id, "Server sent no version for pushed meal");
                unconfirmed(entity)
            }
            Err(e) => {
                warn!(id, error = %e, "Could not fetch version of pushed meal");
                unconfirmed(entity)
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<PushEnvelope<Meal>>(text) {
            Ok(envelope) => {
                if let Err(e) = self.apply(envelope).await {
                    warn!(error = %e, "Failed to apply push event");
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed push message"),
        }
    }

    /// Keeps a socket open for the signed-in user until `liveness` is
    /// cancelled or the session channel closes. Reconnects on session
    /// change, on offline→online transitions and after drops.
    pub async fn run(self, liveness: Liveness) {
        let mut session_rx = self.coordinator.subscribe_session();
        let mut online_rx = self.coordinator.connectivity().subscribe();

        while liveness.is_alive() {
            let session: Session = session_rx.borrow_and_update().clone();
            let token = match (&session.token, session.is_authenticated()) {
                (Some(token), true) => token.clone(),
                _ => {
                    if session_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match connect_async(self.notification_url(&token)).await {
                Ok((ws, _)) => {
                    info!("Push channel connected");
                    self.coordinator.connectivity().set_online(true);
                    if let Err(e) = self.coordinator.refresh(&liveness).await {
                        warn!(error = %e, "Refresh after connect failed");
                    }
                    // This connection already covers any reconnect seen so far.
                    online_rx.borrow_and_update();

                    match self.pump(ws, &mut session_rx, &mut online_rx, &liveness).await {
                        Disconnect::Cancelled => break,
                        Disconnect::SessionChanged | Disconnect::Reconnect => continue,
                        Disconnect::Dropped => {
                            info!("Push channel dropped");
                            self.coordinator.connectivity().set_online(false);
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Push channel connect failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                reconnected = wait_for_reconnect(&mut online_rx) => {
                    if !reconnected {
                        break;
                    }
                }
            }
        }
        debug!("Push channel stopped");
    }

    async fn pump<S>(
        &self,
        ws: S,
        session_rx: &mut watch::Receiver<Session>,
        online_rx: &mut watch::Receiver<bool>,
        liveness: &Liveness,
    ) -> Disconnect
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut sender, mut receiver) = ws.split();

        let reason = loop {
            if !liveness.is_alive() {
                break Disconnect::Cancelled;
            }

            tokio::select! {
                message = receiver.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break Disconnect::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Disconnect::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Push channel error");
                        break Disconnect::Dropped;
                    }
                },
                changed = session_rx.changed() => {
                    break if changed.is_err() {
                        Disconnect::Cancelled
                    } else {
                        Disconnect::SessionChanged
                    };
                }
                reconnected = wait_for_reconnect(online_rx) => {
                    break if reconnected {
                        Disconnect::Reconnect
                    } else {
                        Disconnect::Cancelled
                    };
                }
            }
        };

        if reason != Disconnect::Dropped {
            let _ = sender.send(Message::Close(None)).await;
        }
        reason
    }
}
