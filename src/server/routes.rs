//! REST and push endpoints of the reference server.
//!
//! - `GET /health`: health check (no auth required)
//! - `POST /meal`: create, `201` with `ETag`
//! - `GET /meal`: one page, `If-None-Match` aware
//! - `GET /meal/{id}`: one record, `If-None-Match` aware
//! - `PUT /meal/{id}`: replace, `412` with the current record on a stale `If-Match`
//! - `DELETE /meal/{id}`: delete, returns the removed record
//! - `GET /topic/meal/notification`: WebSocket push channel

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::auth::{auth_middleware, ApiKeyStore, AuthUser};
use super::notify::{Notification, Notifier};
use super::store::{etag_matches, MealStore, ServerStoreError};
use crate::models::{Meal, MealFilter, MealId, PushAction};

const DEFAULT_PAGE_SIZE: usize = 5;
const MAX_PAGE_SIZE: usize = 100;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub store: Arc<MealStore>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyStore) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            store: Arc::new(MealStore::new()),
            notifier: Arc::new(Notifier::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/meal", get(list_meals).post(create_meal))
        .route(
            "/meal/{id}",
            get(get_meal).put(update_meal).delete(delete_meal),
        )
        .route("/topic/meal/notification", get(notifications))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ApiError {
    error: &'static str,
    message: String,
}

fn store_error(error: ServerStoreError) -> Response {
    match error {
        ServerStoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "not_found",
                message: error.to_string(),
            }),
        )
            .into_response(),
        ServerStoreError::PreconditionFailed(current) => {
            meal_response(StatusCode::PRECONDITION_FAILED, &current)
        }
    }
}

/// Body without the etag; the version travels in the `ETag` header.
fn meal_response(status: StatusCode, meal: &Meal) -> Response {
    let etag = meal.etag.clone().unwrap_or_default();
    (status, [(header::ETAG, etag)], Json(meal.payload())).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn not_modified(etag: &str) -> Response {
    (StatusCode::NOT_MODIFIED, [(header::ETAG, etag.to_string())]).into_response()
}

async fn create_meal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(meal): Json<Meal>,
) -> Response {
    let created = state.store.create(user.user_id, &meal);
    tracing::info!(id = ?created.id, user_id = user.user_id, "Meal created");
    state
        .notifier
        .publish(PushAction::Save, user.user_id, &created);
    meal_response(StatusCode::CREATED, &created)
}

async fn get_meal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<MealId>,
    headers: HeaderMap,
) -> Response {
    let meal = match state.store.get(user.user_id, id) {
        Ok(meal) => meal,
        Err(e) => return store_error(e),
    };

    let current = meal.etag.as_deref().unwrap_or_default();
    if let Some(candidate) = header_str(&headers, header::IF_NONE_MATCH) {
        if etag_matches(candidate, current) {
            return not_modified(current);
        }
    }
    meal_response(StatusCode::OK, &meal)
}

async fn update_meal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<MealId>,
    headers: HeaderMap,
    Json(meal): Json<Meal>,
) -> Response {
    let if_match = header_str(&headers, header::IF_MATCH);
    match state.store.update(user.user_id, id, &meal, if_match) {
        Ok(saved) => {
            tracing::info!(id, user_id = user.user_id, "Meal updated");
            state
                .notifier
                .publish(PushAction::Update, user.user_id, &saved);
            meal_response(StatusCode::OK, &saved)
        }
        Err(e) => {
            if matches!(e, ServerStoreError::PreconditionFailed(_)) {
                tracing::info!(id, user_id = user.user_id, "Rejected stale update");
            }
            store_error(e)
        }
    }
}

async fn delete_meal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<MealId>,
) -> Response {
    match state.store.delete(user.user_id, id) {
        Ok(deleted) => {
            tracing::info!(id, user_id = user.user_id, "Meal deleted");
            state
                .notifier
                .publish(PushAction::Delete, user.user_id, &deleted);
            meal_response(StatusCode::OK, &deleted)
        }
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<u32>,
    size: Option<usize>,
    by_comment: Option<String>,
    is_eaten: Option<bool>,
}

impl ListParams {
    fn filter(&self) -> MealFilter {
        let mut filter = MealFilter::new();
        if let Some(prefix) = &self.by_comment {
            filter = filter.with_comment(prefix.clone());
        }
        if let Some(eaten) = self.is_eaten {
            filter = filter.with_eaten(eaten);
        }
        filter
    }
}

/// Always sorted by date, most recent first.
async fn list_meals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Response {
    let page = params.page.unwrap_or(0);
    let size = params
        .size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let (items, etag) = state
        .store
        .list(user.user_id, page, size, &params.filter());

    if let Some(candidate) = header_str(&headers, header::IF_NONE_MATCH) {
        if etag_matches(candidate, &etag) {
            return not_modified(&etag);
        }
    }

    // Item versions are not part of the list body; clients fetch them per id.
    let body: Vec<_> = items.iter().map(Meal::payload).collect();
    (StatusCode::OK, [(header::ETAG, etag.clone())], Json(body)).into_response()
}

async fn notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.notifier.subscribe();
    ws.on_upgrade(move |socket| forward_notifications(socket, rx, user))
}

/// Pushes every notification until either side goes away. Clients
/// discard events for other users.
async fn forward_notifications(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Notification>,
    user: AuthUser,
) {
    let connection = Uuid::new_v4();
    tracing::debug!(%connection, user_id = user.user_id, "Notification socket opened");

    loop {
        tokio::select! {
            notification = rx.recv() => match notification {
                Ok(Notification { text, .. }) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%connection, skipped, "Notification socket lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(%connection, "Notification socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{test_state, OTHER_TOKEN, TEST_TOKEN, TEST_USER_ID};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    fn lunch(comment: &str) -> Meal {
        Meal::new(comment, Utc.with_ymd_and_hms(2025, 4, 2, 12, 0, 0).unwrap())
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<&Meal>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(meal) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&meal.payload()).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn etag_of(response: &Response) -> String {
        response.headers()[header::ETAG].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let app = router(test_state());
        let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_meal_routes_need_auth() {
        let app = router(test_state());

        let response = app
            .clone()
            .oneshot(request("GET", "/meal", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/meal", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_sets_owner_and_etag() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .oneshot(request("POST", "/meal", Some(TEST_TOKEN), Some(&lunch("Soup"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let etag = etag_of(&response);

        let created: Meal = body_json(response).await;
        assert_eq!(created.user_id, Some(TEST_USER_ID));
        let stored = state.store.get(TEST_USER_ID, created.id.unwrap()).unwrap();
        assert_eq!(stored.etag.as_deref(), Some(etag.as_str()));
    }

    #[tokio::test]
    async fn test_conditional_get_and_put() {
        let state = test_state();
        let created = state.store.create(TEST_USER_ID, &lunch("Soup"));
        let id = created.id.unwrap();
        let v1 = created.etag.clone().unwrap();
        let uri = format!("/meal/{}", id);
        let app = router(state.clone());

        let mut get = request("GET", &uri, Some(TEST_TOKEN), None);
        get.headers_mut()
            .insert(header::IF_NONE_MATCH, v1.parse().unwrap());
        let response = app.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let mut put = request("PUT", &uri, Some(TEST_TOKEN), Some(&lunch("Stew")));
        put.headers_mut().insert(header::IF_MATCH, v1.parse().unwrap());
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v2 = etag_of(&response);
        assert_ne!(v1, v2);

        let mut stale = request("PUT", &uri, Some(TEST_TOKEN), Some(&lunch("Late")));
        stale.headers_mut().insert(header::IF_MATCH, v1.parse().unwrap());
        let response = app.oneshot(stale).await.unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(etag_of(&response), v2);
        let current: Meal = body_json(response).await;
        assert_eq!(current.comment, "Stew");
    }

    #[tokio::test]
    async fn test_list_query_params() {
        let state = test_state();
        for (hour, comment) in ["Lunch", "Dinner", "Lunch box"].iter().enumerate() {
            let meal = Meal::new(*comment, Utc.with_ymd_and_hms(2025, 4, 2, hour as u32, 0, 0).unwrap())
                .with_eaten(hour != 2);
            state.store.create(TEST_USER_ID, &meal);
        }
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("GET", "/meal?page=0&size=5&sortBy=date&byComment=Lunch", Some(TEST_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = etag_of(&response);
        let items: Vec<Meal> = body_json(response).await;
        let comments: Vec<_> = items.iter().map(|m| m.comment.as_str()).collect();
        assert_eq!(comments, vec!["Lunch box", "Lunch"]);
        assert!(items.iter().all(|m| m.etag.is_none()));

        let mut again = request("GET", "/meal?page=0&size=5&sortBy=date&byComment=Lunch", Some(TEST_TOKEN), None);
        again.headers_mut().insert(header::IF_NONE_MATCH, etag.parse().unwrap());
        let response = app.clone().oneshot(again).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let response = app
            .oneshot(request("GET", "/meal?byComment=Lunch&isEaten=true", Some(TEST_TOKEN), None))
            .await
            .unwrap();
        let items: Vec<Meal> = body_json(response).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].comment, "Lunch");
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let state = test_state();
        let id = state.store.create(TEST_USER_ID, &lunch("Mine")).id.unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/meal/{}", id), Some(OTHER_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("DELETE", &format!("/meal/{}", id), Some(OTHER_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_publishes_notification() {
        let state = test_state();
        let id = state.store.create(TEST_USER_ID, &lunch("Gone")).id.unwrap();
        let mut rx = state.notifier.subscribe();
        let app = router(state);

        let response = app
            .oneshot(request("DELETE", &format!("/meal/{}", id), Some(TEST_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.user_id, TEST_USER_ID);
        assert!(notification.text.contains("\"actionType\":\"DELETE\""));
    }
}
