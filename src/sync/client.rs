//! HTTP client for the remote meal service.
//!
//! Every call is classified into a typed outcome: conditional requests
//! come back as `Fetched::NotModified` or `UpdateOutcome::Conflict`, and
//! only genuine failures become a [`RemoteError`].

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{RequestBuilder, Response, StatusCode};

use super::error::RemoteError;
use crate::models::{Batch, Meal, MealFilter, MealId};

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Fresh(T),
    NotModified,
}

/// Result of a conditional PUT.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Saved(Meal),
    /// The server rejected the write; this is its current version.
    Conflict(Meal),
}

/// One listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub page: u32,
    pub size: usize,
    pub filter: MealFilter,
}

impl PageQuery {
    pub fn new(page: u32, size: usize, filter: MealFilter) -> Self {
        Self { page, size, filter }
    }

    /// Query string for `GET /meal`.
    pub fn to_query_string(&self) -> String {
        let mut query = format!("page={}&size={}&sortBy=date", self.page, self.size);
        if let Some(prefix) = &self.filter.by_comment {
            query.push_str("&byComment=");
            query.push_str(&urlencoding::encode(prefix));
        }
        if let Some(eaten) = self.filter.is_eaten {
            query.push_str(&format!("&isEaten={}", eaten));
        }
        query
    }
}

/// Transport seam between the coordinator and the remote service.
pub trait MealApi: Send + Sync {
    fn save(&self, meal: &Meal) -> impl Future<Output = Result<Meal, RemoteError>> + Send;

    /// PUT with `If-Match: etag` when an etag is given.
    fn update(
        &self,
        meal: &Meal,
        etag: Option<&str>,
    ) -> impl Future<Output = Result<UpdateOutcome, RemoteError>> + Send;

    /// GET with `If-None-Match: etag` when an etag is given.
    fn get_by_id(
        &self,
        id: MealId,
        etag: Option<&str>,
    ) -> impl Future<Output = Result<Fetched<Meal>, RemoteError>> + Send;

    fn list_page(
        &self,
        query: &PageQuery,
        etag: Option<&str>,
    ) -> impl Future<Output = Result<Fetched<Batch>, RemoteError>> + Send;

    fn delete_by_id(&self, id: MealId) -> impl Future<Output = Result<Meal, RemoteError>> + Send;

    /// Replaces the bearer token attached to subsequent requests.
    fn set_token(&self, token: Option<String>);

    /// Cheap reachability probe.
    fn health(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// `MealApi` over HTTP with `reqwest`.
#[derive(Debug)]
pub struct RemoteClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl RemoteClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            base_url: http_base_url(server_url),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        self.authorized(request)
            .send()
            .await
            .map_err(classify_transport_error)
    }
}

/// Any failure before a response arrives means the service is unreachable.
fn classify_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::InvalidResponse(e.to_string())
    } else {
        RemoteError::NetworkUnavailable(e.to_string())
    }
}

fn response_etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

async fn status_error(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RemoteError::Status { status, body }
}

/// Decodes a meal body and stamps it with the response's etag.
async fn decode_meal(response: Response) -> Result<Meal, RemoteError> {
    let etag = response_etag(&response);
    let meal: Meal = response
        .json()
        .await
        .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
    Ok(meal.confirmed(etag))
}

impl MealApi for RemoteClient {
    async fn save(&self, meal: &Meal) -> Result<Meal, RemoteError> {
        let mut payload = meal.payload();
        // The server assigns ids; temporary ones never leave the device.
        if meal.is_temporary() {
            payload.id = None;
        }

        let response = self.send(self.http.post(self.url("/meal")).json(&payload)).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        decode_meal(response).await
    }

    async fn update(&self, meal: &Meal, etag: Option<&str>) -> Result<UpdateOutcome, RemoteError> {
        let id = meal
            .id
            .ok_or_else(|| RemoteError::InvalidResponse("Cannot update a meal without id".into()))?;

        let mut request = self
            .http
            .put(self.url(&format!("/meal/{}", id)))
            .json(&meal.payload());
        if let Some(etag) = etag {
            request = request.header(IF_MATCH, etag);
        }

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::PRECONDITION_FAILED => {
                Ok(UpdateOutcome::Conflict(decode_meal(response).await?))
            }
            status if status.is_success() => Ok(UpdateOutcome::Saved(decode_meal(response).await?)),
            _ => Err(status_error(response).await),
        }
    }

    async fn get_by_id(&self, id: MealId, etag: Option<&str>) -> Result<Fetched<Meal>, RemoteError> {
        let mut request = self.http.get(self.url(&format!("/meal/{}", id)));
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(Fetched::NotModified),
            status if status.is_success() => Ok(Fetched::Fresh(decode_meal(response).await?)),
            _ => Err(status_error(response).await),
        }
    }

    async fn list_page(
        &self,
        query: &PageQuery,
        etag: Option<&str>,
    ) -> Result<Fetched<Batch>, RemoteError> {
        let url = self.url(&format!("/meal?{}", query.to_query_string()));
        let mut request = self.http.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(Fetched::NotModified),
            status if status.is_success() => {
                let etag = response_etag(&response);
                let items: Vec<Meal> = response
                    .json()
                    .await
                    .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
                Ok(Fetched::Fresh(Batch::new(query.page, items, etag)))
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn delete_by_id(&self, id: MealId) -> Result<Meal, RemoteError> {
        let response = self
            .send(self.http.delete(self.url(&format!("/meal/{}", id))))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let meal: Meal = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(meal)
    }

    fn set_token(&self, token: Option<String>) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    async fn health(&self) -> Result<(), RemoteError> {
        let response = self.send(self.http.get(self.url("/health"))).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

/// Normalizes a configured server URL to its `http(s)` form.
pub fn http_base_url(server_url: &str) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };

    base_url.trim_end_matches('/').to_string()
}

/// Normalizes a configured server URL to its `ws(s)` form.
pub fn ws_base_url(server_url: &str) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        format!("ws://{}", server_url)
    } else {
        server_url.to_string()
    };

    base_url.trim_end_matches('/').to_string()
}
