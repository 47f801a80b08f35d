//! A reference server on an ephemeral port for client tests.

use tokio::task::JoinHandle;

use super::auth::ApiKeyStore;
use super::routes::{router, AppState};

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_USER_ID: i64 = 1;
pub const OTHER_TOKEN: &str = "other-token";
pub const OTHER_USER_ID: i64 = 2;

pub fn test_state() -> AppState {
    AppState::new(ApiKeyStore::from_entries([
        (TEST_TOKEN.to_string(), TEST_USER_ID),
        (OTHER_TOKEN.to_string(), OTHER_USER_ID),
    ]))
}

pub struct TestServer {
    pub url: String,
    pub state: AppState,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    let state = test_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = router(state.clone());
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        url: format!("http://{}", addr),
        state,
        handle,
    }
}
