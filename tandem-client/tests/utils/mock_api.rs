use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tandem_client::auth::{ApiError, ApiRequest, ApiResponse, ApiTransport};
use tandem_core::utils::REFRESH_PATH;
use tokio::sync::Mutex;

/// HTTP stand-in. Paths without a scripted route answer 401 until a
/// refresh succeeds, then 200.
#[derive(Clone)]
pub struct MockApi {
    authorized: Arc<AtomicBool>,
    refresh_succeeds: Arc<AtomicBool>,
    refresh_delay: Duration,
    refresh_calls: Arc<AtomicUsize>,
    routes: Arc<Mutex<HashMap<String, (u16, Value)>>>,
    calls: Arc<Mutex<Vec<ApiRequest>>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            authorized: Arc::new(AtomicBool::new(false)),
            refresh_succeeds: Arc::new(AtomicBool::new(true)),
            refresh_delay: Duration::from_millis(50),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Starts with a valid session.
    pub fn authorized() -> Self {
        let api = Self::new();
        api.authorized.store(true, Ordering::SeqCst);
        api
    }

    pub fn set_refresh_succeeds(&self, succeeds: bool) {
        self.refresh_succeeds.store(succeeds, Ordering::SeqCst);
    }

    pub async fn route(&self, path: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .await
            .insert(path.to_owned(), (status, body));
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub async fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiTransport for MockApi {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.calls.lock().await.push(request.clone());

        if request.path == REFRESH_PATH {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.refresh_delay).await;
            if self.refresh_succeeds.load(Ordering::SeqCst) {
                self.authorized.store(true, Ordering::SeqCst);
                return Ok(ApiResponse {
                    status: 200,
                    body: Value::Null,
                });
            }
            return Ok(ApiResponse {
                status: 401,
                body: Value::Null,
            });
        }

        if let Some((status, body)) = self.routes.lock().await.get(&request.path).cloned() {
            return Ok(ApiResponse { status, body });
        }

        let status = if self.authorized.load(Ordering::SeqCst) {
            200
        } else {
            401
        };
        Ok(ApiResponse {
            status,
            body: Value::Null,
        })
    }
}
