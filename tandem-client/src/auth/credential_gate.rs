use crate::auth::{ApiError, ApiRequest, ApiResponse, ApiTransport};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_core::SessionConfig;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

/// Continuation parked behind an in-flight refresh.
type RefreshWaiter = oneshot::Sender<Result<(), ApiError>>;

enum RefreshState {
    Idle,
    InFlight(Vec<RefreshWaiter>),
}

fn lock_state(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by the caller running the exchange. If that caller is dropped
/// mid-exchange the gate goes back to idle and the parked waiters fail.
struct InFlightGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self) -> Vec<RefreshWaiter> {
        self.armed = false;
        Self::take_waiters(self.state)
    }

    fn take_waiters(state: &Mutex<RefreshState>) -> Vec<RefreshWaiter> {
        match std::mem::replace(&mut *lock_state(state), RefreshState::Idle) {
            RefreshState::InFlight(waiters) => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = Self::take_waiters(self.state);
        warn!("Credential refresh abandoned, rejecting {} waiters", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(Err(ApiError::RefreshFailed("refresh abandoned".into())));
        }
    }
}

/// Wraps every authenticated request. An expired session (401) triggers a
/// single refresh exchange no matter how many requests observe it; the
/// requests are then replayed once, or all fail with the refresh error.
pub struct CredentialGate {
    transport: Arc<dyn ApiTransport>,
    refresh_path: String,
    auth_flow_paths: Vec<String>,
    refresh: Mutex<RefreshState>,
    auth_state: watch::Sender<AuthState>,
}

impl CredentialGate {
    pub fn new(transport: Arc<dyn ApiTransport>, config: &SessionConfig) -> Self {
        let (auth_state, _) = watch::channel(AuthState::Authenticated);
        Self {
            transport,
            refresh_path: config.refresh_path.clone(),
            auth_flow_paths: config.auth_flow_paths.clone(),
            refresh: Mutex::new(RefreshState::Idle),
            auth_state,
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.transport.execute(&request).await?;

        if !response.is_unauthorized() || request.retried || self.is_auth_flow(&request.path) {
            return Self::check_status(&request, response);
        }

        debug!("{} returned 401, refreshing credentials", request.path);
        self.refresh().await?;

        let replay = ApiRequest {
            retried: true,
            ..request
        };
        let response = self.transport.execute(&replay).await?;
        Self::check_status(&replay, response)
    }

    /// Runs the refresh exchange, or joins the one already in flight.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let waiter = {
            let mut state = lock_state(&self.refresh);
            match &mut *state {
                RefreshState::InFlight(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::InFlight(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return rx
                .await
                .unwrap_or_else(|_| Err(ApiError::RefreshFailed("refresh abandoned".into())));
        }

        let guard = InFlightGuard {
            state: &self.refresh,
            armed: true,
        };
        let outcome = self.exchange_refresh().await;
        let waiters = guard.finish();

        match &outcome {
            Ok(()) => {
                info!("Credentials refreshed, releasing {} waiters", waiters.len());
                self.auth_state.send_replace(AuthState::Authenticated);
            }
            Err(e) => {
                warn!("Credential refresh failed ({}), rejecting {} waiters", e, waiters.len());
                self.auth_state.send_replace(AuthState::Unauthenticated);
            }
        }

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.auth_state.borrow() == AuthState::Authenticated
    }

    pub fn mark_unauthenticated(&self) {
        self.auth_state.send_replace(AuthState::Unauthenticated);
    }

    fn is_auth_flow(&self, path: &str) -> bool {
        path.starts_with(self.refresh_path.as_str())
            || self
                .auth_flow_paths
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    async fn exchange_refresh(&self) -> Result<(), ApiError> {
        // Marked as retried so it can never recurse into another refresh.
        let request = ApiRequest {
            retried: true,
            ..ApiRequest::post(self.refresh_path.clone(), None)
        };

        match self.transport.execute(&request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(ApiError::RefreshFailed(format!(
                "refresh answered with status {}",
                response.status
            ))),
            Err(e) => Err(ApiError::RefreshFailed(e.to_string())),
        }
    }

    fn check_status(request: &ApiRequest, response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Status {
                path: request.path.clone(),
                status: response.status,
            })
        }
    }
}
