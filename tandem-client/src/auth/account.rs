use crate::auth::{ApiError, CredentialGate};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tandem_core::utils::{LOGOUT_PATH, ME_PATH};
use tracing::{info, warn};

/// The signed-in account as seen by the session core.
#[async_trait]
pub trait AccountSession: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Ends the account session. Navigation is the caller's business.
    async fn logout(&self);
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountProfile {
    pub username: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

pub struct ApiAccount {
    gate: Arc<CredentialGate>,
}

impl ApiAccount {
    pub fn new(gate: Arc<CredentialGate>) -> Self {
        Self { gate }
    }

    pub async fn fetch_me(&self) -> Option<AccountProfile> {
        let response = match self.gate.get(ME_PATH).await {
            Ok(response) => response,
            Err(e) => {
                info!("No active account: {}", e);
                return None;
            }
        };

        match serde_json::from_value(response.body) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Unreadable account profile: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AccountSession for ApiAccount {
    fn is_authenticated(&self) -> bool {
        self.gate.is_authenticated()
    }

    async fn logout(&self) {
        if let Err(e) = self.gate.post(LOGOUT_PATH, None).await {
            match e {
                ApiError::Status { status, .. } => warn!("Logout answered with {}", status),
                other => warn!("Logout request failed: {}", other),
            }
        }
        self.gate.mark_unauthenticated();
        info!("Logged out");
    }
}
