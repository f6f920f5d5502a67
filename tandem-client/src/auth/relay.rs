use crate::auth::CredentialGate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tandem_core::{IceServerConfig, SessionConfig};
use tracing::{info, warn};

/// Source of STUN/TURN servers for a new peer link. Never fails: a link is
/// not held back because relay credentials are unavailable.
#[async_trait]
pub trait IceServerSource: Send + Sync {
    async fn ice_servers(&self) -> Vec<IceServerConfig>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayCredentials {
    ice_servers: Vec<IceServerConfig>,
}

pub struct RelayDirectory {
    gate: Arc<CredentialGate>,
    path: String,
    fallback: Vec<IceServerConfig>,
}

impl RelayDirectory {
    pub fn new(gate: Arc<CredentialGate>, config: &SessionConfig) -> Self {
        Self {
            gate,
            path: config.relay_credentials_path.clone(),
            fallback: config.fallback_ice_servers.clone(),
        }
    }
}

#[async_trait]
impl IceServerSource for RelayDirectory {
    async fn ice_servers(&self) -> Vec<IceServerConfig> {
        let response = match self.gate.get(&self.path).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Relay credential fetch failed, using fallback: {}", e);
                return self.fallback.clone();
            }
        };

        match serde_json::from_value::<RelayCredentials>(response.body) {
            Ok(credentials) if !credentials.ice_servers.is_empty() => {
                info!("Received {} ICE servers", credentials.ice_servers.len());
                credentials.ice_servers
            }
            Ok(_) => {
                warn!("Relay credential response listed no servers, using fallback");
                self.fallback.clone()
            }
            Err(e) => {
                warn!("Malformed relay credentials, using fallback: {}", e);
                self.fallback.clone()
            }
        }
    }
}
