use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectErrorReason {
    /// The service refused the session credentials.
    Authentication,
    Transport(String),
}

/// What a transport reports upward once it is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Text(String),
    Error(ConnectErrorReason),
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling service rejected the session credentials")]
    Unauthorized,

    #[error("signaling connection failed: {0}")]
    Connect(String),

    #[error("signaling channel is not connected")]
    NotConnected,

    #[error("signaling channel was shut down")]
    Closed,

    #[error("could not encode signal: {0}")]
    Encode(String),
}

/// Raw bidirectional text pipe to the matchmaking service.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Opens the connection; inbound frames are pushed into `inbound`.
    async fn open(&self, inbound: mpsc::UnboundedSender<WireEvent>) -> Result<(), SignalingError>;

    async fn send(&self, text: String) -> Result<(), SignalingError>;

    async fn close(&self);
}
