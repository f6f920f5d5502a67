use crate::signaling::SignalingError;
use crate::transport::MediaError;
use tandem_core::SessionStatus;
use thiserror::Error;

/// Why a user intent was rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("local media is not ready")]
    MediaNotReady,

    #[error("not connected to a peer")]
    NotConnected,

    #[error("cannot {intent} while {from:?}")]
    InvalidTransition {
        from: SessionStatus,
        intent: &'static str,
    },

    #[error("message is empty")]
    EmptyMessage,

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),
}
