pub mod auth;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;

pub use auth::{AccountSession, ApiAccount, CredentialGate, RelayDirectory, ReqwestApi};
pub use session::{
    MatchSession, MediaStatus, SessionDeps, SessionError, SessionHandle, SessionNotice,
    SessionSnapshot,
};
pub use signaling::{SignalingChannel, WsSignalingTransport};
pub use transport::{RtcPeerFactory, SampleMediaDevices};
