mod chat;
mod link;
mod quality;
mod session;
mod signaling;

pub use chat::ChatMessage;
pub use link::{ConnectionState, IceConnectionState, LinkId};
pub use quality::{QualitySample, QualityThresholds, QualityTier, bitrate_kbps};
pub use session::SessionStatus;
pub use signaling::{
    ClientSignal, IceCandidate, IceServerConfig, SdpType, ServerSignal, SessionDescription,
};
