use crate::transport::LocalMedia;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tandem_core::{
    ConnectionState, IceCandidate, IceConnectionState, IceServerConfig, LinkId, QualitySample,
    SessionDescription,
};
use tokio::sync::mpsc;

/// Kind of a remote track as reported by the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
}

/// The peer's stream as assembled from its tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    pub fn add_track(&mut self, track: RemoteTrack) {
        if self.stream_id.is_empty() {
            self.stream_id = track.stream_id.clone();
        }
        if !self.tracks.iter().any(|t| t.track_id == track.track_id) {
            self.tracks.push(track);
        }
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// Outbound video counters. `timestamp_ms` comes from a monotonic clock
/// local to the link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutboundVideoStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub timestamp_ms: f64,
}

/// Events a peer transport produces for the session that owns it.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    StateChanged(LinkId, ConnectionState),
    IceStateChanged(LinkId, IceConnectionState),
    CandidateGenerated(LinkId, IceCandidate),
    RemoteTrack(LinkId, RemoteTrack),
    /// The connect timer fired before the link reached `Connected`.
    Timeout(LinkId),
    Quality(LinkId, QualitySample),
}

impl PeerEvent {
    pub fn link_id(&self) -> LinkId {
        match self {
            Self::StateChanged(id, _)
            | Self::IceStateChanged(id, _)
            | Self::CandidateGenerated(id, _)
            | Self::RemoteTrack(id, _)
            | Self::Timeout(id)
            | Self::Quality(id, _) => *id,
        }
    }
}

/// One negotiation object. Offers and answers are applied as the local
/// description before they are returned.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn attach_local_media(&self, media: &LocalMedia, max_video_bitrate_kbps: u32) -> Result<()>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn outbound_video_stats(&self) -> Result<Option<OutboundVideoStats>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        link_id: LinkId,
        ice_servers: Vec<IceServerConfig>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
