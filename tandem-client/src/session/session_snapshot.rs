use crate::session::SessionError;
use crate::transport::{MediaError, RemoteMedia};
use tandem_core::{ChatMessage, ConnectionState, QualitySample, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    Acquiring,
    Ready,
    /// Capture was refused; searching stays disabled until a retry succeeds.
    Failed(MediaError),
    Released,
}

/// Everything a front end renders, published after every event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub is_initiator: bool,
    pub connection_state: Option<ConnectionState>,
    pub quality: Option<QualitySample>,
    pub messages: Vec<ChatMessage>,
    pub media: MediaStatus,
    pub remote_media: Option<RemoteMedia>,
    pub is_muted: bool,
    pub is_video_off: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            is_initiator: false,
            connection_state: None,
            quality: None,
            messages: Vec::new(),
            media: MediaStatus::Acquiring,
            remote_media: None,
            is_muted: false,
            is_video_off: false,
        }
    }
}

impl SessionSnapshot {
    pub fn can_search(&self) -> bool {
        self.status == SessionStatus::Idle && self.media == MediaStatus::Ready
    }

    pub fn can_chat(&self) -> bool {
        self.status == SessionStatus::Matched
            && self.connection_state == Some(ConnectionState::Connected)
    }
}

/// One-off, user-visible conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Rejected(SessionError),
    Matched { is_initiator: bool },
    PeerLeft,
    /// The link failed or timed out and the match was abandoned.
    LinkLost(String),
    MediaDenied(MediaError),
    /// The account opened a session elsewhere; this one is over.
    Terminated,
    Unauthenticated,
}
