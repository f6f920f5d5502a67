use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_core::MediaConstraints;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("Camera or microphone access denied.")]
    PermissionDenied,

    #[error("no capture device available: {0}")]
    NoDevice(String),

    #[error("capture failed: {0}")]
    Other(String),
}

/// One captured track. Disabling it drops samples instead of sending them,
/// which is how mute and camera-off are implemented.
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            track,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn write_sample(&self, sample: &Sample) -> anyhow::Result<()> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct LocalMediaInner {
    stream_id: String,
    tracks: Vec<LocalTrack>,
}

/// Capture handle shared by every peer link of one match session.
#[derive(Clone)]
pub struct LocalMedia {
    inner: Arc<LocalMediaInner>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            inner: Arc::new(LocalMediaInner {
                stream_id: stream_id.into(),
                tracks,
            }),
        }
    }

    /// Opus audio and VP8 video sample tracks, as requested by `constraints`.
    pub fn sample_tracks(constraints: &MediaConstraints) -> Self {
        let stream_id = format!("tandem-{}", Uuid::new_v4());
        let mut tracks = Vec::new();

        if constraints.audio {
            let track = TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            );
            tracks.push(LocalTrack::new(MediaKind::Audio, Arc::new(track)));
        }

        if constraints.video {
            let track = TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            );
            tracks.push(LocalTrack::new(MediaKind::Video, Arc::new(track)));
        }

        Self::new(stream_id, tracks)
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.inner.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.inner.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Flips the first track of `kind`; returns its new enabled state.
    pub fn toggle(&self, kind: MediaKind) -> Option<bool> {
        let track = self.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Some(enabled)
    }

    pub fn stop(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// Local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError>;

    async fn release(&self, media: &LocalMedia);
}

/// Devices backed by sample tracks that an external capture pipeline feeds
/// through [`LocalTrack::write_sample`].
#[derive(Default)]
pub struct SampleMediaDevices;

#[async_trait]
impl MediaDevices for SampleMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::NoDevice("neither audio nor video requested".into()));
        }
        let media = LocalMedia::sample_tracks(constraints);
        info!(
            "Local capture ready: {} ({}x{} @ {} fps, audio: {})",
            media.stream_id(),
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.ideal_frame_rate,
            constraints.audio
        );
        Ok(media)
    }

    async fn release(&self, media: &LocalMedia) {
        media.stop();
        info!("Local capture released: {}", media.stream_id());
    }
}
