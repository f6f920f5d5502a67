use crate::auth::IceServerSource;
use crate::peer::{CandidateBuffer, spawn_sampler};
use crate::signaling::SignalingChannel;
use crate::transport::{
    LocalMedia, PeerEvent, PeerTransport, PeerTransportFactory, RemoteMedia, RemoteTrack,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    ClientSignal, ConnectionState, IceCandidate, IceConnectionState, LinkId, QualitySample,
    QualityThresholds, SessionConfig, SessionDescription,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing and bandwidth policy applied to every link of a session.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    pub connect_timeout: Duration,
    pub stats_interval: Duration,
    pub max_video_bitrate_kbps: u32,
    pub thresholds: QualityThresholds,
}

impl From<&SessionConfig> for LinkPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            stats_interval: config.stats_interval(),
            max_video_bitrate_kbps: config.max_video_bitrate_kbps,
            thresholds: config.quality,
        }
    }
}

/// What the owning session has to do after a state report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    None,
    Connected,
    RestartIce,
    Teardown(String),
}

/// One peer-to-peer media link between the two sides of a match.
///
/// The link owns its transport, its connect timer and its stats sampler.
/// It never owns local capture: tearing it down leaves the tracks running
/// for the next link of the same session.
pub struct PeerLink {
    id: LinkId,
    is_initiator: bool,
    transport: Arc<dyn PeerTransport>,
    events: mpsc::Sender<PeerEvent>,
    policy: LinkPolicy,
    state: ConnectionState,
    remote_media: Option<RemoteMedia>,
    remote_description_set: bool,
    ice_restart_attempted: bool,
    ice_restart_pending: bool,
    quality: Option<QualitySample>,
    timeout: Option<JoinHandle<()>>,
    sampler: Option<JoinHandle<()>>,
}

impl PeerLink {
    /// Fetches relay credentials, builds the transport, attaches local
    /// tracks and arms the connect timer.
    pub async fn open(
        is_initiator: bool,
        relay: &dyn IceServerSource,
        factory: &dyn PeerTransportFactory,
        media: &LocalMedia,
        policy: LinkPolicy,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Self> {
        let id = LinkId::new();
        let ice_servers = relay.ice_servers().await;
        debug!("Opening link {} with {} ICE servers", id, ice_servers.len());

        let transport = factory.create(id, ice_servers, events.clone()).await?;
        if let Err(e) = transport
            .attach_local_media(media, policy.max_video_bitrate_kbps)
            .await
        {
            let _ = transport.close().await;
            return Err(e);
        }

        let mut link = Self {
            id,
            is_initiator,
            transport,
            events,
            policy,
            state: ConnectionState::Connecting,
            remote_media: None,
            remote_description_set: false,
            ice_restart_attempted: false,
            ice_restart_pending: false,
            quality: None,
            timeout: None,
            sampler: None,
        };
        link.arm_timeout();

        info!(
            "Link {} created ({})",
            id,
            if is_initiator { "initiator" } else { "receiver" }
        );
        Ok(link)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote_media.as_ref()
    }

    pub fn quality(&self) -> Option<QualitySample> {
        self.quality
    }

    pub fn is_restarting(&self) -> bool {
        self.ice_restart_pending
    }

    /// Initiator side: creates the offer and sends it.
    pub async fn start_offer(&self, signaling: &SignalingChannel) -> Result<()> {
        let offer = self.transport.create_offer(false).await?;
        signaling.emit(ClientSignal::Offer { offer }).await?;
        debug!("Link {} sent offer", self.id);
        Ok(())
    }

    /// Applies a remote offer, flushes buffered candidates, then answers.
    /// Also handles a restart offer on an established link.
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
        candidates: &mut CandidateBuffer,
        signaling: &SignalingChannel,
    ) -> Result<()> {
        self.apply_remote(offer, candidates).await?;
        let answer = self.transport.create_answer().await?;
        signaling.emit(ClientSignal::Answer { answer }).await?;
        debug!("Link {} sent answer", self.id);
        Ok(())
    }

    pub async fn accept_answer(
        &mut self,
        answer: SessionDescription,
        candidates: &mut CandidateBuffer,
    ) -> Result<()> {
        self.apply_remote(answer, candidates).await
    }

    /// Applies the candidate now, or buffers it until the remote
    /// description is in place.
    pub async fn add_candidate(&self, candidate: IceCandidate, candidates: &mut CandidateBuffer) {
        if !self.remote_description_set {
            candidates.enqueue(candidate);
            return;
        }
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate on link {}: {:?}", self.id, e);
        }
    }

    /// Sends an offer with fresh ICE credentials.
    pub async fn restart_ice(&mut self, signaling: &SignalingChannel) -> Result<()> {
        let offer = self.transport.create_offer(true).await?;
        signaling.emit(ClientSignal::Offer { offer }).await?;
        info!("Link {} sent ICE restart offer", self.id);
        Ok(())
    }

    pub fn on_state(&mut self, state: ConnectionState) -> LinkAction {
        self.state = state;
        match state {
            ConnectionState::Connected => {
                self.cancel_timeout();
                self.ice_restart_pending = false;
                if self.sampler.is_none() {
                    self.sampler = Some(spawn_sampler(
                        self.id,
                        self.transport.clone(),
                        self.policy.stats_interval,
                        self.policy.thresholds,
                        self.events.clone(),
                    ));
                }
                LinkAction::Connected
            }
            ConnectionState::New | ConnectionState::Connecting => LinkAction::None,
            ConnectionState::Failed | ConnectionState::Disconnected if self.ice_restart_pending => {
                info!("Link {} is {:?} while ICE restarts", self.id, state);
                LinkAction::None
            }
            ConnectionState::Failed | ConnectionState::Disconnected | ConnectionState::Closed => {
                LinkAction::Teardown(format!("connection {:?}", state).to_lowercase())
            }
        }
    }

    /// ICE failure gets one in-place restart; the initiator drives it, the
    /// receiver waits for the restart offer. A second failure is final.
    pub fn on_ice_state(&mut self, state: IceConnectionState) -> LinkAction {
        match state {
            IceConnectionState::Failed if !self.ice_restart_attempted => {
                self.ice_restart_attempted = true;
                self.ice_restart_pending = true;
                self.arm_timeout();
                warn!("ICE failed on link {}, attempting restart", self.id);
                if self.is_initiator {
                    LinkAction::RestartIce
                } else {
                    LinkAction::None
                }
            }
            IceConnectionState::Failed => LinkAction::Teardown("ice restart failed".into()),
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if self.ice_restart_pending {
                    info!("ICE recovered on link {}", self.id);
                    self.ice_restart_pending = false;
                }
                LinkAction::None
            }
            _ => LinkAction::None,
        }
    }

    pub fn on_remote_track(&mut self, track: RemoteTrack) {
        self.remote_media.get_or_insert_default().add_track(track);
    }

    pub fn on_quality(&mut self, sample: QualitySample) {
        self.quality = Some(sample);
    }

    /// Cancels both timers, drops the remote media reference and closes the
    /// transport. Local capture is left alone.
    pub async fn teardown(mut self) {
        self.cancel_timeout();
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        self.remote_media = None;
        self.state = ConnectionState::Closed;

        if let Err(e) = self.transport.close().await {
            warn!("Error closing link {}: {:?}", self.id, e);
        }
        info!("Link {} torn down", self.id);
    }

    async fn apply_remote(
        &mut self,
        description: SessionDescription,
        candidates: &mut CandidateBuffer,
    ) -> Result<()> {
        self.transport.set_remote_description(description).await?;
        self.remote_description_set = true;

        let applied = candidates.flush_into(self.transport.as_ref()).await;
        if applied > 0 {
            debug!("Link {} applied {} buffered candidates", self.id, applied);
        }
        Ok(())
    }

    fn arm_timeout(&mut self) {
        self.cancel_timeout();
        let id = self.id;
        let events = self.events.clone();
        let after = self.policy.connect_timeout;
        self.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(PeerEvent::Timeout(id)).await;
        }));
    }

    fn cancel_timeout(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}
