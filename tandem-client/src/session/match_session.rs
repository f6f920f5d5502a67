use crate::auth::{AccountSession, IceServerSource};
use crate::peer::{CandidateBuffer, LinkAction, LinkPolicy, PeerLink};
use crate::session::{
    MediaStatus, Reply, SessionCommand, SessionError, SessionHandle, SessionNotice,
    SessionSnapshot,
};
use crate::signaling::{ConnectErrorReason, SignalEvent, SignalKind, SignalingChannel, SignalingError};
use crate::transport::{LocalMedia, MediaDevices, MediaKind, PeerEvent, PeerTransportFactory};
use std::sync::Arc;
use tandem_core::{
    ChatMessage, ClientSignal, IceCandidate, ServerSignal, SessionConfig, SessionDescription,
    SessionStatus,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Collaborators a match session drives.
#[derive(Clone)]
pub struct SessionDeps {
    pub signaling: Arc<SignalingChannel>,
    pub relay: Arc<dyn IceServerSource>,
    pub peers: Arc<dyn PeerTransportFactory>,
    pub media: Arc<dyn MediaDevices>,
    pub account: Arc<dyn AccountSession>,
}

/// The match state machine. It runs as a single task that owns every piece
/// of session state; signaling handlers and peer transports only forward
/// events into its channels, so each event is handled against the state
/// that is current when it is dequeued.
pub struct MatchSession {
    config: SessionConfig,
    policy: LinkPolicy,
    deps: SessionDeps,

    status: SessionStatus,
    is_initiator: bool,
    link: Option<PeerLink>,
    candidates: CandidateBuffer,
    messages: Vec<ChatMessage>,
    local_media: Option<LocalMedia>,
    media_status: MediaStatus,

    command_rx: mpsc::Receiver<SessionCommand>,
    signal_rx: mpsc::UnboundedReceiver<SignalEvent>,
    peer_rx: mpsc::Receiver<PeerEvent>,
    peer_tx: mpsc::Sender<PeerEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
}

impl MatchSession {
    /// Registers the signaling handlers and starts the session loop.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        deps: SessionDeps,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        for kind in SignalKind::ALL {
            let tx = signal_tx.clone();
            deps.signaling.on(
                kind,
                Arc::new(move |event| {
                    let _ = tx.send(event);
                }),
            );
        }

        let session = Self {
            policy: LinkPolicy::from(&config),
            config,
            deps,
            status: SessionStatus::Idle,
            is_initiator: false,
            link: None,
            candidates: CandidateBuffer::new(),
            messages: Vec::new(),
            local_media: None,
            media_status: MediaStatus::Acquiring,
            command_rx,
            signal_rx,
            peer_rx,
            peer_tx,
            snapshot_tx,
            notice_tx,
        };
        tokio::spawn(session.run());

        (SessionHandle::new(command_tx, snapshot_rx), notice_rx)
    }

    async fn run(mut self) {
        info!("Match session event loop started");

        let _ = self.acquire_media().await;
        if let Err(e) = self.connect_signaling().await {
            warn!("Signaling unavailable at start: {}", e);
        }
        self.publish();

        while self.status != SessionStatus::Ended {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown(reply)) => {
                        self.shutdown().await;
                        self.publish();
                        let _ = reply.send(());
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        info!("Command channel closed. Shutting down session.");
                        self.shutdown().await;
                    }
                },

                Some(event) = self.signal_rx.recv() => self.handle_signal(event).await,

                Some(event) = self.peer_rx.recv() => self.handle_peer_event(event).await,
            }
            self.publish();
        }

        self.publish();
        info!("Match session event loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Search(reply) => {
                let result = self.search().await;
                self.reply(reply, result);
            }
            SessionCommand::Stop(reply) => {
                let result = self.stop().await;
                self.reply(reply, result);
            }
            SessionCommand::Skip { requeue, reply } => {
                let result = self.skip(requeue).await;
                self.reply(reply, result);
            }
            SessionCommand::SendMessage { text, reply } => {
                let result = self.send_message(&text).await;
                self.reply(reply, result);
            }
            SessionCommand::ToggleMute(reply) => {
                let result = self.toggle(MediaKind::Audio);
                self.reply(reply, result);
            }
            SessionCommand::ToggleVideo(reply) => {
                let result = self.toggle(MediaKind::Video);
                self.reply(reply, result);
            }
            SessionCommand::RetryMedia(reply) => {
                let result = self.retry_media().await;
                self.reply(reply, result);
            }
            SessionCommand::Shutdown(reply) => {
                self.shutdown().await;
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    async fn search(&mut self) -> Result<(), SessionError> {
        if self.local_media.is_none() {
            return Err(SessionError::MediaNotReady);
        }
        if self.status != SessionStatus::Idle {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                intent: "search",
            });
        }

        self.connect_signaling().await?;
        self.deps.signaling.emit(ClientSignal::Search).await?;
        self.status = SessionStatus::Queued;
        info!("Searching for a match");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Queued {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                intent: "stop",
            });
        }

        if let Err(e) = self.deps.signaling.emit(ClientSignal::StopSearch).await {
            warn!("Failed to send stop-search: {}", e);
        }
        self.candidates.clear();
        self.status = SessionStatus::Idle;
        info!("Search stopped");
        Ok(())
    }

    async fn skip(&mut self, requeue: bool) -> Result<(), SessionError> {
        if self.status != SessionStatus::Matched {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                intent: "skip",
            });
        }

        self.leave_match().await;
        if let Err(e) = self.deps.signaling.emit(ClientSignal::Skip).await {
            warn!("Failed to send skip: {}", e);
        }
        info!("Skipped match");

        if requeue {
            self.search().await?;
        }
        Ok(())
    }

    async fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let connected = self.link.as_ref().is_some_and(PeerLink::is_connected);
        if self.status != SessionStatus::Matched || !connected {
            return Err(SessionError::NotConnected);
        }

        // The service echoes the message back as `receive-message`, which is
        // what puts it in the transcript.
        self.deps
            .signaling
            .emit(ClientSignal::SendMessage {
                text: text.to_owned(),
            })
            .await?;
        Ok(())
    }

    /// Returns true when the track of `kind` is now off.
    fn toggle(&mut self, kind: MediaKind) -> Result<bool, SessionError> {
        let media = self.local_media.as_ref().ok_or(SessionError::MediaNotReady)?;
        let enabled = media.toggle(kind).ok_or(SessionError::MediaNotReady)?;
        info!("Local {:?} {}", kind, if enabled { "on" } else { "off" });
        Ok(!enabled)
    }

    async fn retry_media(&mut self) -> Result<(), SessionError> {
        match self.media_status {
            MediaStatus::Ready => Ok(()),
            MediaStatus::Failed(_) => self.acquire_media().await,
            MediaStatus::Acquiring | MediaStatus::Released => Err(SessionError::MediaNotReady),
        }
    }

    async fn handle_signal(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::Server(signal) => {
                debug!("Received '{}'", signal.name());
                self.handle_server_signal(signal).await;
            }
            SignalEvent::ConnectionError(reason) => self.handle_connection_error(reason).await,
        }
    }

    async fn handle_server_signal(&mut self, signal: ServerSignal) {
        match signal {
            // Only `search` enters the queue; a late confirmation after
            // `stop` must not put the session back in it.
            ServerSignal::Queued => match self.status {
                SessionStatus::Queued => info!("Queued by matchmaking service"),
                other => debug!("Ignoring 'queued' while {:?}", other),
            },

            ServerSignal::Matched { is_initiator } => self.enter_match(is_initiator).await,

            ServerSignal::Offer { offer } => self.on_remote_offer(offer).await,

            ServerSignal::Answer { answer } => self.on_remote_answer(answer).await,

            ServerSignal::IceCandidate { candidate } => self.on_remote_candidate(candidate).await,

            ServerSignal::PeerDisconnected => {
                if self.status != SessionStatus::Matched {
                    debug!("Ignoring 'peer-disconnected' while {:?}", self.status);
                    return;
                }
                info!("Peer left the match");
                self.leave_match().await;
                self.notify(SessionNotice::PeerLeft);
            }

            ServerSignal::ReceiveMessage { text, from_self } => {
                self.messages.push(ChatMessage { text, from_self });
            }

            ServerSignal::SessionTerminated => {
                warn!("Session terminated by the service (signed in elsewhere)");
                self.terminate(SessionNotice::Terminated).await;
            }
        }
    }

    async fn handle_connection_error(&mut self, reason: ConnectErrorReason) {
        match &reason {
            ConnectErrorReason::Authentication => {
                info!("Signaling reported expired credentials, reconnecting");
            }
            ConnectErrorReason::Transport(e) => warn!("Signaling transport error: {}", e),
        }

        if self.status == SessionStatus::Queued {
            // The queue entry belonged to the old connection.
            self.candidates.clear();
            self.status = SessionStatus::Idle;
        }

        match self.deps.signaling.reconnect().await {
            Ok(()) => info!("Signaling reconnected"),
            Err(SignalingError::Unauthorized) => self.account_lost().await,
            Err(e) => {
                error!("Signaling reconnect failed: {}", e);
                self.notify(SessionNotice::LinkLost(format!("signaling unavailable: {e}")));
            }
        }
    }

    async fn enter_match(&mut self, is_initiator: bool) {
        if self.status == SessionStatus::Ended {
            return;
        }
        if self.link.is_some() {
            warn!("Matched again while a link exists, replacing it");
            self.drop_link().await;
        }

        self.messages.clear();
        self.status = SessionStatus::Matched;
        self.is_initiator = is_initiator;
        info!("Matched (initiator: {})", is_initiator);
        self.notify(SessionNotice::Matched { is_initiator });

        if !self.open_link(is_initiator).await || !is_initiator {
            return;
        }

        let Some(link) = self.link.as_ref() else {
            return;
        };
        if let Err(e) = link.start_offer(&self.deps.signaling).await {
            self.abandon_match(format!("offer failed: {e}")).await;
        }
    }

    /// Builds the link for the current match. Returns false when the match
    /// had to be abandoned instead.
    async fn open_link(&mut self, is_initiator: bool) -> bool {
        let Some(media) = self.local_media.clone() else {
            self.abandon_match("local media is not ready".into()).await;
            return false;
        };

        let opened = PeerLink::open(
            is_initiator,
            self.deps.relay.as_ref(),
            self.deps.peers.as_ref(),
            &media,
            self.policy.clone(),
            self.peer_tx.clone(),
        )
        .await;

        match opened {
            Ok(link) => {
                self.link = Some(link);
                true
            }
            Err(e) => {
                error!("Failed to create peer link: {:?}", e);
                self.abandon_match(format!("link setup failed: {e}")).await;
                false
            }
        }
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription) {
        match self.status {
            SessionStatus::Queued => {
                // The offer can overtake `matched`; it still means we are the
                // receiving side of a new match.
                info!("Offer arrived before 'matched', accepting as receiver");
                self.enter_match(false).await;
            }
            SessionStatus::Matched if self.link.is_none() => {
                if !self.open_link(false).await {
                    return;
                }
            }
            SessionStatus::Matched => {}
            other => {
                warn!("Dropping offer while {:?}", other);
                return;
            }
        }

        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.is_initiator() {
            warn!("Initiator received an offer, ignoring it");
            return;
        }
        let accepted = link
            .accept_offer(offer, &mut self.candidates, &self.deps.signaling)
            .await;
        if let Err(e) = accepted {
            self.abandon_match(format!("answer failed: {e}")).await;
        }
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        let Some(link) = self.link.as_mut() else {
            warn!("Dropping answer without a link");
            return;
        };
        if !link.is_initiator() {
            warn!("Receiver got an answer, ignoring it");
            return;
        }
        let accepted = link.accept_answer(answer, &mut self.candidates).await;
        if let Err(e) = accepted {
            self.abandon_match(format!("applying answer failed: {e}")).await;
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match (self.status, self.link.as_ref()) {
            (SessionStatus::Matched, Some(link)) => {
                link.add_candidate(candidate, &mut self.candidates).await;
            }
            (SessionStatus::Queued | SessionStatus::Matched, None) => {
                self.candidates.enqueue(candidate);
            }
            (other, _) => debug!("Dropping candidate while {:?}", other),
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        let Some(link) = self.link.as_mut() else {
            debug!("Dropping event for a torn down link");
            return;
        };
        if link.id() != event.link_id() {
            debug!("Dropping event from stale link {}", event.link_id());
            return;
        }

        match event {
            PeerEvent::StateChanged(_, state) => match link.on_state(state) {
                LinkAction::Connected => info!("Link {} connected", link.id()),
                LinkAction::Teardown(reason) => self.abandon_match(reason).await,
                LinkAction::None | LinkAction::RestartIce => {}
            },

            PeerEvent::IceStateChanged(_, state) => match link.on_ice_state(state) {
                LinkAction::RestartIce => {
                    let restarted = link.restart_ice(&self.deps.signaling).await;
                    if let Err(e) = restarted {
                        self.abandon_match(format!("ice restart failed: {e}")).await;
                    }
                }
                LinkAction::Teardown(reason) => self.abandon_match(reason).await,
                LinkAction::None | LinkAction::Connected => {}
            },

            PeerEvent::CandidateGenerated(_, candidate) => {
                let sent = self
                    .deps
                    .signaling
                    .emit(ClientSignal::IceCandidate { candidate })
                    .await;
                if let Err(e) = sent {
                    warn!("Failed to send local candidate: {}", e);
                }
            }

            PeerEvent::RemoteTrack(_, track) => link.on_remote_track(track),

            PeerEvent::Timeout(id) => {
                if link.is_connected() && !link.is_restarting() {
                    return;
                }
                warn!(
                    "Link {} did not connect within {:?}",
                    id, self.policy.connect_timeout
                );
                self.abandon_match("connection timed out".into()).await;
            }

            PeerEvent::Quality(_, sample) => link.on_quality(sample),
        }
    }

    /// Leaves Matched after the link failed: the service is told to release
    /// the pair, and the queue is re-entered only when configured to.
    async fn abandon_match(&mut self, reason: String) {
        warn!("Abandoning match: {}", reason);
        self.leave_match().await;
        if let Err(e) = self.deps.signaling.emit(ClientSignal::Skip).await {
            debug!("Could not send skip for abandoned match: {}", e);
        }
        self.notify(SessionNotice::LinkLost(reason));

        if self.config.auto_requeue {
            if let Err(e) = self.search().await {
                warn!("Re-queue after link loss failed: {}", e);
            }
        }
    }

    async fn leave_match(&mut self) {
        self.drop_link().await;
        self.messages.clear();
        self.is_initiator = false;
        self.status = SessionStatus::Idle;
    }

    async fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.teardown().await;
        }
        self.candidates.clear();
    }

    async fn acquire_media(&mut self) -> Result<(), SessionError> {
        if self.local_media.is_some() {
            return Ok(());
        }

        self.media_status = MediaStatus::Acquiring;
        self.publish();

        match self.deps.media.acquire(&self.config.media).await {
            Ok(media) => {
                info!("Local media ready: {}", media.stream_id());
                self.local_media = Some(media);
                self.media_status = MediaStatus::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("Local media unavailable: {}", e);
                self.media_status = MediaStatus::Failed(e.clone());
                self.notify(SessionNotice::MediaDenied(e.clone()));
                Err(e.into())
            }
        }
    }

    async fn release_media(&mut self) {
        if let Some(media) = self.local_media.take() {
            self.deps.media.release(&media).await;
            self.media_status = MediaStatus::Released;
        }
    }

    async fn connect_signaling(&mut self) -> Result<(), SessionError> {
        match self.deps.signaling.connect().await {
            Ok(()) => Ok(()),
            Err(SignalingError::Unauthorized) => {
                self.account_lost().await;
                Err(SignalingError::Unauthorized.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Leaving the session: stop searching, drop the link, release capture,
    /// then deregister handlers and close the channel.
    async fn shutdown(&mut self) {
        if self.status == SessionStatus::Ended {
            return;
        }
        info!("Shutting down match session");

        if let Err(e) = self.deps.signaling.emit(ClientSignal::StopSearch).await {
            debug!("Could not send stop-search on shutdown: {}", e);
        }
        self.drop_link().await;
        self.release_media().await;
        self.deps.signaling.teardown().await;

        self.messages.clear();
        self.is_initiator = false;
        self.status = SessionStatus::Ended;
    }

    /// Account-fatal exit: link and capture are released before logout.
    async fn terminate(&mut self, notice: SessionNotice) {
        self.drop_link().await;
        self.release_media().await;
        self.deps.signaling.teardown().await;
        self.deps.account.logout().await;

        self.messages.clear();
        self.is_initiator = false;
        self.status = SessionStatus::Ended;
        self.notify(notice);
    }

    async fn account_lost(&mut self) {
        error!("Credentials could not be refreshed, ending session");
        self.terminate(SessionNotice::Unauthenticated).await;
    }

    /// Publishes first so the caller sees the state its intent produced.
    fn reply<T>(&self, reply: Reply<T>, result: Result<T, SessionError>) {
        if let Err(e) = &result {
            info!("Rejected: {}", e);
            self.notify(SessionNotice::Rejected(e.clone()));
        }
        self.publish();
        let _ = reply.send(result);
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notice_tx.send(notice);
    }

    fn track_off(&self, kind: MediaKind) -> bool {
        self.local_media
            .as_ref()
            .and_then(|media| media.track(kind))
            .is_some_and(|track| !track.is_enabled())
    }

    fn publish(&self) {
        let link = self.link.as_ref();
        let snapshot = SessionSnapshot {
            status: self.status,
            is_initiator: self.is_initiator,
            connection_state: link.map(PeerLink::state),
            quality: link.and_then(PeerLink::quality),
            messages: self.messages.clone(),
            media: self.media_status.clone(),
            remote_media: link.and_then(|l| l.remote_media().cloned()),
            is_muted: self.track_off(MediaKind::Audio),
            is_video_off: self.track_off(MediaKind::Video),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
