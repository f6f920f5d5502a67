use crate::transport::sdp::cap_video_bitrate;
use crate::transport::{
    LocalMedia, OutboundVideoStats, PeerEvent, PeerTransport, PeerTransportFactory, RemoteTrack,
    TrackKind,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tandem_core::{
    ConnectionState, IceCandidate, IceConnectionState, IceServerConfig, LinkId, SdpType,
    SessionDescription,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds webrtc-rs peer connections. Remote tracks are handed to
/// `remote_tracks` when set, so a renderer can read their RTP.
#[derive(Default, Clone)]
pub struct RtcPeerFactory {
    remote_tracks: Option<mpsc::UnboundedSender<Arc<TrackRemote>>>,
}

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_tracks(sink: mpsc::UnboundedSender<Arc<TrackRemote>>) -> Self {
        Self {
            remote_tracks: Some(sink),
        }
    }
}

#[async_trait]
impl PeerTransportFactory for RtcPeerFactory {
    async fn create(
        &self,
        link_id: LinkId,
        ice_servers: Vec<IceServerConfig>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport =
            RtcPeerTransport::new(link_id, ice_servers, events, self.remote_tracks.clone()).await?;
        Ok(Arc::new(transport))
    }
}

pub struct RtcPeerTransport {
    link_id: LinkId,
    peer_connection: Arc<RTCPeerConnection>,
    max_video_bitrate_kbps: AtomicU32,
    epoch: Instant,
}

impl RtcPeerTransport {
    pub async fn new(
        link_id: LinkId,
        ice_servers: Vec<IceServerConfig>,
        events: mpsc::Sender<PeerEvent>,
        remote_tracks: Option<mpsc::UnboundedSender<Arc<TrackRemote>>>,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username.unwrap_or_default(),
                    credential: server.credential.unwrap_or_default(),
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let state_tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                Box::pin(async move {
                    info!("Peer connection state changed for link {}: {:?}", link_id, s);
                    let Some(state) = map_connection_state(s) else {
                        return;
                    };
                    let _ = tx.send(PeerEvent::StateChanged(link_id, state)).await;
                })
            },
        ));

        let ice_state_tx = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let tx = ice_state_tx.clone();
                Box::pin(async move {
                    debug!("ICE connection state changed for link {}: {:?}", link_id, s);
                    let Some(state) = map_ice_state(s) else {
                        return;
                    };
                    let _ = tx.send(PeerEvent::IceStateChanged(link_id, state)).await;
                })
            },
        ));

        let ice_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };
                let _ = tx.send(PeerEvent::CandidateGenerated(link_id, candidate)).await;
            })
        }));

        let track_tx = events;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let sink = remote_tracks.clone();
            Box::pin(async move {
                let remote = RemoteTrack {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind: match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Unknown,
                    },
                };
                info!("Remote {:?} track {} on link {}", remote.kind, remote.track_id, link_id);
                if let Some(sink) = sink {
                    let _ = sink.send(track);
                }
                let _ = tx.send(PeerEvent::RemoteTrack(link_id, remote)).await;
            })
        }));

        Ok(Self {
            link_id,
            peer_connection,
            max_video_bitrate_kbps: AtomicU32::new(0),
            epoch: Instant::now(),
        })
    }

    fn capped(&self, sdp: String) -> String {
        let kbps = self.max_video_bitrate_kbps.load(Ordering::SeqCst);
        if kbps == 0 {
            sdp
        } else {
            cap_video_bitrate(&sdp, kbps)
        }
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn attach_local_media(&self, media: &LocalMedia, max_video_bitrate_kbps: u32) -> Result<()> {
        self.max_video_bitrate_kbps
            .store(max_video_bitrate_kbps, Ordering::SeqCst);

        for track in media.tracks() {
            let rtp_sender = self
                .peer_connection
                .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // RTCP has to be drained for the interceptors to run.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        debug!("Attached {} local tracks to link {}", media.tracks().len(), self.link_id);
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.peer_connection.create_offer(options).await?;
        // The local description must be exactly what was generated.
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        // The remote side's bandwidth lines bound what this side sends.
        let sdp = self.capped(description.sdp);
        let desc = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        };
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn outbound_video_stats(&self) -> Result<Option<OutboundVideoStats>> {
        let stats = self.peer_connection.get_stats().await;
        let timestamp_ms = self.epoch.elapsed().as_secs_f64() * 1000.0;

        Ok(stats.reports.values().find_map(|report| {
            let StatsReportType::OutboundRTP(rtp) = report else {
                return None;
            };
            (rtp.kind == "video").then_some(OutboundVideoStats {
                bytes_sent: rtp.bytes_sent,
                packets_sent: rtp.packets_sent,
                timestamp_ms,
            })
        }))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => {
            warn!("Ignoring unspecified peer connection state");
            None
        }
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}
