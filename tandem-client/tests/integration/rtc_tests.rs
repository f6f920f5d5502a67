use std::sync::Arc;
use std::time::Duration;
use tandem_client::RtcPeerFactory;
use tandem_client::transport::{
    LocalMedia, MediaKind, PeerEvent, PeerTransport, PeerTransportFactory,
};
use tandem_core::{ConnectionState, LinkId, MediaConstraints, SdpType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::integration::init_tracing;

struct Side {
    transport: Arc<dyn PeerTransport>,
    events: mpsc::Receiver<PeerEvent>,
    media: LocalMedia,
}

async fn open_side(factory: &RtcPeerFactory) -> Side {
    let (tx, events) = mpsc::channel(256);
    let transport = factory
        .create(LinkId::new(), Vec::new(), tx)
        .await
        .expect("peer connection builds");
    let media = LocalMedia::sample_tracks(&MediaConstraints::default());
    transport
        .attach_local_media(&media, 500)
        .await
        .expect("local tracks attach");
    Side {
        transport,
        events,
        media,
    }
}

/// Offer from `a`, answer from `b`.
async fn negotiate(a: &Side, b: &Side, ice_restart: bool) {
    let offer = a
        .transport
        .create_offer(ice_restart)
        .await
        .expect("offer is accepted as the local description");
    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert!(!offer.sdp.contains("b=AS"), "local description is sent as generated");

    b.transport
        .set_remote_description(offer)
        .await
        .expect("capped offer applies");
    let answer = b
        .transport
        .create_answer()
        .await
        .expect("answer is accepted as the local description");
    a.transport
        .set_remote_description(answer)
        .await
        .expect("capped answer applies");
}

/// Hands each side's candidates to the other until both report Connected.
async fn exchange_until_connected(a: &mut Side, b: &mut Side) -> usize {
    let mut exchanged = 0;
    let (mut a_up, mut b_up) = (false, false);
    let deadline = tokio::time::sleep(Duration::from_secs(20));
    tokio::pin!(deadline);

    while !(a_up && b_up) {
        tokio::select! {
            Some(event) = a.events.recv() => match event {
                PeerEvent::CandidateGenerated(_, candidate) => {
                    b.transport.add_ice_candidate(candidate).await.expect("candidate applies");
                    exchanged += 1;
                }
                PeerEvent::StateChanged(_, ConnectionState::Connected) => a_up = true,
                _ => {}
            },
            Some(event) = b.events.recv() => match event {
                PeerEvent::CandidateGenerated(_, candidate) => {
                    a.transport.add_ice_candidate(candidate).await.expect("candidate applies");
                    exchanged += 1;
                }
                PeerEvent::StateChanged(_, ConnectionState::Connected) => b_up = true,
                _ => {}
            },
            _ = &mut deadline => panic!("links did not connect"),
        }
    }
    exchanged
}

fn feed_video(media: LocalMedia) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Some(track) = media.track(MediaKind::Video) {
                let sample = Sample {
                    data: vec![0u8; 200].into(),
                    duration: Duration::from_millis(33),
                    ..Default::default()
                };
                let _ = track.write_sample(&sample).await;
            }
            tokio::time::sleep(Duration::from_millis(33)).await;
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_native_links_negotiate_and_connect() {
    init_tracing();

    let (track_tx, mut track_rx) = mpsc::unbounded_channel();
    let mut caller = open_side(&RtcPeerFactory::new()).await;
    let mut callee = open_side(&RtcPeerFactory::with_remote_tracks(track_tx)).await;

    negotiate(&caller, &callee, false).await;
    let exchanged = exchange_until_connected(&mut caller, &mut callee).await;
    assert!(exchanged > 0, "candidates were trickled");

    let feeder = feed_video(caller.media.clone());
    let track = tokio::time::timeout(Duration::from_secs(10), track_rx.recv())
        .await
        .expect("remote track within 10s")
        .expect("track sink open");
    assert_eq!(track.kind(), RTPCodecType::Video);
    assert_eq!(track.stream_id(), caller.media.stream_id());
    feeder.abort();

    caller.transport.close().await.unwrap();
    callee.transport.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ice_restart_renegotiates_in_place() {
    init_tracing();

    let mut caller = open_side(&RtcPeerFactory::new()).await;
    let mut callee = open_side(&RtcPeerFactory::new()).await;
    negotiate(&caller, &callee, false).await;
    exchange_until_connected(&mut caller, &mut callee).await;

    negotiate(&caller, &callee, true).await;

    caller.transport.close().await.unwrap();
    callee.transport.close().await.unwrap();
}
