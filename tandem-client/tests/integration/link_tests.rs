use std::time::Duration;
use tandem_client::SessionNotice;
use tandem_core::{
    ConnectionState, IceConnectionState, QualityTier, ServerSignal, SessionConfig,
    SessionDescription, SessionStatus,
};

use crate::integration::{TestSession, create_test_session, init_tracing};
use crate::utils::MockPeerTransport;
use std::sync::Arc;

async fn matched(session: &TestSession, is_initiator: bool) -> Arc<MockPeerTransport> {
    let links = session.peers.links().await.len();
    session.handle.search().await.unwrap();
    session
        .signaling
        .push(ServerSignal::Matched { is_initiator })
        .await;
    let link = session.peers.wait_for_link(links + 1, 5000).await.unwrap();
    if is_initiator {
        assert!(session.signaling.wait_for_sent("offer", 1, 5000).await);
    }
    link
}

#[tokio::test(start_paused = true)]
async fn unconnected_link_is_torn_down_at_timeout() {
    init_tracing();

    let mut session = create_test_session(SessionConfig::default());
    let link = matched(&session, false).await;
    assert_eq!(
        session.handle.snapshot().connection_state,
        Some(ConnectionState::Connecting)
    );

    tokio::time::sleep(Duration::from_secs(11)).await;

    let snapshot = session.wait_for(|s| s.status == SessionStatus::Idle).await;
    assert_eq!(snapshot.connection_state, None);
    assert!(link.is_closed());
    assert_eq!(session.signaling.sent_names().await, vec!["search", "skip"]);
    assert!(
        session
            .drain_notices()
            .contains(&SessionNotice::LinkLost("connection timed out".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_requeues_when_configured() {
    init_tracing();

    let config = SessionConfig {
        auto_requeue: true,
        ..Default::default()
    };
    let session = create_test_session(config);
    matched(&session, false).await;

    tokio::time::sleep(Duration::from_secs(11)).await;

    session.wait_for(|s| s.status == SessionStatus::Queued).await;
    assert_eq!(
        session.signaling.sent_names().await,
        vec!["search", "skip", "search"]
    );
}

#[tokio::test(start_paused = true)]
async fn connected_link_cancels_timer_and_samples_quality() {
    init_tracing();

    let session = create_test_session(SessionConfig::default());
    let link = matched(&session, true).await;

    link.add_remote_video().await;
    link.set_state(ConnectionState::Connected).await;
    session
        .wait_for(|s| s.connection_state == Some(ConnectionState::Connected))
        .await;

    tokio::time::sleep(Duration::from_secs(15)).await;

    let snapshot = session.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Matched);
    assert!(!link.is_closed());
    assert!(snapshot.remote_media.as_ref().is_some_and(|m| m.has_video()));

    let quality = snapshot.quality.expect("quality sampled while connected");
    assert_eq!(quality.bitrate_kbps, 500);
    assert_eq!(quality.quality_tier, QualityTier::Fair);
}

#[tokio::test(start_paused = true)]
async fn peer_leaving_right_after_match_leaves_nothing_running() {
    init_tracing();

    let mut session = create_test_session(SessionConfig::default());
    session.handle.search().await.unwrap();
    session
        .signaling
        .push(ServerSignal::Matched { is_initiator: true })
        .await;
    session.signaling.push(ServerSignal::PeerDisconnected).await;

    let snapshot = session.wait_for(|s| s.status == SessionStatus::Idle).await;
    assert_eq!(snapshot.connection_state, None);
    assert_eq!(snapshot.remote_media, None);
    let link = session.peers.last().await.unwrap();
    assert!(link.is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(session.handle.snapshot().status, SessionStatus::Idle);
    assert_eq!(session.signaling.sent_names().await, vec!["search", "offer"]);
    assert_eq!(
        session.drain_notices(),
        vec![
            SessionNotice::Matched { is_initiator: true },
            SessionNotice::PeerLeft
        ]
    );
}

#[tokio::test]
async fn initiator_restarts_ice_once_then_gives_up() {
    init_tracing();

    let session = create_test_session(SessionConfig::default());
    let link = matched(&session, true).await;
    link.set_state(ConnectionState::Connected).await;

    link.set_ice_state(IceConnectionState::Failed).await;
    assert!(session.signaling.wait_for_sent("offer", 2, 5000).await);
    assert_eq!(link.offers().await, vec![false, true]);

    // Tolerated while the restart is pending.
    link.set_state(ConnectionState::Failed).await;
    link.set_ice_state(IceConnectionState::Checking).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.handle.snapshot().status, SessionStatus::Matched);
    assert!(!link.is_closed());

    link.set_ice_state(IceConnectionState::Failed).await;
    session.wait_for(|s| s.status == SessionStatus::Idle).await;
    assert!(link.is_closed());
    assert_eq!(link.offers().await.len(), 2);
}

#[tokio::test]
async fn receiver_waits_for_the_restart_offer() {
    init_tracing();

    let session = create_test_session(SessionConfig::default());
    let link = matched(&session, false).await;
    session
        .signaling
        .push(ServerSignal::Offer {
            offer: SessionDescription::offer("v=0\r\n"),
        })
        .await;
    assert!(session.signaling.wait_for_sent("answer", 1, 5000).await);
    link.set_state(ConnectionState::Connected).await;

    link.set_ice_state(IceConnectionState::Failed).await;
    link.set_state(ConnectionState::Disconnected).await;
    session
        .signaling
        .push(ServerSignal::Offer {
            offer: SessionDescription::offer("v=0\r\na=ice-options:restart\r\n"),
        })
        .await;
    assert!(session.signaling.wait_for_sent("answer", 2, 5000).await);

    link.set_ice_state(IceConnectionState::Connected).await;
    link.set_state(ConnectionState::Connected).await;
    session
        .wait_for(|s| s.connection_state == Some(ConnectionState::Connected))
        .await;

    assert!(link.offers().await.is_empty());
    assert_eq!(link.answers().await, 2);
    assert_eq!(session.handle.snapshot().status, SessionStatus::Matched);
}

#[tokio::test(start_paused = true)]
async fn stalled_ice_restart_is_bounded_by_the_timer() {
    init_tracing();

    let session = create_test_session(SessionConfig::default());
    let link = matched(&session, true).await;
    link.set_state(ConnectionState::Connected).await;
    link.set_ice_state(IceConnectionState::Failed).await;
    link.set_state(ConnectionState::Disconnected).await;
    assert!(session.signaling.wait_for_sent("offer", 2, 5000).await);

    tokio::time::sleep(Duration::from_secs(11)).await;

    session.wait_for(|s| s.status == SessionStatus::Idle).await;
    assert!(link.is_closed());
}

#[tokio::test]
async fn closed_link_is_torn_down_without_stopping_capture() {
    init_tracing();

    let mut session = create_test_session(SessionConfig::default());
    let link = matched(&session, true).await;
    link.set_state(ConnectionState::Connected).await;

    link.set_state(ConnectionState::Closed).await;

    session.wait_for(|s| s.status == SessionStatus::Idle).await;
    assert!(link.is_closed());
    assert_eq!(session.media.releases(), 0);
    assert!(
        session
            .drain_notices()
            .iter()
            .any(|n| matches!(n, SessionNotice::LinkLost(_)))
    );
}

#[tokio::test]
async fn events_from_a_replaced_link_are_ignored() {
    init_tracing();

    let session = create_test_session(SessionConfig::default());
    let stale = matched(&session, true).await;
    session.handle.skip().await.unwrap();

    stale.set_state(ConnectionState::Connected).await;
    stale.gather_candidate("candidate:stale").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = session.handle.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.connection_state, None);
    assert_eq!(session.signaling.sent_count("ice-candidate").await, 0);
}
