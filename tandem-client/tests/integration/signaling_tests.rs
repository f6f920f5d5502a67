use std::sync::Arc;
use tandem_client::auth::CredentialGate;
use tandem_client::signaling::{
    ConnectErrorReason, SignalEvent, SignalKind, SignalingChannel, SignalingError,
};
use tandem_core::{ClientSignal, ServerSignal, SessionConfig};
use std::sync::Mutex;

use crate::integration::init_tracing;
use crate::utils::{Journal, MockApi, MockSignalingTransport, wait_until};

fn recorder() -> (Arc<Mutex<Vec<SignalEvent>>>, tandem_client::signaling::EventHandler) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: tandem_client::signaling::EventHandler =
        Arc::new(move |event| sink.lock().unwrap().push(event));
    (seen, handler)
}

async fn wait_for_len(seen: &Arc<Mutex<Vec<SignalEvent>>>, len: usize) -> bool {
    wait_until(5000, || {
        let seen = seen.clone();
        async move { seen.lock().unwrap().len() >= len }
    })
    .await
}

#[tokio::test]
async fn inbound_events_reach_the_registered_handler() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    let (seen, handler) = recorder();
    channel.on(SignalKind::Matched, handler);
    channel.connect().await.unwrap();

    transport.push_raw("{not json").await;
    transport.push(ServerSignal::Queued).await;
    transport
        .push(ServerSignal::Matched { is_initiator: true })
        .await;

    assert!(wait_for_len(&seen, 1).await);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[SignalEvent::Server(ServerSignal::Matched { is_initiator: true })]
    );
}

#[tokio::test]
async fn registering_again_replaces_the_handler() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    let (stale, stale_handler) = recorder();
    let (current, current_handler) = recorder();

    channel.on(SignalKind::PeerDisconnected, stale_handler);
    channel.on(SignalKind::PeerDisconnected, current_handler);
    assert_eq!(channel.handler_count(), 1);

    channel.connect().await.unwrap();
    transport.push(ServerSignal::PeerDisconnected).await;

    assert!(wait_for_len(&current, 1).await);
    assert!(stale.lock().unwrap().is_empty());
}

#[tokio::test]
async fn emit_requires_a_connection() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);

    assert_eq!(
        channel.emit(ClientSignal::Search).await,
        Err(SignalingError::NotConnected)
    );

    channel.connect().await.unwrap();
    channel.connect().await.unwrap();
    assert_eq!(transport.opens(), 1, "connect is idempotent");

    channel.emit(ClientSignal::Search).await.unwrap();
    assert_eq!(transport.sent().await, vec![ClientSignal::Search]);
}

#[tokio::test]
async fn teardown_deregisters_and_disconnects_once() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    for kind in SignalKind::ALL {
        channel.on(kind, Arc::new(|_| {}));
    }
    channel.connect().await.unwrap();

    channel.teardown().await;
    channel.teardown().await;
    channel.disconnect().await;

    assert_eq!(channel.handler_count(), 0);
    assert_eq!(transport.closes(), 1);
    assert!(!channel.is_connected().await);
    assert_eq!(channel.connect().await, Err(SignalingError::Closed));
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_refreshes_and_retries_once() {
    init_tracing();

    let api = MockApi::new();
    let gate = Arc::new(CredentialGate::new(
        Arc::new(api.clone()),
        &SessionConfig::default(),
    ));
    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), Some(gate));

    transport.reject_next_opens(1);
    channel.connect().await.unwrap();

    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(transport.opens(), 1);
    assert!(channel.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn second_rejection_is_reported_as_unauthorized() {
    init_tracing();

    let api = MockApi::new();
    let gate = Arc::new(CredentialGate::new(
        Arc::new(api.clone()),
        &SessionConfig::default(),
    ));
    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), Some(gate));

    transport.reject_next_opens(2);

    assert_eq!(channel.connect().await, Err(SignalingError::Unauthorized));
    assert_eq!(api.refresh_calls(), 1);
    assert!(!channel.is_connected().await);
}

#[tokio::test]
async fn connection_errors_are_dispatched() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    let (seen, handler) = recorder();
    channel.on(SignalKind::ConnectionError, handler);
    channel.connect().await.unwrap();

    transport
        .push_error(ConnectErrorReason::Authentication)
        .await;

    assert!(wait_for_len(&seen, 1).await);
    assert_eq!(
        seen.lock().unwrap()[0],
        SignalEvent::ConnectionError(ConnectErrorReason::Authentication)
    );
}

#[tokio::test]
async fn service_hang_up_is_reported_as_a_connection_error() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    let (seen, handler) = recorder();
    channel.on(SignalKind::ConnectionError, handler);
    channel.connect().await.unwrap();

    transport.push_closed().await;

    assert!(wait_for_len(&seen, 1).await);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[SignalEvent::ConnectionError(ConnectErrorReason::Transport(
            "closed".into()
        ))]
    );
}

#[tokio::test]
async fn local_disconnect_is_not_reported() {
    init_tracing();

    let transport = MockSignalingTransport::new(Journal::new());
    let channel = SignalingChannel::new(Arc::new(transport.clone()), None);
    let (seen, handler) = recorder();
    channel.on(SignalKind::ConnectionError, handler);
    channel.connect().await.unwrap();

    channel.reconnect().await.unwrap();
    channel.disconnect().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(transport.closes(), 2);
    assert!(seen.lock().unwrap().is_empty());
}
