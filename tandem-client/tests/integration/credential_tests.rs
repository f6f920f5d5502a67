use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tandem_client::auth::{ApiError, AuthState, CredentialGate, IceServerSource, RelayDirectory};
use tandem_core::SessionConfig;
use tandem_core::utils::{DEFAULT_STUN_ADDR, RELAY_CREDENTIALS_PATH};

use crate::integration::init_tracing;
use crate::utils::MockApi;

fn gate_over(api: &MockApi) -> Arc<CredentialGate> {
    Arc::new(CredentialGate::new(
        Arc::new(api.clone()),
        &SessionConfig::default(),
    ))
}

#[tokio::test(start_paused = true)]
async fn concurrent_expired_requests_share_one_refresh() {
    init_tracing();

    let api = MockApi::new();
    let gate = gate_over(&api);

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.get("/api/rooms").await })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap().expect("request replayed after refresh");
        assert_eq!(response.status, 200);
    }

    assert_eq!(api.refresh_calls(), 1, "exactly one refresh exchange");
    let calls = api.calls_to("/api/rooms").await;
    assert_eq!(calls.len(), 10, "five originals and five replays");
    assert_eq!(calls.iter().filter(|r| r.retried).count(), 5);
    assert!(gate.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_rejects_every_waiter() {
    init_tracing();

    let api = MockApi::new();
    api.set_refresh_succeeds(false);
    let gate = gate_over(&api);
    let mut auth_state = gate.auth_state();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.get("/api/rooms").await })
        })
        .collect();

    for task in tasks {
        let result = task.await.unwrap();
        assert!(
            matches!(result, Err(ApiError::RefreshFailed(_))),
            "expected refresh failure, got {:?}",
            result
        );
    }

    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.calls_to("/api/rooms").await.len(), 4, "nothing replayed");
    assert!(auth_state.has_changed().unwrap());
    assert_eq!(*auth_state.borrow_and_update(), AuthState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn later_refresh_starts_a_new_exchange() {
    init_tracing();

    let api = MockApi::new();
    let gate = gate_over(&api);

    gate.refresh().await.unwrap();
    gate.refresh().await.unwrap();

    assert_eq!(api.refresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_refresh_releases_the_gate() {
    init_tracing();

    let api = MockApi::new();
    let gate = gate_over(&api);

    let leader = tokio::spawn({
        let gate = gate.clone();
        async move { gate.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let follower = tokio::spawn({
        let gate = gate.clone();
        async move { gate.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    leader.abort();
    assert!(matches!(
        follower.await.unwrap(),
        Err(ApiError::RefreshFailed(_))
    ));

    gate.refresh().await.unwrap();
    assert_eq!(api.refresh_calls(), 2);
}

#[tokio::test]
async fn auth_flow_requests_never_refresh() {
    init_tracing();

    let api = MockApi::new();
    api.route("/auth/login", 401, json!({"message": "bad credentials"}))
        .await;
    let gate = gate_over(&api);

    let result = gate
        .post("/auth/login", Some(json!({"email": "a@b.c", "password": "x"})))
        .await;

    assert_eq!(
        result.unwrap_err(),
        ApiError::Status {
            path: "/auth/login".into(),
            status: 401
        }
    );
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn replayed_request_is_not_refreshed_twice() {
    init_tracing();

    let api = MockApi::new();
    // Refresh "succeeds" but this route keeps answering 401.
    api.route("/api/locked", 401, json!(null)).await;
    let gate = gate_over(&api);

    let result = gate.get("/api/locked").await;

    assert!(matches!(result, Err(ApiError::Status { status: 401, .. })));
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.calls_to("/api/locked").await.len(), 2);
}

#[tokio::test]
async fn relay_directory_returns_served_ice_servers() {
    init_tracing();

    let api = MockApi::authorized();
    api.route(
        RELAY_CREDENTIALS_PATH,
        200,
        json!({"iceServers": [
            {"urls": "stun:relay.test:3478"},
            {"urls": ["turn:relay.test:3478?transport=udp"], "username": "1700000000:u", "credential": "secret"}
        ]}),
    )
    .await;
    let relay = RelayDirectory::new(gate_over(&api), &SessionConfig::default());

    let servers = relay.ice_servers().await;

    assert_eq!(servers.len(), 2);
    assert_eq!(servers[1].username.as_deref(), Some("1700000000:u"));
}

#[tokio::test]
async fn relay_directory_falls_back_on_any_failure() {
    init_tracing();

    let cases = [
        (500, json!({"error": "boom"})),
        (200, json!({"iceServers": []})),
        (200, json!({"unexpected": true})),
        (200, json!("not an object")),
    ];

    for (status, body) in cases {
        let api = MockApi::authorized();
        api.route(RELAY_CREDENTIALS_PATH, status, body.clone()).await;
        let relay = RelayDirectory::new(gate_over(&api), &SessionConfig::default());

        let servers = relay.ice_servers().await;

        assert_eq!(servers.len(), 1, "fallback expected for {status} {body}");
        assert_eq!(servers[0].urls, vec![DEFAULT_STUN_ADDR.to_string()]);
    }
}
