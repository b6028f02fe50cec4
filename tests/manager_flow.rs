use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use zenon_connect::client::{ClientNotification, MemoryClient, SignClient, WcStore};
use zenon_connect::connection::{
    ConnectionManagerHandle, ConnectionState, ManagerOptions, ReconcilePath, SettlePolicy,
    Subscription, UriPresenter,
};
use zenon_connect::core::config::DemoWalletConfig;
use zenon_connect::core::{ConnectError, Namespaces, Pairing, Reason, SessionEvent};

struct SilentPresenter;

impl UriPresenter for SilentPresenter {
    fn present(&self, _uri: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn wallet() -> DemoWalletConfig {
    DemoWalletConfig {
        persist_lag_ms: 500,
        ..DemoWalletConfig::default()
    }
}

fn options() -> ManagerOptions {
    ManagerOptions {
        required: Namespaces::zenon(),
        settle: SettlePolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            timeout: Duration::from_secs(10),
        },
        approval_timeout: Duration::from_secs(60),
        watch_store: None,
    }
}

fn start(client: &MemoryClient) -> ConnectionManagerHandle {
    ConnectionManagerHandle::new(
        Arc::new(client.clone()),
        Arc::new(SilentPresenter),
        options(),
    )
}

async fn wait_for_state(
    manager: &ConnectionManagerHandle,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = manager.watch_state();
    let state = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
        .await
        .expect("state never reached")
        .expect("manager stopped");
    state.clone()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_pairing() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);

    let (first, second) = tokio::join!(manager.connect(), manager.connect());
    let (first, first_path) = first.unwrap();
    let (second, second_path) = second.unwrap();

    let mut paths = vec![first_path, second_path];
    paths.sort_by_key(|p| *p != ReconcilePath::NewPairing);
    assert_eq!(paths, vec![ReconcilePath::NewPairing, ReconcilePath::Reused]);
    assert_eq!(first.pairing.topic, second.pairing.topic);
    assert_eq!(first.session.topic, second.session.topic);

    assert_eq!(client.get_all_pairings().await.unwrap().len(), 1);
    assert_eq!(
        client.find_sessions(&Namespaces::zenon()).await.unwrap().len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_info_and_dummy_send() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);

    let err = manager.send_dummy_transaction().await.unwrap_err();
    assert!(matches!(err, ConnectError::NotConnected(_)), "got {:?}", err);

    manager.connect().await.unwrap();
    let state = manager.state();
    assert!(state.is_connected());
    assert_eq!(state.pairings.len(), 1);

    let info = manager.get_info().await.unwrap();
    assert_eq!(info.address, wallet().address);
    assert_eq!(manager.state().address, wallet().address);
    assert_eq!(manager.state().chain_id, Some(wallet().chain_id));

    let block = manager.send_dummy_transaction().await.unwrap();
    assert_eq!(block["toAddress"], json!(wallet().address));
    assert_eq!(block["amount"], json!("100000000"));
    assert!(block["hash"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_dummy_send_requires_wallet_info() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);
    manager.connect().await.unwrap();

    match manager.send_dummy_transaction().await.unwrap_err() {
        ConnectError::NotConnected(message) => {
            assert_eq!(message, "You must get wallet info first!")
        }
        other => panic!("expected NotConnected, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wallet_events_update_projection() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);
    let (connection, _) = manager.connect().await.unwrap();

    let new_address = "z1qph8fx8ec9xv9fvq4tdgnxe8s5pvl4dt8x6ngz";
    client.emit_event(
        &connection.session.topic,
        SessionEvent {
            name: "addressChange".to_string(),
            data: json!(new_address),
        },
    );
    client.emit_event(
        &connection.session.topic,
        SessionEvent {
            name: "chainIdChange".to_string(),
            data: json!(3),
        },
    );

    let state = wait_for_state(&manager, |s| s.chain_id == Some(3)).await;
    assert_eq!(state.address, new_address);
    assert_eq!(state.events.len(), 2);
    assert_eq!(state.events[0].event.name, "chainIdChange");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_session_then_reconnect_uses_same_pairing() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);
    let (first, _) = manager.connect().await.unwrap();

    manager
        .disconnect_session(None, Reason::default())
        .await
        .unwrap();
    let state = manager.state();
    assert!(state.current_session.is_none());
    assert!(state.sessions.is_empty());
    assert_eq!(state.pairings.len(), 1);

    let (second, path) = manager.connect().await.unwrap();
    assert_eq!(path, ReconcilePath::NewSession);
    assert_eq!(second.pairing.topic, first.pairing.topic);
    assert_ne!(second.session.topic, first.session.topic);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_all_clears_everything() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);
    manager.connect().await.unwrap();

    let count = manager
        .disconnect_all(Reason::with_message(Some("bye".to_string()), None))
        .await
        .unwrap();
    assert_eq!(count, 1);

    let state = manager.snapshot().await.unwrap();
    assert!(!state.is_connected());
    assert!(state.pairings.is_empty());
    assert!(state.sessions.is_empty());
    assert!(client.get_all_pairings().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_proposal_is_negotiation_error() {
    let client = MemoryClient::new(DemoWalletConfig {
        auto_approve: false,
        ..wallet()
    });
    let manager = start(&client);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, ConnectError::Negotiation(_)), "got {:?}", err);
    assert!(manager.state().current_session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_stops_forwarding() {
    let client = MemoryClient::new(wallet());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = Subscription::forward(&client, tx);
    assert!(subscription.is_active());

    let event = SessionEvent {
        name: "addressChange".to_string(),
        data: json!("z1qph8fx8ec9xv9fvq4tdgnxe8s5pvl4dt8x6ngz"),
    };
    client.emit_event("s", event.clone());
    match rx.recv().await {
        Some(ClientNotification::SessionEvent { event: got, .. }) => assert_eq!(got, event),
        other => panic!("unexpected notification {:?}", other),
    }

    drop(subscription);
    client.emit_event("s", event);
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sign_dummy_signs_one_point_one_znn() {
    let client = MemoryClient::new(wallet());
    let manager = start(&client);
    manager.connect().await.unwrap();

    let err = manager.sign_dummy_transaction().await.unwrap_err();
    assert!(matches!(err, ConnectError::NotConnected(_)), "got {:?}", err);

    manager.get_info().await.unwrap();
    let signed = manager.sign_dummy_transaction().await.unwrap();
    assert_eq!(signed["accountBlock"]["amount"], json!("110000000"));
    assert_eq!(signed["accountBlock"]["toAddress"], json!(wallet().address));
    assert!(signed["signature"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_wallet_side_disconnect_clears_projection() {
    // Persisting takes longer than the first settle delay
    let client = MemoryClient::new(DemoWalletConfig {
        persist_lag_ms: 1500,
        ..wallet()
    });
    let manager = start(&client);
    let (connection, _) = manager.connect().await.unwrap();
    assert!(manager.state().is_connected());

    client
        .disconnect_pairing(&connection.pairing.topic)
        .await
        .unwrap();

    let state = wait_for_state(&manager, |s| s.pairings.is_empty() && s.sessions.is_empty()).await;
    assert!(!state.is_connected());
    assert!(state.current_pairing.is_none());
    assert!(state.current_session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_wallet_side_session_delete_keeps_pairing() {
    let client = MemoryClient::new(DemoWalletConfig {
        persist_lag_ms: 1500,
        ..wallet()
    });
    let manager = start(&client);
    let (connection, _) = manager.connect().await.unwrap();

    client
        .delete_session(&connection.session.topic, Reason::default())
        .await
        .unwrap();

    let state = wait_for_state(&manager, |s| s.sessions.is_empty()).await;
    assert!(state.current_session.is_none());
    assert_eq!(
        state.current_pairing.map(|p| p.topic),
        Some(connection.pairing.topic)
    );
    assert_eq!(state.pairings.len(), 1);
}

// Real clock: the store watcher is driven by filesystem events.
#[tokio::test]
async fn test_store_written_elsewhere_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = WcStore::new(dir.path().join("wc-store.json"));
    let client = MemoryClient::open(
        DemoWalletConfig {
            persist_lag_ms: 20,
            ..wallet()
        },
        store.clone(),
    )
    .await
    .unwrap();
    let manager = ConnectionManagerHandle::new(
        Arc::new(client.clone()),
        Arc::new(SilentPresenter),
        ManagerOptions {
            settle: SettlePolicy {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                backoff_factor: 2.0,
                timeout: Duration::from_secs(5),
            },
            watch_store: Some(store.clone()),
            ..options()
        },
    );
    manager.connect().await.unwrap();

    let mut snapshot = store.load().await.unwrap();
    snapshot.pairings.push(Pairing {
        topic: "external".to_string(),
        active: false,
        expiry: 0,
        created_at: None,
        peer_metadata: None,
    });
    store.save(&snapshot).await.unwrap();

    let state = wait_for_state(&manager, |s| {
        s.pairings.iter().any(|p| p.topic == "external")
    })
    .await;
    assert_eq!(state.pairings.len(), 2);
}
