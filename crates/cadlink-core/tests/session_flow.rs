//! Session client and connection manager against the mock broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cadlink_core::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionStatus,
    DefaultConnectionFactory, SessionClientConfig, StaticDocument, StopMode, ValidationScenario,
};
use common::{wait_for_status, Fixture, CLOSE};

#[tokio::test]
async fn start_connects_and_sends_handshake() {
    let mut fx = Fixture::registered().await;
    let client = fx.client(Some("GUID-1"));
    let settings = ConnectionSettings::remote(&fx.broker.url);

    assert!(client.start(&settings).await);
    assert_eq!(client.status(), ConnectionStatus::Connected);

    let hello = fx.broker.next_of_type("handshake").await;
    assert_eq!(hello["session_id"], "sess-1");
    assert_eq!(hello["instance_id"], "inst-1");

    let session = client.session().unwrap();
    assert_eq!(session.file_identity, "GUID-1");
    assert_eq!(session.file_size, "solid model bytes".len() as u64);
    assert!(session.websocket_url.starts_with("ws://"));

    let linked = fx.ledger.get("sess-1").unwrap();
    assert_eq!(linked.document_guid.as_deref(), Some("GUID-1"));

    client.stop().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let fx = Fixture::registered().await;
    let client = fx.client(None);
    let settings = ConnectionSettings::remote(&fx.broker.url);

    assert!(client.start(&settings).await);
    assert!(!client.start(&settings).await);
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(fx.broker.state.created.load(std::sync::atomic::Ordering::SeqCst), 1);

    client.stop().await;
    client.stop().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn concurrent_commands_complete_out_of_order() {
    let mut fx = Fixture::registered().await;
    let client = fx.client(None);
    let mut events = client.subscribe();
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    fx.broker.send(json!({"type":"command","tool":"xyz","params":{"n":1},"correlation_id":"xyz"}));
    fx.broker.send(json!({"type":"command","tool":"abc","params":{"n":2},"correlation_id":"abc"}));

    let first = fx.broker.next_of_type("response").await;
    let second = fx.broker.next_of_type("response").await;
    assert_eq!(first["correlation_id"], "abc");
    assert_eq!(first["result"]["echo"]["n"], 2);
    assert_eq!(second["correlation_id"], "xyz");
    assert_eq!(second["result"]["echo"]["n"], 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::CommandReceived { correlation_id, .. } = event {
            seen.push(correlation_id);
        }
    }
    assert_eq!(seen, vec!["xyz".to_string(), "abc".to_string()]);

    client.stop().await;
}

#[tokio::test]
async fn heartbeat_is_answered_while_tool_runs() {
    let mut fx = Fixture::registered().await;
    let client = fx.client(None);
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    fx.broker.send(json!({"type":"command","tool":"xyz","params":{},"correlation_id":"slow"}));
    fx.broker.send(json!({"type":"heartbeat"}));

    let ack = fx.broker.next_of_type("heartbeat_ack").await;
    assert_eq!(ack["session_id"], "sess-1");
    let ts = ack["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());

    let response = fx.broker.next_of_type("response").await;
    assert_eq!(response["correlation_id"], "slow");
    assert_eq!(client.stats().heartbeats, 1);

    client.stop().await;
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_ignored() {
    let mut fx = Fixture::registered().await;
    let client = fx.client(None);
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    fx.broker.send(json!({"type":"viewport_sync","zoom":2}));
    fx.broker.to_client.send("{not json".to_string()).unwrap();
    fx.broker.send(json!({"type":"command","tool":"ping","correlation_id":"p1"}));

    let response = fx.broker.next_of_type("response").await;
    assert_eq!(response["correlation_id"], "p1");
    assert_eq!(response["result"]["message"], "pong");
    assert_eq!(client.status(), ConnectionStatus::Connected);

    let stats = client.stats();
    assert_eq!(stats.unknown_type, 1);
    assert_eq!(stats.malformed, 1);

    client.stop().await;
}

#[tokio::test]
async fn tool_failures_are_reported_in_response() {
    let mut fx = Fixture::registered().await;
    let client = fx.client(None);
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    fx.broker.send(json!({"type":"command","tool":"fail","params":{},"correlation_id":"f1"}));
    let response = fx.broker.next_of_type("response").await;
    assert_eq!(response["correlation_id"], "f1");
    assert_eq!(response["status"], "error");
    assert_eq!(response["message"], "geometry is invalid");

    fx.broker.send(json!({"type":"command","tool":"nope","params":{},"correlation_id":"f2"}));
    let response = fx.broker.next_of_type("response").await;
    assert_eq!(response["message"], "Unknown command type: nope");

    client.stop().await;
}

#[tokio::test]
async fn server_close_moves_to_failed() {
    let fx = Fixture::registered().await;
    let client = fx.client(None);
    let mut events = client.subscribe();
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    fx.broker.to_client.send(CLOSE.to_string()).unwrap();
    wait_for_status(&client, ConnectionStatus::Failed).await;

    let mut failed_message = None;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::StatusChanged {
            status: ConnectionStatus::Failed,
            message,
        } = event
        {
            failed_message = Some(message);
        }
    }
    assert!(failed_message.unwrap().starts_with("Connection lost"));

    client.stop().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn stopped_session_is_resumed() {
    let fx = Fixture::registered().await;
    let settings = ConnectionSettings::remote(&fx.broker.url);
    let client = fx.client(Some("G"));

    assert!(client.start(&settings).await);
    client.stop().await;
    assert!(fx.ledger.get("sess-1").is_some());

    assert!(client.start(&settings).await);
    assert_eq!(client.session().unwrap().session_id, "sess-1");
    let state = &fx.broker.state;
    assert_eq!(state.created.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(state.resumed.load(std::sync::atomic::Ordering::SeqCst), 1);

    client.stop_with(StopMode::DiscardSession).await;
    assert!(fx.ledger.is_empty());

    assert!(client.start(&settings).await);
    assert_eq!(client.session().unwrap().session_id, "sess-2");
    client.stop().await;
}

#[tokio::test]
async fn expired_session_falls_back_to_create() {
    let fx = Fixture::registered().await;
    let settings = ConnectionSettings::remote(&fx.broker.url);
    let client = fx.client(Some("G"));

    assert!(client.start(&settings).await);
    client.stop().await;
    fx.broker.forget_sessions();

    assert!(client.start(&settings).await);
    assert_eq!(client.session().unwrap().session_id, "sess-2");
    assert!(fx.ledger.get("sess-1").is_none());
    assert!(fx.ledger.get("sess-2").is_some());
    client.stop().await;
}

#[tokio::test]
async fn moved_file_keeps_its_session() {
    let fx = Fixture::registered().await;
    let settings = ConnectionSettings::remote(&fx.broker.url);

    let client = fx.client(Some("G"));
    assert!(client.start(&settings).await);
    client.stop().await;

    let moved = fx.dir.path().join("renamed.3dm");
    std::fs::rename(&fx.document_path, &moved).unwrap();
    assert_eq!(
        fx.ledger.validate_for_connection(&moved, Some("G")).scenario,
        ValidationScenario::FilePathChanged
    );

    let client = fx.client_for(&moved, Some("G"), SessionClientConfig {
        integrity_check_interval: None,
        ..SessionClientConfig::default()
    });
    assert!(client.start(&settings).await);
    assert_eq!(client.session().unwrap().session_id, "sess-1");
    assert_eq!(fx.ledger.get("sess-1").unwrap().file_path, moved);
    client.stop().await;
}

#[tokio::test]
async fn replaced_file_needs_a_decision() {
    let fx = Fixture::registered().await;
    fx.ledger.register("old-session", &fx.document_path, Some("G1")).unwrap();

    let client = fx.client(Some("G2"));
    let mut events = client.subscribe();
    let settings = ConnectionSettings::remote(&fx.broker.url);
    assert!(!client.start(&settings).await);
    assert_eq!(client.status(), ConnectionStatus::Failed);

    let mut message = None;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::StatusChanged { status: ConnectionStatus::Failed, message: m } = event {
            message = Some(m);
        }
    }
    assert!(message.unwrap().contains("different document"));
    assert_eq!(fx.broker.state.created.load(std::sync::atomic::Ordering::SeqCst), 0);

    client.stop().await;
    assert!(client.start(&settings.clone().with_force_new_session(true)).await);
    assert_eq!(fx.ledger.find_by_path(&fx.document_path).unwrap().session_id, "sess-1");
    client.stop().await;
}

#[tokio::test]
async fn missing_document_is_named_in_failure() {
    let fx = Fixture::registered().await;
    let gone = fx.dir.path().join("gone.3dm");
    let client = fx.client_for(&gone, None, SessionClientConfig {
        integrity_check_interval: None,
        ..SessionClientConfig::default()
    });
    let mut events = client.subscribe();

    assert!(!client.start(&ConnectionSettings::remote(&fx.broker.url)).await);
    assert_eq!(client.status(), ConnectionStatus::Failed);

    let mut message = None;
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::StatusChanged { status: ConnectionStatus::Failed, message: m } = event {
            message = Some(m);
        }
    }
    let message = message.unwrap();
    assert!(message.contains("gone.3dm"), "{message}");
    assert!(!message.contains("storage"), "{message}");
    assert_eq!(fx.broker.state.created.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn discard_after_server_renames_session() {
    let mut fx = Fixture::registered().await;
    let settings = ConnectionSettings::remote(&fx.broker.url);
    let client = fx.client(Some("G"));
    assert!(client.start(&settings).await);

    fx.broker.send(json!({"type":"handshake","session_id":"srv-9","instance_id":"inst-2"}));
    // Frames are handled in order, so the ping reply means the rename landed.
    fx.broker.send(json!({"type":"command","tool":"ping","params":{},"correlation_id":"after"}));
    let reply = fx.broker.next_of_type("response").await;
    assert_eq!(reply["correlation_id"], "after");

    assert_eq!(client.session().unwrap().session_id, "srv-9");
    assert!(fx.ledger.get("sess-1").is_none());
    assert!(fx.ledger.get("srv-9").is_some());

    client.stop_with(StopMode::DiscardSession).await;
    assert!(fx.ledger.is_empty());

    assert!(client.start(&settings).await);
    assert_eq!(client.session().unwrap().session_id, "sess-2");
    assert_eq!(fx.broker.state.resumed.load(std::sync::atomic::Ordering::SeqCst), 0);
    client.stop().await;
}

#[tokio::test]
async fn unlicensed_start_never_contacts_broker() {
    let fx = Fixture::new().await;
    let client = fx.client(None);
    assert!(!client.start(&ConnectionSettings::remote(&fx.broker.url)).await);
    assert_eq!(client.status(), ConnectionStatus::Failed);
    assert_eq!(fx.broker.state.created.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn integrity_changes_are_pushed() {
    let mut fx = Fixture::registered().await;
    let client = fx.client_with(None, SessionClientConfig {
        integrity_check_interval: Some(Duration::from_millis(100)),
        ..SessionClientConfig::default()
    });
    assert!(client.start(&ConnectionSettings::remote(&fx.broker.url)).await);

    std::fs::write(&fx.document_path, b"edited and longer model bytes").unwrap();

    let update = fx.broker.next_of_type("file_status_update").await;
    assert_eq!(update["license_id"], "LIC-1");
    let change = &update["status_changes"][0];
    assert_eq!(change["session_id"], "sess-1");
    assert_eq!(change["old_status"], "Available");
    assert_eq!(change["new_status"], "Modified");

    client.stop().await;
}

#[tokio::test]
async fn stop_during_start_does_not_deadlock() {
    let fx = Fixture::registered().await;
    let client = fx.client(None);
    let settings = ConnectionSettings::remote(&fx.broker.url);

    let starter = {
        let client = client.clone();
        tokio::spawn(async move { client.start(&settings).await })
    };
    client.stop().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), starter)
        .await
        .expect("start did not finish");
    client.stop().await;
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn manager_relays_lifecycle_events() {
    let fx = Fixture::registered().await;
    let factory = DefaultConnectionFactory::new(
        fx.license.clone(),
        fx.ledger.clone(),
        Arc::new(Fixture::tools()),
        Arc::new(StaticDocument::new(&fx.document_path, None)),
        SessionClientConfig {
            integrity_check_interval: None,
            ..SessionClientConfig::default()
        },
    );
    let manager = ConnectionManager::new(Arc::new(factory), Duration::from_secs(5));
    let mut events = manager.subscribe();

    assert!(manager.start_connection(&ConnectionSettings::remote(&fx.broker.url)).await);
    assert_eq!(manager.status().await, ConnectionStatus::Connected);
    manager.stop_connection().await;
    assert_eq!(manager.status().await, ConnectionStatus::Disconnected);

    let mut statuses = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
        if let ConnectionEvent::StatusChanged { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected
        ]
    );

    assert!(!manager.start_connection(&ConnectionSettings::local("127.0.0.1", 1999)).await);
}
