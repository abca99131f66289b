//! End-to-end tests for note-daemon edit sessions.
//!
//! Runs the real router over the in-memory stores: WebSocket upgrade,
//! snapshot delivery, mutation round-trips, admission rejections and lock
//! lifecycle, observed through a plain tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use note_core::model::{Mention, Note, PropertyKind};
use note_core::service::NoteService;
use note_core::session::SessionConfig;
use note_core::store::{
    InMemoryContentStore, InMemoryLineStore, InMemoryPropertyStore, InMemorySessionLock,
    SessionLock,
};
use note_daemon::http::{router, EditState};

type TestService = NoteService<InMemoryLineStore, InMemoryPropertyStore, InMemoryContentStore>;

struct Harness {
    addr: SocketAddr,
    service: Arc<TestService>,
    lock: Arc<InMemorySessionLock>,
}

impl Harness {
    /// Start the daemon router on a random port over in-memory stores.
    async fn start(deadline: Duration) -> Self {
        let service = Arc::new(NoteService::new(
            InMemoryLineStore::new(),
            InMemoryPropertyStore::new(),
            InMemoryContentStore::new(),
        ));
        let lock = Arc::new(InMemorySessionLock::new());

        let state = EditState {
            service: Arc::clone(&service),
            lock: Arc::clone(&lock),
            config: SessionConfig::new(deadline),
        };
        let app = router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            addr,
            service,
            lock,
        }
    }

    async fn seeded_note(&self, line_count: u32) -> Note {
        let note = self
            .service
            .create_note(Mention::user(Uuid::new_v4()))
            .await
            .expect("Failed to create note");
        for i in 1..=line_count {
            self.service
                .insert_line(note.id, i)
                .await
                .expect("Failed to insert line");
        }
        note
    }

    async fn line_count(&self, note: &Note) -> usize {
        self.service
            .list_lines(note.id)
            .await
            .expect("Failed to list lines")
            .len()
    }

    /// Poll until the note has the expected number of lines.
    async fn wait_for_line_count(&self, note: &Note, expected: usize) {
        for _ in 0..100 {
            if self.line_count(note).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "note never reached {expected} line(s), has {}",
            self.line_count(note).await
        );
    }
}

/// Test client editing one note over a WebSocket.
struct EditClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl EditClient {
    async fn connect(addr: SocketAddr, path: &str) -> Self {
        let url = format!("ws://{addr}{path}");
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");
        Self { ws }
    }

    /// Expect the upgrade to be refused; returns the HTTP status.
    async fn expect_rejection(addr: SocketAddr, path: &str) -> u16 {
        let url = format!("ws://{addr}{path}");
        match connect_async(&url).await {
            Ok(_) => panic!("connection should have been rejected"),
            Err(WsError::Http(response)) => response.status().as_u16(),
            Err(other) => panic!("unexpected connect error: {other}"),
        }
    }

    /// Receive the snapshot and connect in one step.
    async fn connect_and_snapshot(addr: SocketAddr, path: &str) -> (Self, Value) {
        let mut client = Self::connect(addr, path).await;
        let snapshot = client.recv_json().await;
        (client, snapshot)
    }

    async fn recv_json(&mut self) -> Value {
        loop {
            match timeout(Duration::from_secs(2), self.ws.next()).await {
                Err(_) => panic!("Timeout waiting for message"),
                Ok(None) => panic!("Stream ended unexpectedly"),
                Ok(Some(Err(e))) => panic!("WebSocket error: {e}"),
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(&text).expect("Expected JSON frame")
                }
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Ok(Some(Ok(other))) => panic!("Unexpected frame: {other:?}"),
            }
        }
    }

    async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send message");
    }

    /// Wait for the server to close the connection.
    async fn expect_server_close(&mut self) {
        loop {
            match timeout(Duration::from_secs(2), self.ws.next()).await {
                Err(_) => panic!("Timeout waiting for close"),
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return,
                Ok(Some(Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn edit_path(note: &Note) -> String {
    format!("/notes/{}/edit", note.id)
}

#[tokio::test]
async fn test_snapshot_on_connect() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(2).await;
    harness
        .service
        .update_line(note.id, 1, Some(PropertyKind::Toggle), vec![])
        .await
        .unwrap();

    let (client, snapshot) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;

    assert_eq!(snapshot["type"], "current");
    let lines = snapshot["entity"].as_array().expect("entity is an array");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["order"], 1);
    assert_eq!(lines[0]["property"]["type"], "toggle");
    assert_eq!(lines[1]["order"], 2);
    assert!(lines[1].get("property").is_none());

    client.close().await;
}

#[tokio::test]
async fn test_mutations_round_trip() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(0).await;

    let (mut client, snapshot) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;
    assert_eq!(snapshot["entity"].as_array().unwrap().len(), 0);

    client.send_text(r#"{"type":"insert","entity":{"to":9}}"#).await;
    harness.wait_for_line_count(&note, 1).await;

    client
        .send_text(
            r#"{"type":"update","entity":{"order":1,"property":{"type":"callout"},"contents":[{"type":"text","entity":{"value":"hello"}}]}}"#,
        )
        .await;
    for _ in 0..100 {
        let views = harness.service.list_lines(note.id).await.unwrap();
        if views[0].property.is_some() && views[0].contents.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let views = harness.service.list_lines(note.id).await.unwrap();
    assert_eq!(views[0].property.unwrap().kind, PropertyKind::Callout);
    assert_eq!(views[0].contents.len(), 1);

    client.send_text(r#"{"type":"insert","entity":{"to":1}}"#).await;
    harness.wait_for_line_count(&note, 2).await;

    client.send_text(r#"{"type":"delete","entity":{"to":2}}"#).await;
    harness.wait_for_line_count(&note, 1).await;

    client.close().await;
}

#[tokio::test]
async fn test_unknown_note_is_rejected_before_upgrade() {
    let harness = Harness::start(Duration::from_secs(60)).await;

    let status =
        EditClient::expect_rejection(harness.addr, &format!("/notes/{}/edit", Uuid::new_v4()))
            .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_second_editor_is_locked_out() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(1).await;

    let (first, _) = EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;

    let status = EditClient::expect_rejection(harness.addr, &edit_path(&note)).await;
    assert_eq!(status, 423, "second session must see a locked status");
    assert_eq!(harness.line_count(&note).await, 1, "rejection mutates nothing");

    first.close().await;

    // The lock is released on disconnect, so a new editor gets in.
    for _ in 0..100 {
        if harness.lock.expires_at(note.id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (second, snapshot) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;
    assert_eq!(snapshot["type"], "current");
    second.close().await;
}

#[tokio::test]
async fn test_stale_lock_fails_open() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(1).await;

    // A session that stopped renewing: lock present but about to expire.
    assert!(harness
        .lock
        .acquire(note.id, Duration::from_millis(50))
        .await
        .unwrap());
    let status = EditClient::expect_rejection(harness.addr, &edit_path(&note)).await;
    assert_eq!(status, 423);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (client, snapshot) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;
    assert_eq!(snapshot["type"], "current");
    client.close().await;
}

#[tokio::test]
async fn test_profile_and_description_endpoints_resolve_notes() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let user_id = Uuid::new_v4();
    let community_id = Uuid::new_v4();
    harness
        .service
        .create_note(Mention::user(user_id))
        .await
        .unwrap();
    harness
        .service
        .create_note(Mention::community(community_id))
        .await
        .unwrap();

    let (client, snapshot) = EditClient::connect_and_snapshot(
        harness.addr,
        &format!("/users/{user_id}/profile/edit"),
    )
    .await;
    assert_eq!(snapshot["type"], "current");
    client.close().await;

    let (client, snapshot) = EditClient::connect_and_snapshot(
        harness.addr,
        &format!("/communities/{community_id}/description/edit"),
    )
    .await;
    assert_eq!(snapshot["type"], "current");
    client.close().await;

    let status = EditClient::expect_rejection(
        harness.addr,
        &format!("/users/{}/profile/edit", Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_failed_mutation_closes_the_session() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(0).await;

    let (mut client, _) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;

    // Deleting a line that does not exist is fatal to the session.
    client.send_text(r#"{"type":"delete","entity":{"to":5}}"#).await;
    client.expect_server_close().await;

    // The lock came free on the way out.
    let (client, snapshot) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;
    assert_eq!(snapshot["type"], "current");
    client.close().await;
}

#[tokio::test]
async fn test_undecodable_frame_does_not_end_the_session() {
    let harness = Harness::start(Duration::from_secs(60)).await;
    let note = harness.seeded_note(0).await;

    let (mut client, _) =
        EditClient::connect_and_snapshot(harness.addr, &edit_path(&note)).await;

    client.send_text("not json at all").await;
    client.send_text(r#"{"type":"insert","entity":{"to":1}}"#).await;

    harness.wait_for_line_count(&note, 1).await;
    client.close().await;
}
