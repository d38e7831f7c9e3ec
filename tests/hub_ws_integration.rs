//! Integration tests for the hub WebSocket + REST surface.
//!
//! Each test spins up an Axum server on a random port, connects via
//! tokio-tungstenite, and exercises the real WS / REST contract.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use agent_hub::connections::{
    ConnectionRegistry, HubState, MessageSink, hub_routes, spawn_message_pump,
};
use agent_hub::dispatch::{LoopbackExecutor, TaskDispatcher};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Server {
    port: u16,
    registry: Arc<ConnectionRegistry>,
    _files: tempfile::TempDir,
}

/// Start an Axum server on a random port backed by the loopback executor.
async fn start_server() -> Server {
    let files = tempfile::tempdir().unwrap();
    let registry = ConnectionRegistry::new();
    let (sink, queue) = MessageSink::channel();
    spawn_message_pump(Arc::clone(&registry), queue);

    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::new(LoopbackExecutor),
        sink,
        files.path().to_path_buf(),
    ));
    let app = hub_routes(HubState {
        registry: Arc::clone(&registry),
        dispatcher,
        files_root: files.path().to_path_buf(),
        shutdown: CancellationToken::new(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Server {
        port,
        registry,
        _files: files,
    }
}

async fn connect(port: u16, client_id: &str) -> Client {
    let (ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws/{client_id}"))
        .await
        .expect("WS connect failed");
    ws
}

/// Wait until the registry holds `n` connections.
async fn wait_for_len(registry: &ConnectionRegistry, n: usize) {
    while registry.len().await != n {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

/// Read frames until one with the given `type` arrives; returns it plus everything before it.
async fn read_until_type(ws: &mut Client, kind: &str) -> (Value, Vec<Value>) {
    let mut earlier = Vec::new();
    loop {
        let msg = ws.next().await.unwrap().unwrap();
        if !msg.is_text() {
            continue;
        }
        let json = parse_ws_json(&msg);
        if json["type"] == kind {
            return (json, earlier);
        }
        earlier.push(json);
    }
}

fn user_message(content: &str, summary_method: &str) -> Message {
    let frame = serde_json::json!({
        "type": "user_message",
        "data": {
            "user_id": "alice@example.com",
            "content": content,
            "session_id": "s1",
            "workflow": {"name": "echo", "summary_method": summary_method},
            "history": []
        }
    });
    Message::Text(frame.to_string().into())
}

// ── Registry over real sockets ───────────────────────────────────────

#[tokio::test]
async fn ws_connect_registers_client() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let _ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        assert_eq!(server.registry.client_ids().await, vec!["alice"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_close_deregisters_client() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        ws.close(None).await.unwrap();
        wait_for_len(&server.registry, 0).await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn broadcast_reaches_every_client_in_envelope() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws1 = connect(server.port, "alice").await;
        let mut ws2 = connect(server.port, "bob").await;
        wait_for_len(&server.registry, 2).await;

        let report = server
            .registry
            .broadcast(&serde_json::json!({"type": "announcement", "text": "hello all"}))
            .await;
        assert_eq!(report.delivered, 2);

        for ws in [&mut ws1, &mut ws2] {
            let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
            assert_eq!(json["message"]["type"], "announcement");
            assert_eq!(json["message"]["text"], "hello all");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn broadcast_survives_a_vanished_client() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut stays = connect(server.port, "stays").await;
        let leaves = connect(server.port, "leaves").await;
        wait_for_len(&server.registry, 2).await;

        // Drop the TCP stream without a close handshake.
        drop(leaves);

        // Keep broadcasting until the dead peer has been noticed and removed.
        let mut received = 0;
        while server.registry.len().await != 1 {
            server.registry.broadcast(&serde_json::json!({"n": received})).await;
            let json = parse_ws_json(&stays.next().await.unwrap().unwrap());
            assert_eq!(json["message"]["n"], received);
            received += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(server.registry.client_ids().await, vec!["stays"]);
        let report = server.registry.broadcast(&serde_json::json!({"final": true})).await;
        assert_eq!(report.delivered, 1);
        let json = parse_ws_json(&stays.next().await.unwrap().unwrap());
        assert_eq!(json["message"]["final"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn disconnect_all_closes_sockets() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        server.registry.disconnect_all().await;
        assert!(server.registry.is_empty().await);

        // The client sees a close frame (or end of stream).
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("test timed out");
}

// ── Dispatch over the socket ─────────────────────────────────────────

#[tokio::test]
async fn user_message_gets_agent_response() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        ws.send(user_message("  hello there  ", "last")).await.unwrap();

        let (response, _) = read_until_type(&mut ws, "agent_response").await;
        assert_eq!(response["connection_id"], "alice");
        assert_eq!(response["data"]["status"], true);

        let message = &response["data"]["data"];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "hello there");
        assert_eq!(message["session_id"], "s1");
        assert_eq!(message["meta"]["summary_method"], "last");
        assert!(message["meta"]["time"].as_f64().unwrap() >= 0.0);
        assert_eq!(message["meta"]["messages"].as_array().unwrap().len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn progress_notices_reach_only_the_requesting_client() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut alice = connect(server.port, "alice").await;
        let mut bob = connect(server.port, "bob").await;
        wait_for_len(&server.registry, 2).await;

        alice.send(user_message("ping", "none")).await.unwrap();

        // Notices are pumped asynchronously, so collect frames until we have
        // the response and both progress notices.
        let mut notices = 0;
        let mut responded = false;
        while !(responded && notices == 2) {
            let json = parse_ws_json(&alice.next().await.unwrap().unwrap());
            match json["type"].as_str() {
                Some("agent_message") => {
                    assert_eq!(json["connection_id"], "alice");
                    notices += 1;
                }
                Some("agent_response") => {
                    assert_eq!(json["data"]["data"]["content"], "");
                    responded = true;
                }
                other => panic!("unexpected frame type {other:?}"),
            }
        }

        // Bob got nothing.
        let quiet = timeout(Duration::from_millis(200), bob.next()).await;
        assert!(quiet.is_err(), "bob should not receive alice's traffic");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_workflow_reports_error() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        let frame = serde_json::json!({
            "type": "user_message",
            "data": {"content": "hello", "session_id": "s1"}
        });
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();

        let (response, earlier) = read_until_type(&mut ws, "agent_response").await;
        assert!(earlier.is_empty(), "no progress notices before a config error");
        assert_eq!(response["data"]["status"], false);
        assert!(response["data"]["message"]
            .as_str()
            .unwrap()
            .contains("Workflow must be specified"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn garbage_frames_are_ignored() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let mut ws = connect(server.port, "alice").await;
        wait_for_len(&server.registry, 1).await;

        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(user_message("still alive", "last")).await.unwrap();

        let (response, _) = read_until_type(&mut ws, "agent_response").await;
        assert_eq!(response["data"]["data"]["content"], "still alive");
        assert_eq!(server.registry.len().await, 1);
    })
    .await
    .expect("test timed out");
}

// ── REST ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rest_health() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{}/health", server.port))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_lists_connections() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let _a = connect(server.port, "alice").await;
        let _b = connect(server.port, "bob").await;
        wait_for_len(&server.registry, 2).await;

        let body: Value = reqwest::get(format!("http://127.0.0.1:{}/api/connections", server.port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["total"], 2);
        let mut clients: Vec<String> = body["clients"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap().to_string())
            .collect();
        clients.sort();
        assert_eq!(clients, vec!["alice", "bob"]);
    })
    .await
    .expect("test timed out");
}
