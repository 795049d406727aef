//! Shared fixtures: a room server and a minimal in-process NIP-01 relay on
//! free localhost ports.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use planebattle_sync::{RoomServer, RoomServerConfig};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// Start a room server, return its `ws://` base URL.
pub async fn start_room_server() -> (String, Arc<RoomServer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(RoomServer::new(RoomServerConfig {
        bind_addr: addr.to_string(),
        max_peers_per_room: 10,
        broadcast_capacity: 256,
    }));
    let s = server.clone();
    tokio::spawn(async move {
        let _ = s.serve(listener).await;
    });
    (format!("ws://{addr}"), server)
}

/// Accepts TCP connections and never answers the WebSocket handshake.
pub async fn start_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("ws://{addr}")
}

/// Poll `step` every 10ms for up to 3s.
pub async fn eventually(mut step: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if step() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Let in-flight frames land without checking anything.
pub async fn settle(mut step: impl FnMut()) {
    for _ in 0..20 {
        step();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── relay ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestRelay {
    pub url: String,
    stored: Arc<Mutex<Vec<Value>>>,
}

impl TestRelay {
    pub fn stored_events(&self) -> usize {
        self.stored.lock().len()
    }

    pub fn stored_kinds(&self, kind: u64) -> usize {
        self.stored
            .lock()
            .iter()
            .filter(|e| e["kind"].as_u64() == Some(kind))
            .count()
    }
}

fn matches(filter: &Value, event: &Value) -> bool {
    if let Some(kinds) = filter["kinds"].as_array() {
        if !kinds.contains(&event["kind"]) {
            return false;
        }
    }
    if let Some(since) = filter["since"].as_u64() {
        if event["created_at"].as_u64().unwrap_or(0) < since {
            return false;
        }
    }
    if let Some(wanted) = filter["#t"].as_array() {
        let tagged = event["tags"].as_array().into_iter().flatten().any(|tag| {
            tag[0] == "t" && wanted.contains(&tag[1])
        });
        if !tagged {
            return false;
        }
    }
    true
}

pub async fn start_relay() -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stored = Arc::new(Mutex::new(Vec::new()));
    let (fanout, _) = broadcast::channel::<Value>(1024);

    let relay = TestRelay {
        url: format!("ws://{addr}"),
        stored: stored.clone(),
    };
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stored = stored.clone();
            let fanout = fanout.clone();
            tokio::spawn(async move {
                let _ = serve_relay_peer(stream, stored, fanout).await;
            });
        }
    });
    relay
}

async fn serve_relay_peer(
    stream: TcpStream,
    stored: Arc<Mutex<Vec<Value>>>,
    fanout: broadcast::Sender<Value>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut tx, mut rx) = ws.split();
    let mut live = fanout.subscribe();
    let mut subs: HashMap<String, Value> = HashMap::new();

    loop {
        tokio::select! {
            msg = rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(Value::Array(parts)) = serde_json::from_str::<Value>(&text) else { continue };
                match parts.first().and_then(Value::as_str) {
                    Some("REQ") => {
                        let sub = parts[1].as_str().unwrap_or_default().to_string();
                        let filter = parts.get(2).cloned().unwrap_or(Value::Null);
                        let backlog: Vec<Value> = stored
                            .lock()
                            .iter()
                            .filter(|e| matches(&filter, e))
                            .cloned()
                            .collect();
                        for event in backlog {
                            tx.send(Message::Text(json!(["EVENT", sub, event]).to_string().into())).await?;
                        }
                        tx.send(Message::Text(json!(["EOSE", sub]).to_string().into())).await?;
                        subs.insert(sub, filter);
                    }
                    Some("EVENT") => {
                        let event = parts.get(1).cloned().unwrap_or(Value::Null);
                        let id = event["id"].clone();
                        stored.lock().push(event.clone());
                        let _ = fanout.send(event);
                        tx.send(Message::Text(json!(["OK", id, true, ""]).to_string().into())).await?;
                    }
                    Some("CLOSE") => {
                        if let Some(sub) = parts.get(1).and_then(Value::as_str) {
                            subs.remove(sub);
                        }
                    }
                    _ => {
                        tx.send(Message::Text(json!(["NOTICE", "unsupported"]).to_string().into())).await?;
                    }
                }
            }
            event = live.recv() => {
                let Ok(event) = event else { break };
                for (sub, filter) in &subs {
                    if matches(filter, &event) {
                        tx.send(Message::Text(json!(["EVENT", sub, event]).to_string().into())).await?;
                    }
                }
            }
        }
    }
    Ok(())
}
