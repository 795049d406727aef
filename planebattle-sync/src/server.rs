//! WebSocket room server for the document and presence backends.
//!
//! ```text
//! Client A ──┐
//!             ├── GameRoom (name) ── DocumentReplica ── BroadcastGroup
//! Client B ──┘          │                                   │
//!                       └── PresenceRecords                 ├──► Client A
//!                                                           └──► Client B
//! ```
//!
//! Each room keeps the authoritative document and the folded presence
//! record of every connected session. A joining client gets the document
//! diff against its state vector followed by every presence record. A
//! session's record is dropped when its socket closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Envelope};
use crate::presence::PresenceRecords;
use crate::protocol::{MessageType, SyncMessage};
use crate::replica::DocumentReplica;

#[derive(Debug, Clone)]
pub struct RoomServerConfig {
    pub bind_addr: String,
    pub max_peers_per_room: usize,
    /// Frames buffered per peer before a slow peer starts lagging
    pub broadcast_capacity: usize,
}

impl Default for RoomServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1234".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_rooms: usize,
}

struct GameRoom {
    replica: DocumentReplica,
    broadcast: Arc<BroadcastGroup>,
    presence: PresenceRecords,
}

impl GameRoom {
    fn new(broadcast_capacity: usize) -> Self {
        Self {
            replica: DocumentReplica::new(),
            broadcast: Arc::new(BroadcastGroup::new(broadcast_capacity)),
            presence: PresenceRecords::new(),
        }
    }
}

type Rooms = Arc<RwLock<HashMap<String, GameRoom>>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct RoomServer {
    config: RoomServerConfig,
    rooms: Rooms,
    stats: Arc<RwLock<ServerStats>>,
}

impl RoomServer {
    pub fn new(config: RoomServerConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Room server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Rooms,
        stats: Arc<RwLock<ServerStats>>,
        config: RoomServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::debug!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut session: Option<Uuid> = None;
        let mut room_name: Option<String> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Envelope>> = None;

        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                let sync_msg = match SyncMessage::decode(&bytes) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        continue;
                                    }
                                };
                                stats.write().await.total_messages += 1;

                                match sync_msg.msg_type {
                                    MessageType::Join if session.is_none() => {
                                        let mut rooms_w = rooms.write().await;
                                        let room = rooms_w
                                            .entry(sync_msg.room.clone())
                                            .or_insert_with(|| GameRoom::new(config.broadcast_capacity));
                                        if room.broadcast.peer_count().await >= config.max_peers_per_room {
                                            log::warn!("Room {} is full, refusing {addr}", sync_msg.room);
                                            break;
                                        }

                                        broadcast_rx = Some(room.broadcast.add_peer(sync_msg.peer_id).await);
                                        let diff = room
                                            .replica
                                            .diff(&sync_msg.payload)
                                            .unwrap_or_else(|_| room.replica.encode_state());
                                        let records = room.presence.full_state();
                                        let room_count = rooms_w.len();
                                        drop(rooms_w);

                                        session = Some(sync_msg.peer_id);
                                        room_name = Some(sync_msg.room.clone());

                                        let step2 = SyncMessage::sync_step2(Uuid::nil(), sync_msg.room.clone(), diff);
                                        ws_sender.send(Message::Binary(step2.encode()?.into())).await?;
                                        for record in &records {
                                            let msg = SyncMessage::presence(sync_msg.room.clone(), record)?;
                                            ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
                                        }

                                        stats.write().await.active_rooms = room_count;
                                        log::info!("Session {} joined room {}", sync_msg.peer_id, sync_msg.room);
                                    }

                                    MessageType::Update => {
                                        let Some(name) = room_name.as_ref() else { continue };
                                        // Write lock: the document allows one transaction at a time
                                        let rooms_w = rooms.write().await;
                                        if let Some(room) = rooms_w.get(name) {
                                            match room.replica.apply_update(&sync_msg.payload) {
                                                Ok(()) => {
                                                    room.broadcast.broadcast_raw(sync_msg.peer_id, Arc::new(bytes));
                                                }
                                                Err(e) => log::debug!("Rejected update from {addr}: {e}"),
                                            }
                                        }
                                    }

                                    MessageType::Presence => {
                                        let (Some(name), Some(sid)) = (room_name.as_ref(), session) else { continue };
                                        let update = match sync_msg.presence_update() {
                                            Ok(u) if u.session == sid => u,
                                            Ok(_) => {
                                                log::debug!("Presence for foreign session from {addr}");
                                                continue;
                                            }
                                            Err(e) => {
                                                log::debug!("Malformed presence from {addr}: {e}");
                                                continue;
                                            }
                                        };
                                        let mut rooms_w = rooms.write().await;
                                        if let Some(room) = rooms_w.get_mut(name) {
                                            if room.presence.apply(&update) {
                                                room.broadcast.broadcast_raw(sid, Arc::new(bytes));
                                            }
                                        }
                                    }

                                    other => log::debug!("Unhandled message type: {other:?}"),
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::debug!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::warn!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    envelope = async {
                        match broadcast_rx.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match envelope {
                            Ok(envelope) => {
                                if Some(envelope.from) == session {
                                    continue;
                                }
                                ws_sender.send(Message::Binary(envelope.bytes.to_vec().into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Session {session:?} lagged by {n} messages");
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup runs whether the loop ended cleanly or on a send error
        if let (Some(sid), Some(name)) = (session, room_name) {
            let mut rooms_w = rooms.write().await;
            if let Some(room) = rooms_w.get_mut(&name) {
                room.broadcast.remove_peer(&sid).await;
                room.presence.remove(&sid);
                let _ = room.broadcast.broadcast(&SyncMessage::peer_left(sid, name.clone()));

                if room.broadcast.peer_count().await == 0 {
                    rooms_w.remove(&name);
                    log::info!("Room {name} removed (empty)");
                }
            }
            stats.write().await.active_rooms = rooms_w.len();
            log::info!("Session {sid} left room {name}");
        }
        stats.write().await.active_connections -= 1;

        result
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Presence records currently held for `room`.
    pub async fn presence_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or(0, |r| r.presence.len())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RoomServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:1234");
        assert_eq!(config.max_peers_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[tokio::test]
    async fn test_new_server_is_empty() {
        let server = RoomServer::new(RoomServerConfig::default());
        assert_eq!(server.room_count().await, 0);
        assert_eq!(server.stats().await, ServerStats::default());
        assert_eq!(server.presence_count("game-room").await, 0);
    }
}
