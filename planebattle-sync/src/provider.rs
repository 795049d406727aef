//! Client side of the room protocol.
//!
//! Lifecycle:
//! ```text
//! connect(sv) ── Join(sv) ──► server
//!             ◄── SyncStep2(diff) ── "synced", connect resolves
//!             ◄── Presence(full records) …
//! poll()      ◄── Update / Presence / PeerLeft from other sessions
//! ```
//!
//! Frames that arrive before the diff are kept and handed out by the first
//! `poll`, so nothing broadcast during the handshake is lost.

use std::collections::VecDeque;
use std::time::Duration;

use planebattle_core::ConnectionError;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::presence::PresenceUpdate;
use crate::protocol::{MessageType, SyncMessage};
use crate::transport::{Frame, ObserverId, TransportAdapter, TransportEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A document update from another session.
    Update(Vec<u8>),
    Presence(PresenceUpdate),
    PeerLeft(Uuid),
    /// The stream closed.
    Closed,
    /// The stream reported an error. The provider stays usable.
    TransportError(String),
}

pub struct RoomProvider {
    room: String,
    session: Uuid,
    transport: TransportAdapter,
    observer: Option<(ObserverId, mpsc::UnboundedReceiver<TransportEvent>)>,
    clock: u64,
    backlog: VecDeque<ProviderEvent>,
}

/// Turn one inbound frame into an event. Our own echoes and anything that
/// fails to decode are dropped.
fn decode_frame(session: Uuid, room: &str, frame: Frame) -> Option<Decoded> {
    let Frame::Binary(bytes) = frame else {
        log::debug!("Ignoring text frame in room {room}");
        return None;
    };
    let msg = match SyncMessage::decode(&bytes) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("Dropping undecodable frame in room {room}: {e}");
            return None;
        }
    };
    if msg.room != room {
        log::debug!("Dropping frame for foreign room {}", msg.room);
        return None;
    }
    if msg.peer_id == session && msg.msg_type != MessageType::SyncStep2 {
        return None;
    }
    match msg.msg_type {
        MessageType::SyncStep2 => Some(Decoded::Synced(msg.payload)),
        MessageType::Update => Some(Decoded::Event(ProviderEvent::Update(msg.payload))),
        MessageType::Presence => match msg.presence_update() {
            Ok(update) => Some(Decoded::Event(ProviderEvent::Presence(update))),
            Err(e) => {
                log::debug!("Dropping malformed presence from {}: {e}", msg.peer_id);
                None
            }
        },
        MessageType::PeerLeft => Some(Decoded::Event(ProviderEvent::PeerLeft(msg.peer_id))),
        MessageType::Join => None,
    }
}

enum Decoded {
    Synced(Vec<u8>),
    Event(ProviderEvent),
}

impl RoomProvider {
    /// `url` is the server base; the room name is appended as the path.
    pub fn new(url: &str, room: impl Into<String>, session: Uuid) -> Self {
        let room = room.into();
        let url = format!("{}/{}", url.trim_end_matches('/'), room);
        Self {
            room,
            session,
            transport: TransportAdapter::new(url),
            observer: None,
            clock: 0,
            backlog: VecDeque::new(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Open the stream, send our state vector and wait for the server's
    /// diff. The whole handshake shares one `timeout`.
    pub async fn connect(
        &mut self,
        state_vector: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ConnectionError> {
        let deadline = Instant::now() + timeout;
        let (id, rx) = self.transport.observe();
        self.observer = Some((id, rx));

        match timeout_at(deadline, self.transport.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectionError::Failed(e.to_string())),
            Err(_) => return Err(ConnectionError::Timeout(timeout)),
        }

        let join = SyncMessage::join(self.session, self.room.clone(), state_vector);
        let bytes = join
            .encode()
            .map_err(|e| ConnectionError::Failed(e.to_string()))?;
        self.transport.send(Frame::Binary(bytes));

        let Some((_, rx)) = self.observer.as_mut() else {
            return Err(ConnectionError::Failed("observer dropped".into()));
        };
        loop {
            let event = match timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(ConnectionError::Failed("transport dropped".into())),
                Err(_) => return Err(ConnectionError::Timeout(timeout)),
            };
            match event {
                TransportEvent::Message(frame) => {
                    match decode_frame(self.session, &self.room, frame) {
                        Some(Decoded::Synced(diff)) => {
                            log::info!("Synced with room {}", self.room);
                            return Ok(diff);
                        }
                        Some(Decoded::Event(event)) => self.backlog.push_back(event),
                        None => {}
                    }
                }
                TransportEvent::Close => {
                    return Err(ConnectionError::Failed("closed before sync".into()))
                }
                TransportEvent::Error(e) => return Err(ConnectionError::Failed(e)),
                TransportEvent::Open => {}
            }
        }
    }

    /// Drain everything delivered since the last call, in arrival order.
    pub fn poll(&mut self) -> Vec<ProviderEvent> {
        let mut events: Vec<ProviderEvent> = self.backlog.drain(..).collect();
        let Some((_, rx)) = self.observer.as_mut() else {
            return events;
        };
        while let Ok(event) = rx.try_recv() {
            match event {
                TransportEvent::Message(frame) => {
                    match decode_frame(self.session, &self.room, frame) {
                        // A late diff is just more document state
                        Some(Decoded::Synced(diff)) => events.push(ProviderEvent::Update(diff)),
                        Some(Decoded::Event(event)) => events.push(event),
                        None => {}
                    }
                }
                TransportEvent::Close => events.push(ProviderEvent::Closed),
                TransportEvent::Error(e) => events.push(ProviderEvent::TransportError(e)),
                TransportEvent::Open => {}
            }
        }
        events
    }

    pub fn send_update(&mut self, update: Vec<u8>) {
        self.clock += 1;
        let msg = SyncMessage::update(self.session, self.room.clone(), self.clock, update);
        self.send(&msg);
    }

    pub fn send_presence(&mut self, update: &PresenceUpdate) {
        match SyncMessage::presence(self.room.clone(), update) {
            Ok(msg) => self.send(&msg),
            Err(e) => log::debug!("Failed to encode presence: {e}"),
        }
    }

    fn send(&self, msg: &SyncMessage) {
        match msg.encode() {
            Ok(bytes) => self.transport.send(Frame::Binary(bytes)),
            Err(e) => log::debug!("Failed to encode {:?}: {e}", msg.msg_type),
        }
    }

    /// Stop observing and close the stream. Idempotent.
    pub fn close(&mut self) {
        if let Some((id, _)) = self.observer.take() {
            self.transport.unobserve(id);
        }
        self.backlog.clear();
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceDelta;

    #[test]
    fn test_url_includes_room() {
        let provider = RoomProvider::new("ws://127.0.0.1:1234/", "game-room", Uuid::new_v4());
        assert_eq!(provider.transport.url(), "ws://127.0.0.1:1234/game-room");
        assert_eq!(provider.room(), "game-room");
    }

    #[test]
    fn test_decode_skips_own_echo() {
        let me = Uuid::new_v4();
        let msg = SyncMessage::update(me, "r", 1, vec![1]);
        let frame = Frame::Binary(msg.encode().unwrap());
        assert!(decode_frame(me, "r", frame).is_none());
    }

    #[test]
    fn test_decode_foreign_room_and_garbage() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let msg = SyncMessage::update(other, "elsewhere", 1, vec![1]);
        assert!(decode_frame(me, "r", Frame::Binary(msg.encode().unwrap())).is_none());
        assert!(decode_frame(me, "r", Frame::Binary(vec![0xFF, 0x00])).is_none());
        assert!(decode_frame(me, "r", Frame::Text("hi".into())).is_none());
    }

    #[test]
    fn test_decode_presence() {
        let me = Uuid::new_v4();
        let update = PresenceUpdate {
            session: Uuid::new_v4(),
            clock: 1,
            delta: PresenceDelta::Clear,
        };
        let msg = SyncMessage::presence("r", &update).unwrap();
        match decode_frame(me, "r", Frame::Binary(msg.encode().unwrap())) {
            Some(Decoded::Event(ProviderEvent::Presence(got))) => assert_eq!(got, update),
            _ => panic!("expected presence"),
        }
    }

    #[test]
    fn test_close_without_connect() {
        let mut provider = RoomProvider::new("ws://127.0.0.1:1", "r", Uuid::new_v4());
        provider.close();
        provider.close();
        assert!(provider.poll().is_empty());
    }
}
