//! NIP-01 relay framing plus event signing and acceptance.
//!
//! Client → relay:
//! ```text
//! ["EVENT", <event>]
//! ["REQ", <sub id>, <filter>]
//! ["CLOSE", <sub id>]
//! ```
//! Relay → client: `EVENT`, `EOSE`, `OK`, `NOTICE`, `CLOSED`. Anything else
//! is ignored.

use std::time::Duration;

use nostr::{Event, EventBuilder, Filter, Keys, Kind, Tag, Timestamp};
use planebattle_core::PlayerId;
use serde_json::{json, Value};

use super::keys::short_id;
use super::{GossipKind, GossipWindows};

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("failed to sign event: {0}")]
    Sign(String),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sign a room event carrying `content` as JSON.
pub fn build_event(
    keys: &Keys,
    kind: GossipKind,
    room: &str,
    content: &Value,
    now_ms: u64,
) -> Result<Event, GossipError> {
    let content = serde_json::to_string(content)?;
    EventBuilder::new(Kind::from(kind.as_u16()), content)
        .tags([Tag::hashtag(room), Tag::public_key(keys.public_key())])
        .custom_created_at(Timestamp::from(now_ms / 1000))
        .sign_with_keys(keys)
        .map_err(|e| GossipError::Sign(e.to_string()))
}

/// An event that passed every acceptance check.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedEvent {
    /// Hex event id
    pub id: String,
    pub kind: GossipKind,
    pub author: PlayerId,
    /// Event timestamp in milliseconds
    pub created_at: u64,
    pub content: Value,
}

fn has_room_tag(event: &Event, room: &str) -> bool {
    event.tags.iter().any(|tag| {
        let parts = tag.as_slice();
        parts.len() >= 2 && parts[0] == "t" && parts[1] == room
    })
}

/// Accept an inbound event or say why not (at debug level). Rejected: an
/// unknown kind, a missing room tag, a timestamp outside the kind's window,
/// a bad signature, content that is not JSON.
pub fn validate_event(
    event: &Event,
    room: &str,
    windows: &GossipWindows,
    now_ms: u64,
) -> Option<AcceptedEvent> {
    let kind = GossipKind::from_u16(event.kind.as_u16())?;
    if !has_room_tag(event, room) {
        log::debug!("Dropping event {} without room tag", event.id);
        return None;
    }
    let created_at = event.created_at.as_u64().saturating_mul(1000);
    let window: Duration = windows.for_kind(kind);
    if now_ms.saturating_sub(created_at) > window.as_millis() as u64 {
        log::debug!("Dropping stale {kind:?} event {}", event.id);
        return None;
    }
    if let Err(e) = event.verify() {
        log::debug!("Dropping event {} with bad signature: {e}", event.id);
        return None;
    }
    let content = match serde_json::from_str::<Value>(&event.content) {
        Ok(content) => content,
        Err(_) => {
            log::debug!("Dropping event {} with malformed content", event.id);
            return None;
        }
    };
    Some(AcceptedEvent {
        id: event.id.to_hex(),
        kind,
        author: short_id(&event.pubkey),
        created_at,
        content,
    })
}

/// Subscription for one kind in `room`, starting `window` before now.
pub fn room_filter(kind: GossipKind, room: &str, window: Duration, now_ms: u64) -> Filter {
    let since = now_ms.saturating_sub(window.as_millis() as u64) / 1000;
    Filter::new()
        .kind(Kind::from(kind.as_u16()))
        .hashtag(room)
        .since(Timestamp::from(since))
}

pub fn event_frame(event: &Event) -> String {
    json!(["EVENT", event]).to_string()
}

pub fn req_frame(subscription: &str, filter: &Filter) -> String {
    json!(["REQ", subscription, filter]).to_string()
}

pub fn close_frame(subscription: &str) -> String {
    json!(["CLOSE", subscription]).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription: String,
        event: Box<Event>,
    },
    Eose(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Closed {
        subscription: String,
        message: String,
    },
}

/// Parse one relay text frame. `None` for anything malformed or unknown.
pub fn parse_relay_frame(text: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    let parts = value.as_array()?;
    let str_at = |i: usize| parts.get(i).and_then(Value::as_str).map(str::to_string);
    match parts.first()?.as_str()? {
        "EVENT" => {
            let event: Event = serde_json::from_value(parts.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event {
                subscription: str_at(1)?,
                event: Box::new(event),
            })
        }
        "EOSE" => Some(RelayMessage::Eose(str_at(1)?)),
        "OK" => Some(RelayMessage::Ok {
            event_id: str_at(1)?,
            accepted: parts.get(2)?.as_bool()?,
            message: str_at(3).unwrap_or_default(),
        }),
        "NOTICE" => Some(RelayMessage::Notice(str_at(1)?)),
        "CLOSED" => Some(RelayMessage::Closed {
            subscription: str_at(1)?,
            message: str_at(2).unwrap_or_default(),
        }),
        _ => None,
    }
}
