//! Signed-event gossip over public relays.
//!
//! - [`keys`]: the per-installation keypair and its stores
//! - [`relay`]: NIP-01 framing, event signing and validation
//! - [`state`]: the merged view built from accepted events

pub mod keys;
pub mod relay;
pub mod state;

use std::time::Duration;

pub use keys::{load_or_create_keys, short_id, FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore};
pub use relay::{build_event, parse_relay_frame, validate_event, AcceptedEvent, GossipError, RelayMessage};
pub use state::GossipState;

/// Event kinds carried in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum GossipKind {
    PlayerState = 1000,
    Bullet = 1001,
    GameState = 1002,
}

impl GossipKind {
    pub const ALL: [GossipKind; 3] = [GossipKind::PlayerState, GossipKind::Bullet, GossipKind::GameState];

    pub fn from_u16(kind: u16) -> Option<Self> {
        match kind {
            1000 => Some(GossipKind::PlayerState),
            1001 => Some(GossipKind::Bullet),
            1002 => Some(GossipKind::GameState),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// How far back each kind is requested and accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipWindows {
    pub player: Duration,
    pub bullet: Duration,
    pub game_state: Duration,
}

impl Default for GossipWindows {
    fn default() -> Self {
        Self {
            player: Duration::from_secs(60),
            bullet: Duration::from_secs(10),
            game_state: Duration::from_secs(300),
        }
    }
}

impl GossipWindows {
    pub fn for_kind(&self, kind: GossipKind) -> Duration {
        match kind {
            GossipKind::PlayerState => self.player,
            GossipKind::Bullet => self.bullet,
            GossipKind::GameState => self.game_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_values() {
        for kind in GossipKind::ALL {
            assert_eq!(GossipKind::from_u16(kind.as_u16()), Some(kind));
        }
        assert_eq!(GossipKind::PlayerState.as_u16(), 1000);
        assert_eq!(GossipKind::from_u16(1), None);
    }

    #[test]
    fn test_windows() {
        let w = GossipWindows::default();
        assert_eq!(w.for_kind(GossipKind::PlayerState), Duration::from_secs(60));
        assert_eq!(w.for_kind(GossipKind::Bullet), Duration::from_secs(10));
        assert_eq!(w.for_kind(GossipKind::GameState), Duration::from_secs(300));
    }
}
