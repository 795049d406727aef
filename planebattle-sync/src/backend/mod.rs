//! The three [`SyncBackend`] implementations and a selector over them.
//!
//! | backend    | players            | bullets / game state | transport        |
//! |------------|--------------------|----------------------|------------------|
//! | `Document` | document map       | document             | room server      |
//! | `Presence` | presence records   | document             | room server      |
//! | `Gossip`   | signed events      | signed events        | public relays    |

pub mod document;
pub mod gossip;
pub mod presence;
pub mod room;

use planebattle_core::{
    BulletId, ConnectionError, ConnectionStatus, Notifications, PlayerId, PlayerPatch,
    SyncBackend, Vec2, WorldConfig, WorldSnapshot,
};

pub use document::{DocumentBackend, DocumentConfig, DocumentRoster};
pub use gossip::{GossipBackend, GossipConfig};
pub use presence::{PresenceBackend, PresenceConfig, PresenceRoster};
pub use room::{Outbound, RoomBackend, RoomConfig, Roster};

use crate::gossip::{KeyStore, KeyStoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Document(DocumentConfig),
    Presence(PresenceConfig),
    Gossip(GossipConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Document(DocumentConfig::default())
    }
}

pub enum Backend {
    Document(DocumentBackend),
    Presence(PresenceBackend),
    Gossip(GossipBackend),
}

impl Backend {
    /// Build the selected backend. `keys` is only consulted for gossip.
    pub fn from_config(
        config: BackendConfig,
        world: WorldConfig,
        keys: &dyn KeyStore,
    ) -> Result<Self, KeyStoreError> {
        Ok(match config {
            BackendConfig::Document(config) => Backend::Document(DocumentBackend::new(config, world)),
            BackendConfig::Presence(config) => Backend::Presence(PresenceBackend::new(config, world)),
            BackendConfig::Gossip(config) => Backend::Gossip(GossipBackend::new(config, world, keys)?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Document(_) => "document",
            Backend::Presence(_) => "presence",
            Backend::Gossip(_) => "gossip",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $b:ident => $call:expr) => {
        match $self {
            Backend::Document($b) => $call,
            Backend::Presence($b) => $call,
            Backend::Gossip($b) => $call,
        }
    };
}

impl SyncBackend for Backend {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        delegate!(self, b => b.connect().await)
    }

    fn disconnect(&mut self) {
        delegate!(self, b => b.disconnect())
    }

    fn update_local_player(&mut self, patch: PlayerPatch) {
        delegate!(self, b => b.update_local_player(patch))
    }

    fn fire_bullet(&mut self, origin: Vec2, velocity: Vec2) {
        delegate!(self, b => b.fire_bullet(origin, velocity))
    }

    fn delete_bullet(&mut self, id: &BulletId) {
        delegate!(self, b => b.delete_bullet(id))
    }

    fn apply_damage_to_local_player(&mut self, amount: u32) {
        delegate!(self, b => b.apply_damage_to_local_player(amount))
    }

    fn add_score_to_local_player(&mut self, amount: u64) {
        delegate!(self, b => b.add_score_to_local_player(amount))
    }

    fn snapshot(&self) -> WorldSnapshot {
        delegate!(self, b => b.snapshot())
    }

    fn tick(&mut self) {
        delegate!(self, b => b.tick())
    }

    fn status(&self) -> ConnectionStatus {
        delegate!(self, b => b.status())
    }

    fn local_player_id(&self) -> Option<PlayerId> {
        delegate!(self, b => b.local_player_id())
    }

    fn notifications(&mut self) -> &mut Notifications {
        delegate!(self, b => b.notifications())
    }
}
