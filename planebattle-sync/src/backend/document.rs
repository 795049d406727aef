//! Players live in the shared document next to bullets and game state.

use std::collections::BTreeMap;
use std::time::Duration;

use planebattle_core::{system_clock, Player, PlayerId, SharedClock, WorldConfig};
use uuid::Uuid;

use super::room::{Outbound, RoomBackend, RoomConfig, Roster};
use crate::presence::PresenceUpdate;
use crate::replica::DocumentReplica;

pub type DocumentConfig = RoomConfig;

/// Roster kept in the document's `players` map. Stale and inactive entries
/// are removed outright by the sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentRoster;

impl Roster for DocumentRoster {
    fn reset(&mut self, _session: Uuid) {}

    fn publish(&mut self, replica: &DocumentReplica, player: &Player) -> Option<Outbound> {
        match replica.put_player(player) {
            Ok(update) => Some(Outbound::Update(update)),
            Err(e) => {
                log::warn!("Failed to store player {}: {e}", player.id);
                None
            }
        }
    }

    fn on_presence(&mut self, _update: &PresenceUpdate) -> bool {
        false
    }

    fn on_peer_left(&mut self, _session: &Uuid) -> bool {
        false
    }

    fn players(
        &self,
        replica: &DocumentReplica,
        now: u64,
        offline_after: Duration,
    ) -> BTreeMap<PlayerId, Player> {
        replica
            .players()
            .into_iter()
            .filter(|(_, p)| p.is_online(now, offline_after))
            .collect()
    }

    fn sweep(
        &mut self,
        replica: &DocumentReplica,
        now: u64,
        offline_after: Duration,
        keep: Option<&PlayerId>,
    ) -> Option<Vec<u8>> {
        let stale: Vec<PlayerId> = replica
            .players()
            .into_values()
            .filter(|p| Some(&p.id) != keep && !p.is_online(now, offline_after))
            .map(|p| p.id)
            .collect();
        if stale.is_empty() {
            return None;
        }
        log::debug!("Sweeping {} stale players", stale.len());
        replica.remove_players(&stale)
    }
}

pub type DocumentBackend = RoomBackend<DocumentRoster>;

impl RoomBackend<DocumentRoster> {
    pub fn new(config: DocumentConfig, world: WorldConfig) -> Self {
        Self::with_clock(config, world, system_clock())
    }

    pub fn with_clock(config: DocumentConfig, world: WorldConfig, clock: SharedClock) -> Self {
        Self::with_roster(config, world, clock, DocumentRoster)
    }
}
