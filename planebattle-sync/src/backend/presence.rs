//! Players ride the ephemeral presence channel; bullets and game state stay
//! in the document. Liveness is purely a read-side filter here, there is
//! no eviction sweep for presence records.

use std::collections::BTreeMap;
use std::time::Duration;

use planebattle_core::{system_clock, Player, PlayerId, SharedClock, WorldConfig};
use uuid::Uuid;

use super::room::{Outbound, RoomBackend, RoomConfig, Roster};
use crate::presence::{PresencePolicy, PresenceTable, PresenceUpdate};
use crate::replica::DocumentReplica;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresenceConfig {
    pub room: RoomConfig,
    pub policy: PresencePolicy,
}

impl PresenceConfig {
    pub fn new(room: RoomConfig, policy: PresencePolicy) -> Self {
        Self { room, policy }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceRoster {
    table: PresenceTable,
}

impl PresenceRoster {
    pub fn new(policy: PresencePolicy) -> Self {
        Self {
            table: PresenceTable::new(policy, Uuid::nil()),
        }
    }

    pub fn table(&self) -> &PresenceTable {
        &self.table
    }
}

impl Roster for PresenceRoster {
    fn reset(&mut self, session: Uuid) {
        self.table = PresenceTable::new(self.table.policy(), session);
    }

    fn publish(&mut self, _replica: &DocumentReplica, player: &Player) -> Option<Outbound> {
        Some(Outbound::Presence(self.table.publish_player(player)))
    }

    fn on_presence(&mut self, update: &PresenceUpdate) -> bool {
        self.table.apply_remote(update)
    }

    fn on_peer_left(&mut self, session: &Uuid) -> bool {
        self.table.remove_session(session)
    }

    fn players(
        &self,
        _replica: &DocumentReplica,
        now: u64,
        offline_after: Duration,
    ) -> BTreeMap<PlayerId, Player> {
        self.table.players(now, offline_after)
    }

    fn sweep(
        &mut self,
        _replica: &DocumentReplica,
        _now: u64,
        _offline_after: Duration,
        _keep: Option<&PlayerId>,
    ) -> Option<Vec<u8>> {
        None
    }
}

pub type PresenceBackend = RoomBackend<PresenceRoster>;

impl RoomBackend<PresenceRoster> {
    pub fn new(config: PresenceConfig, world: WorldConfig) -> Self {
        Self::with_clock(config, world, system_clock())
    }

    pub fn with_clock(config: PresenceConfig, world: WorldConfig, clock: SharedClock) -> Self {
        Self::with_roster(config.room, world, clock, PresenceRoster::new(config.policy))
    }

    pub fn policy(&self) -> PresencePolicy {
        self.roster().table().policy()
    }
}
