//! Merged world view built from accepted gossip events.
//!
//! Every merge is idempotent and order-independent, so the same event
//! arriving from several relays, or replayed on resubscribe, is harmless.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use planebattle_core::{Bullet, BulletId, GameState, Player, PlayerId};
use serde_json::Value;

use super::relay::AcceptedEvent;
use super::GossipKind;

/// Ordering key for one author's player states: event time (seconds on the
/// wire), then the writer's own millisecond stamp, then the event id. A
/// redelivered event compares equal to itself and is dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PlayerVersion {
    created_at: u64,
    stamp: u64,
    event_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct GossipState {
    players: BTreeMap<PlayerId, Player>,
    versions: HashMap<PlayerId, PlayerVersion>,
    bullets: Vec<Bullet>,
    /// Deleted bullet id → deletion time
    tombstones: HashMap<BulletId, u64>,
    game_state: GameState,
}

impl GossipState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns whether the view changed.
    pub fn ingest(&mut self, event: AcceptedEvent) -> bool {
        match event.kind {
            GossipKind::PlayerState => {
                self.ingest_player(event.id, event.author, event.created_at, event.content)
            }
            GossipKind::Bullet => self.ingest_bullet(event.created_at, event.content),
            GossipKind::GameState => self.ingest_game_state(event.content),
        }
    }

    /// The author's short id and the event time override whatever the
    /// payload claims. Only a state with a greater `PlayerVersion` replaces
    /// the stored one.
    fn ingest_player(
        &mut self,
        event_id: String,
        author: PlayerId,
        created_at: u64,
        mut content: Value,
    ) -> bool {
        let Some(fields) = content.as_object_mut() else {
            return false;
        };
        let version = PlayerVersion {
            created_at,
            stamp: fields.get("lastUpdate").and_then(Value::as_u64).unwrap_or(0),
            event_id,
        };
        fields.insert("id".into(), Value::String(author.as_str().to_string()));
        fields.insert("lastUpdate".into(), Value::from(created_at));
        let player: Player = match serde_json::from_value(content) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("Dropping malformed player state from {author}: {e}");
                return false;
            }
        };
        if !player.is_valid() {
            return false;
        }
        if self.versions.get(&author).is_some_and(|stored| *stored >= version) {
            return false;
        }
        self.versions.insert(author.clone(), version);
        self.players.insert(author, player.clone()) != Some(player)
    }

    /// A payload without `createdAt` takes the event time.
    fn ingest_bullet(&mut self, created_at: u64, mut content: Value) -> bool {
        if let Some(fields) = content.as_object_mut() {
            fields
                .entry("createdAt")
                .or_insert_with(|| Value::from(created_at));
        }
        let bullet: Bullet = match serde_json::from_value(content) {
            Ok(b) => b,
            Err(e) => {
                log::debug!("Dropping malformed bullet: {e}");
                return false;
            }
        };
        if self.tombstones.contains_key(&bullet.id) || self.bullets.iter().any(|b| b.id == bullet.id) {
            return false;
        }
        self.bullets.push(bullet);
        true
    }

    fn ingest_game_state(&mut self, content: Value) -> bool {
        match serde_json::from_value::<GameState>(content) {
            Ok(remote) => self.game_state.merge(&remote),
            Err(e) => {
                log::debug!("Dropping malformed game state: {e}");
                false
            }
        }
    }

    /// Drop a bullet and remember the id so a late duplicate stays dead.
    pub fn remove_bullet(&mut self, id: &BulletId, now: u64) -> bool {
        self.tombstones.insert(id.clone(), now);
        let before = self.bullets.len();
        self.bullets.retain(|b| &b.id != id);
        self.bullets.len() != before
    }

    pub fn merge_game_state(&mut self, state: &GameState) -> bool {
        self.game_state.merge(state)
    }

    /// Drop expired bullets, players unseen for `player_offline`, and
    /// tombstones older than `bullet_window`.
    pub fn sweep(
        &mut self,
        now: u64,
        bullet_ttl: Duration,
        player_offline: Duration,
        bullet_window: Duration,
    ) -> bool {
        let (bullets, players) = (self.bullets.len(), self.players.len());
        self.bullets.retain(|b| !b.is_expired(now, bullet_ttl));
        let offline_ms = player_offline.as_millis() as u64;
        self.players
            .retain(|_, p| now.saturating_sub(p.last_update) <= offline_ms);
        let players_left = &self.players;
        self.versions.retain(|id, _| players_left.contains_key(id));
        let window_ms = bullet_window.as_millis() as u64;
        self.tombstones
            .retain(|_, deleted_at| now.saturating_sub(*deleted_at) <= window_ms);
        bullets != self.bullets.len() || players != self.players.len()
    }

    /// Players seen within `offline_after` and still flagged active.
    pub fn players(&self, now: u64, offline_after: Duration) -> BTreeMap<PlayerId, Player> {
        self.players
            .iter()
            .filter(|(_, p)| p.is_online(now, offline_after))
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect()
    }

    pub fn bullets(&self, now: u64, ttl: Duration) -> Vec<Bullet> {
        self.bullets
            .iter()
            .filter(|b| !b.is_expired(now, ttl))
            .cloned()
            .collect()
    }

    pub fn game_state(&self) -> GameState {
        self.game_state
    }

    pub fn stored_players(&self) -> usize {
        self.players.len()
    }

    pub fn stored_bullets(&self) -> usize {
        self.bullets.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
