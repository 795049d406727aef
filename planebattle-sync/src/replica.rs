//! The shared game document.
//!
//! One `yrs::Doc` per room holding three root types:
//!
//! | root        | type  | content                                    |
//! |-------------|-------|--------------------------------------------|
//! | `players`   | map   | player id → player JSON string             |
//! | `bullets`   | array | bullet JSON strings, append order          |
//! | `gameState` | map   | `started` (bool), `startTime` (number)     |
//!
//! Every mutating call runs in its own transaction and returns the v1
//! update to broadcast, or `None` when the transaction changed nothing.

use std::collections::{BTreeMap, HashSet};

use planebattle_core::{Bullet, BulletId, GameState, Player, PlayerId};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Array, ArrayRef, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, Update};

const PLAYERS: &str = "players";
const BULLETS: &str = "bullets";
const GAME_STATE: &str = "gameState";
const STARTED: &str = "started";
const START_TIME: &str = "startTime";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    #[error("malformed update: {0}")]
    Decode(String),
    #[error("failed to apply update: {0}")]
    Apply(String),
    #[error("failed to serialize record: {0}")]
    Serialize(String),
}

pub struct DocumentReplica {
    doc: Doc,
    players: MapRef,
    bullets: ArrayRef,
    game_state: MapRef,
}

impl Default for DocumentReplica {
    fn default() -> Self {
        Self::new()
    }
}

fn out_str(value: &Out) -> Option<&str> {
    match value {
        Out::Any(Any::String(s)) => Some(s.as_ref()),
        _ => None,
    }
}

fn out_u64(value: &Out) -> Option<u64> {
    match value {
        Out::Any(Any::Number(n)) if *n >= 0.0 => Some(*n as u64),
        Out::Any(Any::BigInt(n)) if *n >= 0 => Some(*n as u64),
        _ => None,
    }
}

impl DocumentReplica {
    pub fn new() -> Self {
        let doc = Doc::new();
        let players = doc.get_or_insert_map(PLAYERS);
        let bullets = doc.get_or_insert_array(BULLETS);
        let game_state = doc.get_or_insert_map(GAME_STATE);
        Self {
            doc,
            players,
            bullets,
            game_state,
        }
    }

    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    pub fn apply_update(&self, update: &[u8]) -> Result<(), ReplicaError> {
        let update = Update::decode_v1(update).map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| ReplicaError::Apply(e.to_string()))
    }

    /// Everything the holder of `remote_state_vector` is missing.
    pub fn diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, ReplicaError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| ReplicaError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    // ── players ────────────────────────────────────────────────────

    pub fn put_player(&self, player: &Player) -> Result<Vec<u8>, ReplicaError> {
        let json =
            serde_json::to_string(player).map_err(|e| ReplicaError::Serialize(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        self.players.insert(&mut txn, player.id.as_str(), json);
        Ok(txn.encode_update_v1())
    }

    pub fn remove_players(&self, ids: &[PlayerId]) -> Option<Vec<u8>> {
        let mut txn = self.doc.transact_mut();
        let mut removed = false;
        for id in ids {
            removed |= self.players.remove(&mut txn, id.as_str()).is_some();
        }
        removed.then(|| txn.encode_update_v1())
    }

    /// Every stored player that parses and passes the validity check.
    /// Liveness filtering is the caller's concern.
    pub fn players(&self) -> BTreeMap<PlayerId, Player> {
        let txn = self.doc.transact();
        self.players
            .iter(&txn)
            .filter_map(|(key, value)| {
                let player: Player = serde_json::from_str(out_str(&value)?).ok()?;
                if player.id.as_str() != key || !player.is_valid() {
                    log::debug!("Dropping malformed player record {key}");
                    return None;
                }
                Some((player.id.clone(), player))
            })
            .collect()
    }

    // ── bullets ────────────────────────────────────────────────────

    pub fn push_bullet(&self, bullet: &Bullet) -> Result<Vec<u8>, ReplicaError> {
        let json =
            serde_json::to_string(bullet).map_err(|e| ReplicaError::Serialize(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        self.bullets.push_back(&mut txn, json);
        Ok(txn.encode_update_v1())
    }

    pub fn remove_bullet(&self, id: &BulletId) -> Option<Vec<u8>> {
        self.remove_bullets_where(|bullet| &bullet.id == id)
    }

    /// Remove every entry matching `pred`, duplicates included. Entries that
    /// do not parse are left alone.
    pub fn remove_bullets_where(&self, mut pred: impl FnMut(&Bullet) -> bool) -> Option<Vec<u8>> {
        let mut txn = self.doc.transact_mut();
        let doomed: Vec<u32> = self
            .bullets
            .iter(&txn)
            .enumerate()
            .filter_map(|(index, value)| {
                let bullet: Bullet = serde_json::from_str(out_str(&value)?).ok()?;
                pred(&bullet).then_some(index as u32)
            })
            .collect();
        if doomed.is_empty() {
            return None;
        }
        for index in doomed.into_iter().rev() {
            self.bullets.remove_range(&mut txn, index, 1);
        }
        Some(txn.encode_update_v1())
    }

    /// Stored bullets in list order, first occurrence of each id only.
    pub fn bullets(&self) -> Vec<Bullet> {
        let txn = self.doc.transact();
        let mut seen = HashSet::new();
        self.bullets
            .iter(&txn)
            .filter_map(|value| serde_json::from_str::<Bullet>(out_str(&value)?).ok())
            .filter(|bullet| seen.insert(bullet.id.clone()))
            .collect()
    }

    pub fn bullet_entries(&self) -> u32 {
        let txn = self.doc.transact();
        self.bullets.len(&txn)
    }

    // ── game state ─────────────────────────────────────────────────

    pub fn game_state(&self) -> GameState {
        let txn = self.doc.transact();
        let started = matches!(
            self.game_state.get(&txn, STARTED),
            Some(Out::Any(Any::Bool(true)))
        );
        let start_time = self
            .game_state
            .get(&txn, START_TIME)
            .as_ref()
            .and_then(out_u64);
        GameState {
            started,
            start_time,
        }
    }

    /// Start the match unless some peer already wrote `started`.
    pub fn init_game_state(&self, now: u64) -> Option<Vec<u8>> {
        let mut txn = self.doc.transact_mut();
        if self.game_state.contains_key(&txn, STARTED) {
            return None;
        }
        self.game_state.insert(&mut txn, STARTED, true);
        self.game_state.insert(&mut txn, START_TIME, now as f64);
        Some(txn.encode_update_v1())
    }
}
