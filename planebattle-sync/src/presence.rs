//! Ephemeral presence records carrying the player roster.
//!
//! Each session owns one JSON record. Changes travel as deltas stamped with
//! the sender's session id and a per-session clock:
//!
//! ```text
//! publish_player(p)
//!       │  policy decides the delta shape
//!       ▼
//! PresenceUpdate { session, clock, Replace | SetField | Clear }
//!       │  (room server folds it into its record table)
//!       ▼
//! remote PresenceTable::apply_remote()  (stale clocks dropped)
//!       │
//!       ▼
//! players(now)  (read-side liveness filter)
//! ```
//!
//! Nothing ages out on its own. A session that vanishes without a
//! `PeerLeft` keeps its record until the reader's offline threshold hides it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use planebattle_core::{Player, PlayerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field holding the player object under the map-merge and field-patch
/// policies.
pub const PLAYER_FIELD: &str = "player";

/// How the local player is written into its presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresencePolicy {
    /// The record is a map; the player sits under [`PLAYER_FIELD`] and the
    /// whole merged map is republished.
    #[default]
    MapMerge,
    /// Only the [`PLAYER_FIELD`] of the record is set.
    FieldPatch,
    /// The record is the player object itself.
    WholeStateReplace,
}

impl PresencePolicy {
    /// Pull a player out of a record. `None` when the record does not
    /// carry a structurally valid player.
    pub fn extract(self, record: &Value) -> Option<Player> {
        let value = match self {
            PresencePolicy::MapMerge | PresencePolicy::FieldPatch => record.get(PLAYER_FIELD)?,
            PresencePolicy::WholeStateReplace => record,
        };
        serde_json::from_value::<Player>(value.clone())
            .ok()
            .filter(Player::is_valid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PresenceDelta {
    Replace { state: Value },
    SetField { field: String, value: Value },
    Clear,
}

impl PresenceDelta {
    pub fn apply(&self, record: &mut Option<Value>) {
        match self {
            PresenceDelta::Replace { state } => *record = Some(state.clone()),
            PresenceDelta::SetField { field, value } => {
                if !matches!(record, Some(Value::Object(_))) {
                    *record = Some(Value::Object(Map::new()));
                }
                if let Some(Value::Object(map)) = record {
                    map.insert(field.clone(), value.clone());
                }
            }
            PresenceDelta::Clear => *record = None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub session: Uuid,
    pub clock: u64,
    pub delta: PresenceDelta,
}

#[derive(Debug, Clone, PartialEq)]
struct Record {
    clock: u64,
    state: Option<Value>,
}

/// Session → record table with last-writer-by-clock folding. Used on both
/// sides of the wire.
#[derive(Debug, Clone, Default)]
pub struct PresenceRecords {
    records: HashMap<Uuid, Record>,
}

impl PresenceRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in. Returns `false` for stale or replayed clocks.
    pub fn apply(&mut self, update: &PresenceUpdate) -> bool {
        let record = self.records.entry(update.session).or_insert(Record {
            clock: 0,
            state: None,
        });
        if update.clock <= record.clock {
            return false;
        }
        record.clock = update.clock;
        update.delta.apply(&mut record.state);
        true
    }

    pub fn remove(&mut self, session: &Uuid) -> bool {
        self.records.remove(session).is_some()
    }

    pub fn get(&self, session: &Uuid) -> Option<&Value> {
        self.records.get(session).and_then(|r| r.state.as_ref())
    }

    /// Every live record as a `Replace`, so a late joiner can rebuild the
    /// table from scratch.
    pub fn full_state(&self) -> Vec<PresenceUpdate> {
        self.records
            .iter()
            .filter_map(|(session, record)| {
                record.state.as_ref().map(|state| PresenceUpdate {
                    session: *session,
                    clock: record.clock,
                    delta: PresenceDelta::Replace {
                        state: state.clone(),
                    },
                })
            })
            .collect()
    }

    pub fn states(&self) -> impl Iterator<Item = (&Uuid, &Value)> {
        self.records
            .iter()
            .filter_map(|(session, r)| r.state.as_ref().map(|s| (session, s)))
    }

    pub fn len(&self) -> usize {
        self.states().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-side view: the local record plus every remote one.
#[derive(Debug, Clone)]
pub struct PresenceTable {
    policy: PresencePolicy,
    session: Uuid,
    clock: u64,
    local: Option<Value>,
    remote: PresenceRecords,
}

impl PresenceTable {
    pub fn new(policy: PresencePolicy, session: Uuid) -> Self {
        Self {
            policy,
            session,
            clock: 0,
            local: None,
            remote: PresenceRecords::new(),
        }
    }

    pub fn policy(&self) -> PresencePolicy {
        self.policy
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    fn stamp(&mut self, delta: PresenceDelta) -> PresenceUpdate {
        self.clock += 1;
        delta.apply(&mut self.local);
        PresenceUpdate {
            session: self.session,
            clock: self.clock,
            delta,
        }
    }

    /// Write the local player into the local record and return the delta to
    /// send.
    pub fn publish_player(&mut self, player: &Player) -> PresenceUpdate {
        let value = serde_json::to_value(player).unwrap_or(Value::Null);
        let delta = match self.policy {
            PresencePolicy::MapMerge => {
                let mut merged = match &self.local {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                merged.insert(PLAYER_FIELD.to_string(), value);
                PresenceDelta::Replace {
                    state: Value::Object(merged),
                }
            }
            PresencePolicy::FieldPatch => PresenceDelta::SetField {
                field: PLAYER_FIELD.to_string(),
                value,
            },
            PresencePolicy::WholeStateReplace => PresenceDelta::Replace { state: value },
        };
        self.stamp(delta)
    }

    pub fn clear_local(&mut self) -> PresenceUpdate {
        self.stamp(PresenceDelta::Clear)
    }

    /// Returns whether the remote view changed. Our own session echoed back
    /// is ignored.
    pub fn apply_remote(&mut self, update: &PresenceUpdate) -> bool {
        if update.session == self.session {
            return false;
        }
        self.remote.apply(update)
    }

    pub fn remove_session(&mut self, session: &Uuid) -> bool {
        self.remote.remove(session)
    }

    /// Forget every remote record, e.g. before a fresh join.
    pub fn reset_remote(&mut self) {
        self.remote = PresenceRecords::new();
    }

    /// Players reconstructed from every record that passes the liveness
    /// filter. The local record wins over a remote one with the same id.
    pub fn players(&self, now: u64, offline_after: Duration) -> BTreeMap<PlayerId, Player> {
        let mut out = BTreeMap::new();
        let remote = self.remote.states().map(|(_, state)| state);
        for state in remote.chain(self.local.iter()) {
            if let Some(player) = self.policy.extract(state) {
                if player.is_online(now, offline_after) {
                    out.insert(player.id.clone(), player);
                }
            }
        }
        out
    }

    pub fn online_player_count(&self, now: u64, offline_after: Duration) -> usize {
        self.players(now, offline_after).len()
    }

    pub fn remote_len(&self) -> usize {
        self.remote.len()
    }
}
