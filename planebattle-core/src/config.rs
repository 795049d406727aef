//! World-level configuration shared by every backend.

use std::time::Duration;

use crate::model::{WorldBounds, MAX_HEALTH};

/// Rules of the world the local player lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// Playfield; player positions are clamped into it.
    pub bounds: WorldBounds,
    /// Distance from every edge kept free when (re)spawning.
    pub spawn_margin: f64,
    /// Health restored on respawn.
    pub max_health: u32,
    /// Delay between hitting zero health and respawning.
    pub respawn_delay: Duration,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            bounds: WorldBounds::default(),
            spawn_margin: 100.0,
            max_health: MAX_HEALTH,
            respawn_delay: Duration::from_millis(2000),
        }
    }
}

/// When the stale-entry sweep runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CleanupPolicy {
    /// Sweep on a fixed interval. The default.
    Interval(Duration),
    /// Sweep with the given chance on every `tick`, as the browser client
    /// did from inside its frame loop. Kept for compatibility only.
    Probabilistic { chance: f64 },
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy::Interval(Duration::from_secs(1))
    }
}

impl CleanupPolicy {
    /// A per-tick sweep chance, clamped into `[0, 1]`. NaN and infinities
    /// become 0.0.
    pub fn probabilistic(chance: f64) -> Self {
        CleanupPolicy::Probabilistic {
            chance: sanitize_chance(chance),
        }
    }

    /// The per-tick sweep chance, if any, always a valid probability.
    pub fn sweep_chance(&self) -> Option<f64> {
        match *self {
            CleanupPolicy::Interval(_) => None,
            CleanupPolicy::Probabilistic { chance } => Some(sanitize_chance(chance)),
        }
    }
}

fn sanitize_chance(chance: f64) -> f64 {
    if chance.is_finite() {
        chance.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Read-side liveness thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Bullets older than this are dropped from snapshots and sweeps.
    pub bullet_ttl: Duration,
    /// Players without an update for longer than this are offline.
    pub player_offline_after: Duration,
}

impl Liveness {
    pub fn new(bullet_ttl: Duration, player_offline_after: Duration) -> Self {
        Self {
            bullet_ttl,
            player_offline_after,
        }
    }
}
