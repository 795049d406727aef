//! Shared world model replicated by every backend.
//!
//! Field names on the wire follow the browser client (`lastUpdate`,
//! `isActive`, `playerId`, …) so that mixed fleets read each other's
//! records. Timestamps are milliseconds since the Unix epoch.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────────

/// Stable per-session player identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short id for a document/presence session: first 8 hex chars of the UUID.
    pub fn from_session(session: &Uuid) -> Self {
        let simple = session.simple().to_string();
        Self(simple[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Globally unique bullet identifier, minted by [`crate::IdGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulletId(String);

impl BulletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BulletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BulletId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ───────────────────────────────────────────────────────────────────
// Geometry
// ───────────────────────────────────────────────────────────────────

/// 2D vector in world coordinates (positions and velocities).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Rectangular world the players fly in, anchored at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub width: f64,
    pub height: f64,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 800.0,
        }
    }
}

impl WorldBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        (0.0..=self.width).contains(&point.x) && (0.0..=self.height).contains(&point.y)
    }

    pub fn clamp(&self, point: Vec2) -> Vec2 {
        Vec2 {
            x: point.x.clamp(0.0, self.width),
            y: point.y.clamp(0.0, self.height),
        }
    }

    /// Uniform random point at least `margin` away from every edge.
    ///
    /// Falls back to the centre when the margin leaves no room.
    pub fn random_point<R: Rng + ?Sized>(&self, margin: f64, rng: &mut R) -> Vec2 {
        let (x_lo, x_hi) = (margin, self.width - margin);
        let (y_lo, y_hi) = (margin, self.height - margin);
        if x_lo >= x_hi || y_lo >= y_hi {
            return Vec2::new(self.width / 2.0, self.height / 2.0);
        }
        Vec2::new(rng.random_range(x_lo..x_hi), rng.random_range(y_lo..y_hi))
    }
}

// ───────────────────────────────────────────────────────────────────
// Player
// ───────────────────────────────────────────────────────────────────

/// Steering direction. Serialized as the bare degree value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    Left,
    #[default]
    Up,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid rotation {0}, expected -90, 0 or 90")]
pub struct InvalidRotation(pub i32);

impl TryFrom<i32> for Rotation {
    type Error = InvalidRotation;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        match degrees {
            -90 => Ok(Rotation::Left),
            0 => Ok(Rotation::Up),
            90 => Ok(Rotation::Right),
            other => Err(InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for i32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Left => -90,
            Rotation::Up => 0,
            Rotation::Right => 90,
        }
    }
}

pub const MAX_HEALTH: u32 = 100;

fn default_health() -> u32 {
    MAX_HEALTH
}

fn default_active() -> bool {
    true
}

/// A plane. Only its originating client ever writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default = "default_health")]
    pub health: u32,
    #[serde(default)]
    pub score: u64,
    #[serde(default)]
    pub last_update: u64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Player {
    pub fn new(id: PlayerId, position: Vec2, now: u64) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
            rotation: Rotation::Up,
            health: MAX_HEALTH,
            score: 0,
            last_update: now,
            is_active: true,
        }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Health bound and finite coordinates. Remote records failing this are
    /// not players.
    pub fn is_valid(&self) -> bool {
        self.health <= MAX_HEALTH && self.x.is_finite() && self.y.is_finite()
    }

    /// Whether a reader at `now` should still consider this player online.
    pub fn is_online(&self, now: u64, offline_after: Duration) -> bool {
        self.is_active && now.saturating_sub(self.last_update) <= offline_after.as_millis() as u64
    }
}

/// Partial update of the local player's steering fields.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub rotation: Option<Rotation>,
}

impl PlayerPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.rotation.is_none()
    }
}

// ───────────────────────────────────────────────────────────────────
// Bullet
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bullet {
    pub id: BulletId,
    #[serde(rename = "playerId")]
    pub owner_id: PlayerId,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub created_at: u64,
}

impl Bullet {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }

    /// Strictly older than `ttl` at `now`.
    pub fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.created_at) > ttl.as_millis() as u64
    }
}

// ───────────────────────────────────────────────────────────────────
// Game state & connection status
// ───────────────────────────────────────────────────────────────────

/// Match metadata. `started` is a set-once latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl GameState {
    pub fn started_at(now: u64) -> Self {
        Self {
            started: true,
            start_time: Some(now),
        }
    }

    /// Order-independent merge: the latch ORs, the earliest start time wins.
    ///
    /// Returns `true` if `self` changed.
    pub fn merge(&mut self, other: &GameState) -> bool {
        let before = *self;
        self.started |= other.started;
        self.start_time = match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        *self != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Point-in-time view handed to the game loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub players: BTreeMap<PlayerId, Player>,
    pub bullets: Vec<Bullet>,
    pub game_state: GameState,
}

impl WorldSnapshot {
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn bullet(&self, id: &BulletId) -> Option<&Bullet> {
        self.bullets.iter().find(|b| &b.id == id)
    }
}
