//! The writer-owned local player record.
//!
//! All three backends mutate the local player through this type, so the
//! damage/score/respawn rules are identical regardless of how the record is
//! replicated afterwards.

use rand::Rng;

use crate::config::WorldConfig;
use crate::model::{Player, PlayerId, PlayerPatch};

/// What a damage call did to the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Still flying.
    Survived,
    /// This hit brought health to zero; a respawn is due.
    ShotDown,
    /// Health was already zero.
    AlreadyDown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    player: Player,
}

impl LocalPlayer {
    /// Spawn at a random in-bounds position with full health.
    pub fn spawn<R: Rng + ?Sized>(id: PlayerId, world: &WorldConfig, now: u64, rng: &mut R) -> Self {
        let position = world.bounds.random_point(world.spawn_margin, rng);
        let mut player = Player::new(id, position, now);
        player.health = world.max_health;
        Self { player }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn id(&self) -> &PlayerId {
        &self.player.id
    }

    /// `lastUpdate` never goes backwards, even if the wall clock does.
    fn stamp(&mut self, now: u64) {
        self.player.last_update = now.max(self.player.last_update + 1);
    }

    pub fn apply_patch(&mut self, patch: &PlayerPatch, world: &WorldConfig, now: u64) {
        let mut position = self.player.position();
        if let Some(x) = patch.x {
            position.x = x;
        }
        if let Some(y) = patch.y {
            position.y = y;
        }
        let position = world.bounds.clamp(position);
        self.player.x = position.x;
        self.player.y = position.y;
        if let Some(rotation) = patch.rotation {
            self.player.rotation = rotation;
        }
        self.stamp(now);
    }

    /// `health = max(0, health - amount)`.
    pub fn apply_damage(&mut self, amount: u32, now: u64) -> DamageOutcome {
        if self.player.health == 0 {
            return DamageOutcome::AlreadyDown;
        }
        self.player.health = self.player.health.saturating_sub(amount);
        self.stamp(now);
        if self.player.health == 0 {
            DamageOutcome::ShotDown
        } else {
            DamageOutcome::Survived
        }
    }

    pub fn add_score(&mut self, amount: u64, now: u64) {
        self.player.score = self.player.score.saturating_add(amount);
        self.stamp(now);
    }

    pub fn respawn<R: Rng + ?Sized>(&mut self, world: &WorldConfig, now: u64, rng: &mut R) {
        let position = world.bounds.random_point(world.spawn_margin, rng);
        self.player.x = position.x;
        self.player.y = position.y;
        self.player.health = world.max_health;
        self.stamp(now);
    }

    pub fn heartbeat(&mut self, now: u64) {
        self.stamp(now);
    }

    pub fn deactivate(&mut self, now: u64) {
        self.player.is_active = false;
        self.stamp(now);
    }
}
