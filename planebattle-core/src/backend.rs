//! The contract the game loop programs against.

use std::collections::BTreeMap;

use crate::error::ConnectionError;
use crate::model::{BulletId, ConnectionStatus, Player, PlayerId, PlayerPatch, Vec2, WorldSnapshot};
use crate::notify::Notifications;

/// Uniform replication contract.
///
/// Everything except [`connect`](SyncBackend::connect) completes
/// synchronously against local state. Remote deliveries and timers are
/// processed only inside [`tick`](SyncBackend::tick), on the caller's
/// thread, so notifications never run concurrently with the caller.
///
/// Intent operations on a backend that is not connected are ignored.
#[allow(async_fn_in_trait)]
pub trait SyncBackend {
    /// Connect and wait for initial synchronization, bounded by the backend's
    /// connect timeout.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Mark the local player inactive, cancel every timer, drop every
    /// transport observer. Idempotent.
    fn disconnect(&mut self);

    fn update_local_player(&mut self, patch: PlayerPatch);

    /// Mint and propagate a bullet. It shows up in the snapshot only once the
    /// backend's own merge path delivers it.
    fn fire_bullet(&mut self, origin: Vec2, velocity: Vec2);

    /// Unilateral, idempotent removal.
    fn delete_bullet(&mut self, id: &BulletId);

    /// `health = max(0, health - amount)`; reaching zero schedules a respawn.
    fn apply_damage_to_local_player(&mut self, amount: u32);

    fn add_score_to_local_player(&mut self, amount: u64);

    fn snapshot(&self) -> WorldSnapshot;

    /// Drain transport deliveries, fire due timers, publish changes.
    fn tick(&mut self);

    fn status(&self) -> ConnectionStatus;

    fn local_player_id(&self) -> Option<PlayerId>;

    fn notifications(&mut self) -> &mut Notifications;

    /// Liveness-filtered roster.
    fn all_players(&self) -> BTreeMap<PlayerId, Player> {
        self.snapshot().players
    }

    fn online_player_count(&self) -> usize {
        self.all_players().len()
    }
}
