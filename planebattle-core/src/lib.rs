//! # planebattle-core: Shared world model and backend contract
//!
//! Everything the game loop and the replication backends agree on, with no
//! networking:
//!
//! - [`model`]: Player, Bullet, GameState, ConnectionStatus, snapshots
//! - [`backend`]: the [`SyncBackend`] contract
//! - [`notify`]: ordered multi-subscriber change channels
//! - [`schedule`]: cooperative, cancelable timers
//! - [`local`]: damage/score/respawn rules for the local player
//! - [`ids`]: bullet id generation
//! - [`clock`]: wall clock and a manual clock for tests

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod local;
pub mod model;
pub mod notify;
pub mod schedule;

pub use backend::SyncBackend;
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CleanupPolicy, Liveness, WorldConfig};
pub use error::ConnectionError;
pub use ids::IdGenerator;
pub use local::{DamageOutcome, LocalPlayer};
pub use model::{
    Bullet, BulletId, ConnectionStatus, GameState, Player, PlayerId, PlayerPatch, Rotation,
    Vec2, WorldBounds, WorldSnapshot, MAX_HEALTH,
};
pub use notify::{Channel, Notifications, Subscription};
pub use schedule::{Scheduler, TaskId, Timer};
