//! Room-server backends.
//!
//! The document and presence backends share everything except where the
//! player roster lives. [`RoomBackend`] owns the shared document (bullets,
//! game state), the room provider, timers and the local player; a
//! [`Roster`] decides how the local player is published and how the roster
//! is read back.

use std::collections::BTreeMap;
use std::time::Duration;

use planebattle_core::{
    Bullet, BulletId, CleanupPolicy, ConnectionError, ConnectionStatus, DamageOutcome,
    IdGenerator, Liveness, LocalPlayer, Notifications, Player, PlayerId, PlayerPatch,
    Scheduler, SharedClock, SyncBackend, Timer, Vec2, WorldConfig, WorldSnapshot,
};
use rand::Rng;
use uuid::Uuid;

use crate::presence::PresenceUpdate;
use crate::provider::{ProviderEvent, RoomProvider};
use crate::replica::DocumentReplica;

/// Connection and timing settings for a room backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    /// Room server base URL; the room name is appended as the path.
    pub url: String,
    pub room: String,
    pub connect_timeout: Duration,
    pub liveness: Liveness,
    pub heartbeat_interval: Duration,
    pub cleanup: CleanupPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:1234".to_string(),
            room: "game-room".to_string(),
            connect_timeout: Duration::from_millis(5000),
            liveness: Liveness::new(Duration::from_secs(5), Duration::from_secs(10)),
            heartbeat_interval: Duration::from_secs(5),
            cleanup: CleanupPolicy::default(),
        }
    }
}

impl RoomConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// What a roster wants sent after a local write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Update(Vec<u8>),
    Presence(PresenceUpdate),
}

/// Where the player roster is replicated.
pub trait Roster {
    /// Forget all state and adopt a fresh session.
    fn reset(&mut self, session: Uuid);

    /// Write the local player and return what to send.
    fn publish(&mut self, replica: &DocumentReplica, player: &Player) -> Option<Outbound>;

    /// Returns whether the roster changed.
    fn on_presence(&mut self, update: &PresenceUpdate) -> bool;

    fn on_peer_left(&mut self, session: &Uuid) -> bool;

    /// Liveness-filtered roster.
    fn players(
        &self,
        replica: &DocumentReplica,
        now: u64,
        offline_after: Duration,
    ) -> BTreeMap<PlayerId, Player>;

    /// Evict stale players, never `keep`. Returns the document update, if any.
    fn sweep(
        &mut self,
        replica: &DocumentReplica,
        now: u64,
        offline_after: Duration,
        keep: Option<&PlayerId>,
    ) -> Option<Vec<u8>>;
}

pub struct RoomBackend<R: Roster> {
    config: RoomConfig,
    world: WorldConfig,
    clock: SharedClock,
    session: Option<Uuid>,
    replica: DocumentReplica,
    roster: R,
    provider: Option<RoomProvider>,
    scheduler: Scheduler<Timer>,
    notifications: Notifications,
    local: Option<LocalPlayer>,
    ids: Option<IdGenerator>,
}

impl<R: Roster> RoomBackend<R> {
    pub fn with_roster(config: RoomConfig, world: WorldConfig, clock: SharedClock, roster: R) -> Self {
        Self {
            config,
            world,
            clock,
            session: None,
            replica: DocumentReplica::new(),
            roster,
            provider: None,
            scheduler: Scheduler::new(),
            notifications: Notifications::new(),
            local: None,
            ids: None,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Session id assigned by the last successful `connect`.
    pub fn session(&self) -> Option<Uuid> {
        self.session
    }

    pub fn replica(&self) -> &DocumentReplica {
        &self.replica
    }

    pub fn roster(&self) -> &R {
        &self.roster
    }

    /// Number of armed timers.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    fn is_connected(&self, op: &str) -> bool {
        let status = self.notifications.status();
        if status == ConnectionStatus::Connected {
            return true;
        }
        log::debug!("Ignoring {op} while {status}");
        false
    }

    fn send_update(&mut self, update: Vec<u8>) {
        if let Some(provider) = self.provider.as_mut() {
            provider.send_update(update);
        }
    }

    fn publish_local(&mut self) {
        let Some(local) = self.local.as_ref() else {
            return;
        };
        let outbound = self.roster.publish(&self.replica, local.player());
        match outbound {
            Some(Outbound::Update(update)) => self.send_update(update),
            Some(Outbound::Presence(update)) => {
                if let Some(provider) = self.provider.as_mut() {
                    provider.send_presence(&update);
                }
            }
            None => {}
        }
    }

    fn deliver(&mut self) {
        let snapshot = self.snapshot();
        self.notifications.deliver(&snapshot);
    }

    fn cleanup(&mut self, now: u64) {
        let ttl = self.config.liveness.bullet_ttl;
        if let Some(update) = self.replica.remove_bullets_where(|b| b.is_expired(now, ttl)) {
            self.send_update(update);
        }
        let keep = self.local.as_ref().map(|l| l.id().clone());
        let offline = self.config.liveness.player_offline_after;
        if let Some(update) = self.roster.sweep(&self.replica, now, offline, keep.as_ref()) {
            self.send_update(update);
        }
    }

    fn fire(&mut self, timer: Timer, now: u64) {
        match timer {
            Timer::Heartbeat => {
                if let Some(local) = self.local.as_mut() {
                    local.heartbeat(now);
                }
                self.publish_local();
            }
            Timer::Cleanup => self.cleanup(now),
            Timer::Respawn => {
                if let Some(local) = self.local.as_mut() {
                    local.respawn(&self.world, now, &mut rand::rng());
                    log::info!("Player {} respawned", local.id());
                }
                self.publish_local();
            }
        }
    }

    /// Drop the connection and every piece of session state.
    fn teardown(&mut self) {
        self.scheduler.cancel_all();
        if let Some(mut provider) = self.provider.take() {
            provider.close();
        }
        self.local = None;
        self.ids = None;
        self.session = None;
        self.replica = DocumentReplica::new();
        self.roster.reset(Uuid::nil());
        self.notifications.set_status(ConnectionStatus::Disconnected);
        self.deliver();
    }
}

impl<R: Roster> SyncBackend for RoomBackend<R> {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.notifications.status() == ConnectionStatus::Connected {
            return Ok(());
        }
        self.notifications.set_status(ConnectionStatus::Connecting);

        let session = Uuid::new_v4();
        self.replica = DocumentReplica::new();
        self.roster.reset(session);
        let mut provider = RoomProvider::new(&self.config.url, self.config.room.clone(), session);
        let diff = match provider
            .connect(self.replica.state_vector(), self.config.connect_timeout)
            .await
        {
            Ok(diff) => diff,
            Err(e) => {
                log::warn!("Failed to join room {}: {e}", self.config.room);
                provider.close();
                self.notifications.set_status(ConnectionStatus::Disconnected);
                return Err(e);
            }
        };
        if let Err(e) = self.replica.apply_update(&diff) {
            log::debug!("Ignoring malformed initial state: {e}");
        }

        let now = self.clock.now_ms();
        let id = PlayerId::from_session(&session);
        self.local = Some(LocalPlayer::spawn(id.clone(), &self.world, now, &mut rand::rng()));
        self.ids = Some(IdGenerator::new(id.clone()));
        self.session = Some(session);
        self.provider = Some(provider);

        self.publish_local();
        if let Some(update) = self.replica.init_game_state(now) {
            self.send_update(update);
        }

        self.scheduler
            .schedule_every(now, self.config.heartbeat_interval, Timer::Heartbeat);
        if let CleanupPolicy::Interval(every) = self.config.cleanup {
            self.scheduler.schedule_every(now, every, Timer::Cleanup);
        }

        self.notifications.set_status(ConnectionStatus::Connected);
        log::info!("Player {id} connected to room {}", self.config.room);
        self.deliver();
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.provider.is_none() && self.notifications.status() == ConnectionStatus::Disconnected {
            return;
        }
        let now = self.clock.now_ms();
        if let Some(local) = self.local.as_mut() {
            local.deactivate(now);
        }
        self.publish_local();
        self.teardown();
        log::info!("Left room {}", self.config.room);
    }

    fn update_local_player(&mut self, patch: PlayerPatch) {
        if !self.is_connected("player update") {
            return;
        }
        let now = self.clock.now_ms();
        if let Some(local) = self.local.as_mut() {
            local.apply_patch(&patch, &self.world, now);
        }
        self.publish_local();
        self.deliver();
    }

    fn fire_bullet(&mut self, origin: Vec2, velocity: Vec2) {
        if !self.is_connected("fire") {
            return;
        }
        let Some(ids) = self.ids.as_mut() else {
            return;
        };
        let bullet = Bullet {
            id: ids.next_bullet_id(),
            owner_id: ids.owner().clone(),
            x: origin.x,
            y: origin.y,
            vx: velocity.x,
            vy: velocity.y,
            created_at: self.clock.now_ms(),
        };
        match self.replica.push_bullet(&bullet) {
            Ok(update) => self.send_update(update),
            Err(e) => log::warn!("Failed to store bullet {}: {e}", bullet.id),
        }
        self.deliver();
    }

    fn delete_bullet(&mut self, id: &BulletId) {
        if !self.is_connected("bullet delete") {
            return;
        }
        if let Some(update) = self.replica.remove_bullet(id) {
            self.send_update(update);
            self.deliver();
        }
    }

    fn apply_damage_to_local_player(&mut self, amount: u32) {
        if !self.is_connected("damage") {
            return;
        }
        let now = self.clock.now_ms();
        let Some(local) = self.local.as_mut() else {
            return;
        };
        match local.apply_damage(amount, now) {
            DamageOutcome::AlreadyDown => return,
            DamageOutcome::ShotDown => {
                log::info!("Player {} shot down", local.id());
                self.scheduler
                    .schedule_once(now, self.world.respawn_delay, Timer::Respawn);
            }
            DamageOutcome::Survived => {}
        }
        self.publish_local();
        self.deliver();
    }

    fn add_score_to_local_player(&mut self, amount: u64) {
        if !self.is_connected("score") {
            return;
        }
        let now = self.clock.now_ms();
        if let Some(local) = self.local.as_mut() {
            local.add_score(amount, now);
        }
        self.publish_local();
        self.deliver();
    }

    fn snapshot(&self) -> WorldSnapshot {
        let now = self.clock.now_ms();
        let Liveness {
            bullet_ttl,
            player_offline_after,
        } = self.config.liveness;
        let mut players = self.roster.players(&self.replica, now, player_offline_after);
        if let Some(local) = self.local.as_ref().filter(|l| l.player().is_active) {
            players.insert(local.id().clone(), local.player().clone());
        }
        WorldSnapshot {
            players,
            bullets: self
                .replica
                .bullets()
                .into_iter()
                .filter(|b| !b.is_expired(now, bullet_ttl))
                .collect(),
            game_state: self.replica.game_state(),
        }
    }

    fn tick(&mut self) {
        if self.notifications.status() != ConnectionStatus::Connected {
            return;
        }
        let events = self.provider.as_mut().map(RoomProvider::poll).unwrap_or_default();
        for event in events {
            match event {
                ProviderEvent::Update(update) => {
                    if let Err(e) = self.replica.apply_update(&update) {
                        log::debug!("Dropping remote update: {e}");
                    }
                }
                ProviderEvent::Presence(update) => {
                    self.roster.on_presence(&update);
                }
                ProviderEvent::PeerLeft(session) => {
                    log::debug!("Session {session} left room {}", self.config.room);
                    self.roster.on_peer_left(&session);
                }
                ProviderEvent::TransportError(e) => {
                    log::warn!("Transport error in room {}: {e}", self.config.room);
                }
                ProviderEvent::Closed => {
                    log::warn!("Room {} closed by the server", self.config.room);
                    self.teardown();
                    return;
                }
            }
        }

        let now = self.clock.now_ms();
        for timer in self.scheduler.due(now) {
            self.fire(timer, now);
        }
        if let Some(chance) = self.config.cleanup.sweep_chance() {
            if rand::rng().random_bool(chance) {
                self.cleanup(now);
            }
        }
        self.deliver();
    }

    fn status(&self) -> ConnectionStatus {
        self.notifications.status()
    }

    fn local_player_id(&self) -> Option<PlayerId> {
        self.local.as_ref().map(|l| l.id().clone())
    }

    fn notifications(&mut self) -> &mut Notifications {
        &mut self.notifications
    }
}
