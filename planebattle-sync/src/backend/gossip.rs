//! Signed-event gossip backend.
//!
//! There is no shared document. Every client signs its player state,
//! bullets and game state as events tagged with the room and pushes them to
//! every connected relay; every client subscribes to the same three kinds
//! and folds whatever arrives into a [`GossipState`]. A fired bullet shows
//! up only once a relay echoes it back.

use std::time::Duration;

use futures_util::future::join_all;
use nostr::{Keys, PublicKey};
use planebattle_core::{
    system_clock, Bullet, BulletId, CleanupPolicy, ConnectionError, ConnectionStatus,
    DamageOutcome, GameState, IdGenerator, Liveness, LocalPlayer, Notifications, PlayerId,
    PlayerPatch, Scheduler, SharedClock, SyncBackend, Timer, Vec2, WorldConfig, WorldSnapshot,
};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::gossip::relay::{close_frame, event_frame, req_frame, room_filter};
use crate::gossip::{
    build_event, load_or_create_keys, parse_relay_frame, short_id, validate_event, GossipKind,
    GossipState, GossipWindows, KeyStore, KeyStoreError, RelayMessage,
};
use crate::transport::{Frame, ObserverId, TransportAdapter, TransportEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct GossipConfig {
    pub relays: Vec<String>,
    /// Value of the `t` tag every event carries.
    pub room: String,
    pub windows: GossipWindows,
    /// Bound on opening the first relay.
    pub connect_timeout: Duration,
    pub liveness: Liveness,
    pub heartbeat_interval: Duration,
    pub cleanup: CleanupPolicy,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://relay.primal.net".to_string(),
                "wss://nos.lol".to_string(),
                "wss://relay.nostr.band".to_string(),
            ],
            room: "plane-battle-room-2025".to_string(),
            windows: GossipWindows::default(),
            connect_timeout: Duration::from_millis(5000),
            liveness: Liveness::new(Duration::from_secs(10), Duration::from_secs(30)),
            heartbeat_interval: Duration::from_secs(5),
            cleanup: CleanupPolicy::Interval(Duration::from_secs(10)),
        }
    }
}

impl GossipConfig {
    pub fn with_relays(relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            relays: relays.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

fn subscription_id(kind: GossipKind) -> &'static str {
    match kind {
        GossipKind::PlayerState => "pb-player",
        GossipKind::Bullet => "pb-bullet",
        GossipKind::GameState => "pb-game",
    }
}

struct RelayLink {
    transport: TransportAdapter,
    observer: ObserverId,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    closed: bool,
}

impl RelayLink {
    fn new(url: &str) -> Self {
        let transport = TransportAdapter::new(url);
        let (observer, events) = transport.observe();
        Self {
            transport,
            observer,
            events,
            closed: false,
        }
    }

    fn send_text(&self, text: &str) {
        self.transport.send(Frame::Text(text.to_string()));
    }

    fn shutdown(&mut self) {
        self.transport.unobserve(self.observer);
        self.transport.close();
        self.closed = true;
    }
}

pub struct GossipBackend {
    config: GossipConfig,
    world: WorldConfig,
    clock: SharedClock,
    keys: Keys,
    identity: PlayerId,
    links: Vec<RelayLink>,
    state: GossipState,
    scheduler: Scheduler<Timer>,
    notifications: Notifications,
    local: Option<LocalPlayer>,
    ids: Option<IdGenerator>,
}

impl GossipBackend {
    /// Sign with the identity held in `store`, creating one on first use.
    pub fn new(
        config: GossipConfig,
        world: WorldConfig,
        store: &dyn KeyStore,
    ) -> Result<Self, KeyStoreError> {
        let keys = load_or_create_keys(store)?;
        Ok(Self::with_keys(config, world, keys, system_clock()))
    }

    pub fn with_keys(config: GossipConfig, world: WorldConfig, keys: Keys, clock: SharedClock) -> Self {
        let identity = short_id(&keys.public_key());
        Self {
            config,
            world,
            clock,
            keys,
            identity,
            links: Vec::new(),
            state: GossipState::new(),
            scheduler: Scheduler::new(),
            notifications: Notifications::new(),
            local: None,
            ids: None,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Short id this client plays under, known before connecting.
    pub fn identity(&self) -> &PlayerId {
        &self.identity
    }

    /// Relays currently open.
    pub fn relay_count(&self) -> usize {
        self.links.iter().filter(|l| l.transport.is_open()).count()
    }

    pub fn state(&self) -> &GossipState {
        &self.state
    }

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

    fn broadcast_text(&self, text: &str) {
        for link in self.links.iter().filter(|l| !l.closed) {
            link.send_text(text);
        }
    }

    /// Sign `content` as a `kind` event and push it to every relay.
    fn publish<T: Serialize>(&self, kind: GossipKind, content: &T) {
        let content = match serde_json::to_value(content) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Failed to serialize {kind:?} payload: {e}");
                return;
            }
        };
        let now = self.clock.now_ms();
        match build_event(&self.keys, kind, &self.config.room, &content, now) {
            Ok(event) => self.broadcast_text(&event_frame(&event)),
            Err(e) => log::warn!("Failed to publish {kind:?}: {e}"),
        }
    }

    fn publish_local(&self) {
        if let Some(local) = self.local.as_ref() {
            self.publish(GossipKind::PlayerState, local.player());
        }
    }

    fn subscribe_all(&self, now: u64) {
        for kind in GossipKind::ALL {
            let filter = room_filter(kind, &self.config.room, self.config.windows.for_kind(kind), now);
            self.broadcast_text(&req_frame(subscription_id(kind), &filter));
        }
    }

    fn deliver(&mut self) {
        let snapshot = self.snapshot();
        self.notifications.deliver(&snapshot);
    }

    fn cleanup(&mut self, now: u64) {
        let Liveness {
            bullet_ttl,
            player_offline_after,
        } = self.config.liveness;
        if self
            .state
            .sweep(now, bullet_ttl, player_offline_after, self.config.windows.bullet)
        {
            log::debug!("Swept stale gossip entries");
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

    fn handle_frame(&mut self, text: &str, now: u64) {
        match parse_relay_frame(text) {
            Some(RelayMessage::Event { event, .. }) => {
                if let Some(accepted) =
                    validate_event(&event, &self.config.room, &self.config.windows, now)
                {
                    self.state.ingest(accepted);
                }
            }
            Some(RelayMessage::Eose(subscription)) => {
                log::debug!("End of stored events for {subscription}");
            }
            Some(RelayMessage::Ok {
                event_id,
                accepted: false,
                message,
            }) => log::debug!("Relay rejected {event_id}: {message}"),
            Some(RelayMessage::Ok { .. }) => {}
            Some(RelayMessage::Notice(notice)) => log::debug!("Relay notice: {notice}"),
            Some(RelayMessage::Closed {
                subscription,
                message,
            }) => log::warn!("Relay closed {subscription}: {message}"),
            None => log::debug!("Ignoring unrecognized relay frame"),
        }
    }

    fn teardown(&mut self) {
        self.scheduler.cancel_all();
        for link in self.links.iter_mut() {
            link.shutdown();
        }
        self.links.clear();
        self.state.clear();
        self.local = None;
        self.ids = None;
        self.notifications.set_status(ConnectionStatus::Disconnected);
        self.deliver();
    }
}

impl SyncBackend for GossipBackend {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.notifications.status() == ConnectionStatus::Connected {
            return Ok(());
        }
        self.notifications.set_status(ConnectionStatus::Connecting);

        let timeout = self.config.connect_timeout;
        let mut links: Vec<RelayLink> = self.config.relays.iter().map(|url| RelayLink::new(url)).collect();
        let attempts = links
            .iter_mut()
            .map(|link| tokio::time::timeout(timeout, link.transport.connect()));
        let results = join_all(attempts).await;

        let mut failures = Vec::new();
        let mut timed_out = 0;
        for (link, result) in links.iter_mut().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures.push(e.to_string());
                    link.shutdown();
                }
                Err(_) => {
                    log::warn!("Relay {} did not open within {timeout:?}", link.transport.url());
                    timed_out += 1;
                    link.shutdown();
                }
            }
        }
        links.retain(|l| !l.closed);
        if links.is_empty() {
            self.notifications.set_status(ConnectionStatus::Disconnected);
            return Err(if failures.is_empty() && timed_out > 0 {
                ConnectionError::Timeout(timeout)
            } else if failures.is_empty() {
                ConnectionError::Failed("no relays configured".to_string())
            } else {
                ConnectionError::Failed(failures.join("; "))
            });
        }
        self.links = links;

        let now = self.clock.now_ms();
        self.subscribe_all(now);

        self.local = Some(LocalPlayer::spawn(
            self.identity.clone(),
            &self.world,
            now,
            &mut rand::rng(),
        ));
        self.ids = Some(IdGenerator::new(self.identity.clone()));
        self.publish_local();
        let proposed = GameState::started_at(now);
        self.state.merge_game_state(&proposed);
        self.publish(GossipKind::GameState, &proposed);

        self.scheduler
            .schedule_every(now, self.config.heartbeat_interval, Timer::Heartbeat);
        if let CleanupPolicy::Interval(every) = self.config.cleanup {
            self.scheduler.schedule_every(now, every, Timer::Cleanup);
        }

        self.notifications.set_status(ConnectionStatus::Connected);
        log::info!(
            "Player {} gossiping in {} via {} relays",
            self.identity,
            self.config.room,
            self.links.len()
        );
        self.deliver();
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.links.is_empty() && self.notifications.status() == ConnectionStatus::Disconnected {
            return;
        }
        let now = self.clock.now_ms();
        if let Some(local) = self.local.as_mut() {
            local.deactivate(now);
        }
        self.publish_local();
        for kind in GossipKind::ALL {
            self.broadcast_text(&close_frame(subscription_id(kind)));
        }
        self.teardown();
        log::info!("Left gossip room {}", self.config.room);
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
        self.publish(GossipKind::Bullet, &bullet);
    }

    fn delete_bullet(&mut self, id: &BulletId) {
        if !self.is_connected("bullet delete") {
            return;
        }
        let now = self.clock.now_ms();
        if self.state.remove_bullet(id, now) {
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
        let mut players = self.state.players(now, player_offline_after);
        // The writer-owned copy is never older than its echo
        if let Some(local) = self.local.as_ref().filter(|l| l.player().is_active) {
            players.insert(local.id().clone(), local.player().clone());
        }
        WorldSnapshot {
            players,
            bullets: self.state.bullets(now, bullet_ttl),
            game_state: self.state.game_state(),
        }
    }

    fn tick(&mut self) {
        if self.notifications.status() != ConnectionStatus::Connected {
            return;
        }
        let mut frames = Vec::new();
        for link in self.links.iter_mut() {
            while let Ok(event) = link.events.try_recv() {
                match event {
                    TransportEvent::Message(Frame::Text(text)) => frames.push(text),
                    TransportEvent::Message(Frame::Binary(_)) => {
                        log::debug!("Ignoring binary frame from {}", link.transport.url());
                    }
                    TransportEvent::Error(e) => {
                        log::warn!("Relay {} error: {e}", link.transport.url());
                    }
                    TransportEvent::Close => {
                        log::warn!("Relay {} closed", link.transport.url());
                        link.closed = true;
                    }
                    TransportEvent::Open => {}
                }
            }
        }

        let now = self.clock.now_ms();
        for text in frames {
            self.handle_frame(&text, now);
        }

        self.links.retain(|l| !l.closed);
        if self.links.is_empty() {
            log::warn!("Every relay closed, leaving {}", self.config.room);
            self.teardown();
            return;
        }

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
