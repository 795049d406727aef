//! Change notification channels.
//!
//! Each [`Channel`] keeps its subscribers in registration order and calls
//! them synchronously from `publish`. Subscribers receive `&T`, never the
//! backend, so a callback cannot re-enter the backend that is delivering.

use std::collections::BTreeMap;

use crate::model::{Bullet, ConnectionStatus, GameState, Player, PlayerId, WorldSnapshot};

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback<T> = Box<dyn FnMut(&T) + Send>;

pub struct Channel<T> {
    subscribers: Vec<(Subscription, Callback<T>)>,
    next_id: u64,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T> Channel<T> {
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) -> Subscription {
        let id = Subscription(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(id, _)| *id != subscription);
        self.subscribers.len() != before
    }

    pub fn publish(&mut self, value: &T) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// The four channels the game loop listens on, plus the last view that was
/// delivered so only real changes are published.
#[derive(Debug, Default)]
pub struct Notifications {
    pub connection_status: Channel<ConnectionStatus>,
    pub players: Channel<BTreeMap<PlayerId, Player>>,
    pub bullets: Channel<Vec<Bullet>>,
    pub game_state: Channel<GameState>,
    delivered: WorldSnapshot,
    status: ConnectionStatus,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a status transition. Repeating the current status is silent.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        log::debug!("Connection status -> {status}");
        self.connection_status.publish(&status);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Compare `current` with the last delivered view and publish every
    /// collection that differs, players first.
    pub fn deliver(&mut self, current: &WorldSnapshot) {
        if current.players != self.delivered.players {
            self.delivered.players = current.players.clone();
            self.players.publish(&current.players);
        }
        if current.bullets != self.delivered.bullets {
            self.delivered.bullets = current.bullets.clone();
            self.bullets.publish(&current.bullets);
        }
        if current.game_state != self.delivered.game_state {
            self.delivered.game_state = current.game_state;
            self.game_state.publish(&current.game_state);
        }
    }

    pub fn delivered(&self) -> &WorldSnapshot {
        &self.delivered
    }
}
