//! Bullet id generation.
//!
//! Ids look like `{owner}-{salt:08x}-{counter}`. The counter is monotonic
//! within a session and the salt is drawn once per session, so ids from one
//! session never repeat and two sessions of the same owner collide with
//! probability 2^-32 per pair.

use rand::Rng;

use crate::model::{BulletId, PlayerId};

#[derive(Debug, Clone)]
pub struct IdGenerator {
    owner: PlayerId,
    salt: u32,
    counter: u64,
}

impl IdGenerator {
    pub fn new(owner: PlayerId) -> Self {
        Self::with_salt(owner, rand::rng().random())
    }

    pub fn with_salt(owner: PlayerId, salt: u32) -> Self {
        Self {
            owner,
            salt,
            counter: 0,
        }
    }

    pub fn next_bullet_id(&mut self) -> BulletId {
        self.counter += 1;
        BulletId::new(format!("{}-{:08x}-{}", self.owner, self.salt, self.counter))
    }

    pub fn owner(&self) -> &PlayerId {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_within_session() {
        let mut ids = IdGenerator::new(PlayerId::new("p1"));
        let minted: HashSet<_> = (0..10_000).map(|_| ids.next_bullet_id()).collect();
        assert_eq!(minted.len(), 10_000);
    }

    #[test]
    fn test_id_format() {
        let mut ids = IdGenerator::with_salt(PlayerId::new("ab12cd34"), 0xdead);
        assert_eq!(ids.next_bullet_id().as_str(), "ab12cd34-0000dead-1");
        assert_eq!(ids.next_bullet_id().as_str(), "ab12cd34-0000dead-2");
    }

    #[test]
    fn test_sessions_differ_by_salt() {
        let mut a = IdGenerator::with_salt(PlayerId::new("p"), 1);
        let mut b = IdGenerator::with_salt(PlayerId::new("p"), 2);
        assert_ne!(a.next_bullet_id(), b.next_bullet_id());
    }
}
