//! Cooperative timer queue owned by a backend.
//!
//! Nothing here sleeps or spawns: the owner calls [`Scheduler::due`] from its
//! `tick` and handles whatever fired. Dropping or clearing the scheduler is
//! therefore enough to guarantee no timer fires after `disconnect`.

use std::time::Duration;

/// Timers every backend owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Republish the local player.
    Heartbeat,
    /// Sweep stale bullets and players.
    Cleanup,
    /// Restore the local player after it was shot down.
    Respawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

#[derive(Debug, Clone)]
struct Task<K> {
    id: TaskId,
    kind: K,
    due_at: u64,
    every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    tasks: Vec<Task<K>>,
    next_id: u64,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }
}

impl<K: Clone> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `kind` once, `delay` after `now`.
    pub fn schedule_once(&mut self, now: u64, delay: Duration, kind: K) -> TaskId {
        self.push(kind, now + delay.as_millis() as u64, None)
    }

    /// Fire `kind` every `interval`, first at `now + interval`.
    pub fn schedule_every(&mut self, now: u64, interval: Duration, kind: K) -> TaskId {
        let every = (interval.as_millis() as u64).max(1);
        self.push(kind, now + every, Some(every))
    }

    fn push(&mut self, kind: K, due_at: u64, every: Option<u64>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            kind,
            due_at,
            every,
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.tasks.iter().map(|t| t.due_at).min()
    }

    /// Collect every task due at `now`, earliest deadline first.
    ///
    /// One-shot tasks are removed. A repeating task fires at most once per
    /// call and is rearmed on its original cadence, skipping periods that
    /// were missed entirely.
    pub fn due(&mut self, now: u64) -> Vec<K> {
        let mut fired: Vec<(u64, TaskId, K)> = Vec::new();
        self.tasks.retain_mut(|task| {
            if task.due_at > now {
                return true;
            }
            fired.push((task.due_at, task.id, task.kind.clone()));
            match task.every {
                Some(every) => {
                    let missed = (now - task.due_at) / every;
                    task.due_at += every * (missed + 1);
                    true
                }
                None => false,
            }
        });
        fired.sort_by_key(|(due_at, id, _)| (*due_at, *id));
        fired.into_iter().map(|(_, _, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_fires_exactly_at_deadline() {
        let mut s = Scheduler::new();
        s.schedule_once(1_000, Duration::from_millis(2_000), Timer::Respawn);
        assert!(s.due(2_999).is_empty());
        assert_eq!(s.due(3_000), vec![Timer::Respawn]);
        assert!(s.due(10_000).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_every_keeps_cadence() {
        let mut s = Scheduler::new();
        s.schedule_every(0, Duration::from_secs(5), Timer::Heartbeat);
        assert!(s.due(4_999).is_empty());
        assert_eq!(s.due(5_000), vec![Timer::Heartbeat]);
        assert_eq!(s.next_deadline(), Some(10_000));
        // Late tick: fires once, skips the missed period
        assert_eq!(s.due(21_000), vec![Timer::Heartbeat]);
        assert_eq!(s.next_deadline(), Some(25_000));
    }

    #[test]
    fn test_due_orders_by_deadline() {
        let mut s = Scheduler::new();
        s.schedule_every(0, Duration::from_secs(10), Timer::Cleanup);
        s.schedule_every(0, Duration::from_secs(5), Timer::Heartbeat);
        s.schedule_once(0, Duration::from_secs(2), Timer::Respawn);
        assert_eq!(
            s.due(10_000),
            vec![Timer::Respawn, Timer::Heartbeat, Timer::Cleanup]
        );
    }

    #[test]
    fn test_cancel() {
        let mut s = Scheduler::new();
        let a = s.schedule_once(0, Duration::from_secs(1), Timer::Respawn);
        let b = s.schedule_every(0, Duration::from_secs(1), Timer::Heartbeat);
        assert!(s.cancel(a));
        assert!(!s.cancel(a));
        assert!(s.is_scheduled(b));
        s.cancel_all();
        assert!(s.due(u64::MAX / 2).is_empty());
    }
}
