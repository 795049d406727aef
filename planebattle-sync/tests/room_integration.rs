//! End-to-end tests for the document and presence backends against a real
//! room server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use planebattle_core::{
    CleanupPolicy, ConnectionStatus, ManualClock, PlayerPatch, SharedClock, SyncBackend, Vec2, WorldConfig,
};
use planebattle_sync::{
    DocumentBackend, PresenceBackend, PresenceConfig, PresencePolicy, RoomConfig,
};

use common::{eventually, settle, start_room_server, start_silent_server};

const POLICIES: [PresencePolicy; 3] = [
    PresencePolicy::MapMerge,
    PresencePolicy::FieldPatch,
    PresencePolicy::WholeStateReplace,
];

fn room_config(url: &str, room: &str) -> RoomConfig {
    RoomConfig {
        room: room.to_string(),
        connect_timeout: Duration::from_secs(2),
        ..RoomConfig::with_url(url)
    }
}

fn document(url: &str, clock: &SharedClock) -> DocumentBackend {
    DocumentBackend::with_clock(room_config(url, "game-room"), WorldConfig::default(), clock.clone())
}

fn presence(url: &str, policy: PresencePolicy, clock: &SharedClock) -> PresenceBackend {
    PresenceBackend::with_clock(
        PresenceConfig::new(room_config(url, "game-room"), policy),
        WorldConfig::default(),
        clock.clone(),
    )
}

#[tokio::test]
async fn test_document_clients_see_each_other() {
    let (url, server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert_eq!(a.status(), ConnectionStatus::Connected);

    assert!(
        eventually(|| {
            a.tick();
            b.tick();
            a.online_player_count() == 2 && b.online_player_count() == 2
        })
        .await
    );
    assert_eq!(server.room_count().await, 1);

    // Both agree on the one game start written first
    let state = a.snapshot().game_state;
    assert!(state.started);
    assert!(state.start_time.is_some());
    assert_eq!(b.snapshot().game_state, state);
}

#[tokio::test]
async fn test_position_updates_propagate() {
    let (url, _server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    let a_id = a.local_player_id().unwrap();

    a.update_local_player(PlayerPatch::position(150.0, 200.0));
    assert!(
        eventually(|| {
            b.tick();
            b.snapshot()
                .player(&a_id)
                .is_some_and(|p| p.position() == Vec2::new(150.0, 200.0))
        })
        .await
    );
}

#[tokio::test]
async fn test_bullet_fired_in_same_tick_and_replicated() {
    let (url, _server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();

    a.fire_bullet(Vec2::new(10.0, 20.0), Vec2::new(0.0, -500.0));
    let fired = a.snapshot().bullets;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].owner_id, a.local_player_id().unwrap());

    assert!(eventually(|| {
        b.tick();
        b.snapshot().bullets == fired
    })
    .await);

    // Deleting on one side removes it on the other
    b.delete_bullet(&fired[0].id);
    b.delete_bullet(&fired[0].id);
    assert!(b.snapshot().bullets.is_empty());
    assert!(eventually(|| {
        a.tick();
        a.snapshot().bullets.is_empty()
    })
    .await);
}

#[tokio::test]
async fn test_bullet_expires_after_ttl() {
    let (url, _server) = start_room_server().await;
    let manual = ManualClock::starting_now();
    let clock = manual.shared();
    let mut a = document(&url, &clock);
    a.connect().await.unwrap();

    a.fire_bullet(Vec2::new(1.0, 1.0), Vec2::new(0.0, -500.0));
    manual.advance(Duration::from_millis(5_000));
    assert_eq!(a.snapshot().bullets.len(), 1);

    // Hidden at read time before any sweep
    manual.advance(Duration::from_millis(1));
    assert!(a.snapshot().bullets.is_empty());
    assert_eq!(a.replica().bullet_entries(), 1);

    a.tick();
    assert_eq!(a.replica().bullet_entries(), 0);
}

/// One stale bullet in the replica under `cleanup`, then a single tick.
async fn stale_bullets_after_tick(cleanup: CleanupPolicy) -> (usize, u32) {
    let (url, _server) = start_room_server().await;
    let manual = ManualClock::starting_now();
    let clock = manual.shared();
    let config = RoomConfig {
        cleanup,
        ..room_config(&url, "game-room")
    };
    let mut a = DocumentBackend::with_clock(config, WorldConfig::default(), clock.clone());
    a.connect().await.unwrap();
    // Heartbeat only; no cleanup interval is armed
    let timers = a.pending_timers();

    a.fire_bullet(Vec2::new(1.0, 1.0), Vec2::new(0.0, -500.0));
    manual.advance(Duration::from_millis(5_001));
    a.tick();
    (timers, a.replica().bullet_entries())
}

#[tokio::test]
async fn test_certain_probabilistic_cleanup_sweeps_first_tick() {
    let (timers, bullets) = stale_bullets_after_tick(CleanupPolicy::probabilistic(1.0)).await;
    assert_eq!(timers, 1);
    assert_eq!(bullets, 0);
}

#[tokio::test]
async fn test_zero_chance_cleanup_never_sweeps() {
    let (timers, bullets) = stale_bullets_after_tick(CleanupPolicy::probabilistic(0.0)).await;
    assert_eq!(timers, 1);
    assert_eq!(bullets, 1);
}

#[tokio::test]
async fn test_nan_cleanup_chance_ticks_without_sweeping() {
    let (_, bullets) = stale_bullets_after_tick(CleanupPolicy::Probabilistic { chance: f64::NAN }).await;
    assert_eq!(bullets, 1);
}

#[tokio::test]
async fn test_respawn_after_delay() {
    let (url, _server) = start_room_server().await;
    let manual = ManualClock::starting_now();
    let clock = manual.shared();
    let world = WorldConfig::default();
    let mut a = document(&url, &clock);
    a.connect().await.unwrap();
    let id = a.local_player_id().unwrap();

    a.apply_damage_to_local_player(30);
    assert_eq!(a.snapshot().player(&id).unwrap().health, 70);
    a.apply_damage_to_local_player(200);
    assert_eq!(a.snapshot().player(&id).unwrap().health, 0);

    manual.advance(Duration::from_millis(1_999));
    a.tick();
    assert_eq!(a.snapshot().player(&id).unwrap().health, 0);

    manual.advance(Duration::from_millis(1));
    a.tick();
    let player = a.snapshot().player(&id).cloned().unwrap();
    assert_eq!(player.health, 100);
    assert!(world.bounds.contains(player.position()));
}

#[tokio::test]
async fn test_stale_player_hidden_then_swept() {
    let (url, _server) = start_room_server().await;
    let manual = ManualClock::starting_now();
    let clock = manual.shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    let b_id = b.local_player_id().unwrap();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 2
    })
    .await);

    // b stops ticking, so its heartbeat never fires
    manual.advance(Duration::from_secs(11));
    assert_eq!(a.online_player_count(), 1);
    assert!(a.replica().players().contains_key(&b_id));
    a.tick();
    assert!(!a.replica().players().contains_key(&b_id));
    assert!(a.all_players().contains_key(&a.local_player_id().unwrap()));
}

#[tokio::test]
async fn test_disconnect_marks_player_inactive() {
    let (url, _server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 2
    })
    .await);

    b.disconnect();
    b.disconnect();
    assert_eq!(b.status(), ConnectionStatus::Disconnected);
    assert_eq!(b.pending_timers(), 0);
    assert!(b.local_player_id().is_none());
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 1
    })
    .await);
}

#[tokio::test]
async fn test_presence_policies_replicate_roster() {
    for policy in POLICIES {
        let (url, server) = start_room_server().await;
        let clock = ManualClock::starting_now().shared();
        let mut a = presence(&url, policy, &clock);
        let mut b = presence(&url, policy, &clock);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let a_id = a.local_player_id().unwrap();

        a.update_local_player(PlayerPatch::position(300.0, 400.0));
        assert!(
            eventually(|| {
                a.tick();
                b.tick();
                b.snapshot()
                    .player(&a_id)
                    .is_some_and(|p| p.position() == Vec2::new(300.0, 400.0))
            })
            .await,
            "{policy:?}"
        );
        assert!(eventually(|| {
            a.tick();
            a.online_player_count() == 2
        })
        .await);
        // Players never enter the document under presence
        assert!(b.replica().players().is_empty());
        assert_eq!(server.presence_count("game-room").await, 2);
    }
}

#[tokio::test]
async fn test_presence_late_joiner_gets_full_records() {
    for policy in POLICIES {
        let (url, _server) = start_room_server().await;
        let clock = ManualClock::starting_now().shared();
        let mut a = presence(&url, policy, &clock);
        a.connect().await.unwrap();
        a.update_local_player(PlayerPatch::position(120.0, 130.0));
        let a_id = a.local_player_id().unwrap();
        // Let the server fold a's deltas before b joins
        settle(|| a.tick()).await;

        let mut b = presence(&url, policy, &clock);
        b.connect().await.unwrap();
        assert!(
            eventually(|| {
                b.tick();
                b.snapshot()
                    .player(&a_id)
                    .is_some_and(|p| p.position() == Vec2::new(120.0, 130.0))
            })
            .await,
            "{policy:?}"
        );
    }
}

#[tokio::test]
async fn test_presence_peer_left_drops_record() {
    let (url, server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = presence(&url, PresencePolicy::MapMerge, &clock);
    let mut b = presence(&url, PresencePolicy::MapMerge, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 2
    })
    .await);

    b.disconnect();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 1 && a.roster().table().remote_len() == 0
    })
    .await);
    assert_eq!(server.presence_count("game-room").await, 1);
}

#[tokio::test]
async fn test_presence_offline_filter() {
    let (url, _server) = start_room_server().await;
    let manual = ManualClock::starting_now();
    let clock = manual.shared();
    let mut a = presence(&url, PresencePolicy::WholeStateReplace, &clock);
    let mut b = presence(&url, PresencePolicy::WholeStateReplace, &clock);
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 2
    })
    .await);

    manual.advance(Duration::from_secs(11));
    a.tick();
    assert_eq!(a.online_player_count(), 1);
    // The record is still held, only hidden
    assert_eq!(a.roster().table().remote_len(), 1);

    // b's heartbeat brings it back
    b.tick();
    assert!(eventually(|| {
        a.tick();
        a.online_player_count() == 2
    })
    .await);
}

#[tokio::test]
async fn test_notifications_follow_merges() {
    let (url, _server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = document(&url, &clock);
    let mut b = document(&url, &clock);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let rosters = Arc::new(Mutex::new(Vec::new()));
    let s = statuses.clone();
    b.notifications()
        .connection_status
        .subscribe(move |status| s.lock().push(*status));
    let r = rosters.clone();
    b.notifications()
        .players
        .subscribe(move |players| r.lock().push(players.len()));

    a.connect().await.unwrap();
    b.connect().await.unwrap();
    assert!(eventually(|| {
        a.tick();
        b.tick();
        rosters.lock().last() == Some(&2)
    })
    .await);

    b.disconnect();
    assert_eq!(
        *statuses.lock(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected
        ]
    );
    assert_eq!(rosters.lock().last(), Some(&0));
}

#[tokio::test]
async fn test_connect_times_out_without_sync() {
    let url = start_silent_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut config = room_config(&url, "game-room");
    config.connect_timeout = Duration::from_millis(200);
    let mut backend = DocumentBackend::with_clock(config, WorldConfig::default(), clock);

    let err = backend.connect().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(backend.status(), ConnectionStatus::Disconnected);

    // Nothing runs after a failed connect
    backend.fire_bullet(Vec2::ZERO, Vec2::new(0.0, -500.0));
    assert!(backend.snapshot().bullets.is_empty());
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (url, server) = start_room_server().await;
    let clock = ManualClock::starting_now().shared();
    let mut a = DocumentBackend::with_clock(room_config(&url, "alpha"), WorldConfig::default(), clock.clone());
    let mut b = DocumentBackend::with_clock(room_config(&url, "beta"), WorldConfig::default(), clock.clone());
    a.connect().await.unwrap();
    b.connect().await.unwrap();
    a.fire_bullet(Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0));

    settle(|| {
        a.tick();
        b.tick();
    })
    .await;
    assert_eq!(b.online_player_count(), 1);
    assert!(b.snapshot().bullets.is_empty());
    assert_eq!(server.room_count().await, 2);
}
