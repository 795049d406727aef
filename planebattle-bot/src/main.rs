use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use planebattle_core::{PlayerPatch, Rotation, SyncBackend, Vec2, WorldConfig};
use planebattle_sync::{
    Backend, BackendConfig, FileKeyStore, GossipConfig, KeyStore, MemoryKeyStore, PresenceConfig,
    PresencePolicy, RoomConfig, RoomServer, RoomServerConfig,
};
use rand::Rng;

#[derive(Parser, Debug)]
#[command(name = "planebattle")]
#[command(about = "Room server and headless bot for planebattle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the room server used by the document and presence backends
    Serve {
        #[arg(long, default_value = "127.0.0.1:1234")]
        bind: String,

        #[arg(long, default_value = "100")]
        max_peers: usize,
    },
    /// Fly a bot plane through one of the backends
    Play {
        #[arg(long, value_enum, default_value = "document")]
        backend: BackendKind,

        /// Room server base URL (document/presence)
        #[arg(long, default_value = "ws://127.0.0.1:1234")]
        url: String,

        /// Room name; defaults to the backend's own
        #[arg(long)]
        room: Option<String>,

        #[arg(long, value_enum, default_value = "map-merge")]
        policy: PolicyArg,

        /// Relay URL (gossip), repeatable; defaults to the public relays
        #[arg(long = "relay")]
        relays: Vec<String>,

        /// Key store file (gossip); defaults to the platform config dir
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        duration_secs: u64,

        /// Game loop period in milliseconds
        #[arg(long, default_value = "50")]
        rate_ms: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    Document,
    Presence,
    Gossip,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    MapMerge,
    FieldPatch,
    WholeStateReplace,
}

impl From<PolicyArg> for PresencePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::MapMerge => PresencePolicy::MapMerge,
            PolicyArg::FieldPatch => PresencePolicy::FieldPatch,
            PolicyArg::WholeStateReplace => PresencePolicy::WholeStateReplace,
        }
    }
}

fn backend_config(
    kind: BackendKind,
    url: String,
    room: Option<String>,
    policy: PolicyArg,
    relays: Vec<String>,
) -> BackendConfig {
    let mut room_config = RoomConfig::with_url(url);
    match kind {
        BackendKind::Document => {
            if let Some(room) = room {
                room_config.room = room;
            }
            BackendConfig::Document(room_config)
        }
        BackendKind::Presence => {
            if let Some(room) = room {
                room_config.room = room;
            }
            BackendConfig::Presence(PresenceConfig::new(room_config, policy.into()))
        }
        BackendKind::Gossip => {
            let mut config = if relays.is_empty() {
                GossipConfig::default()
            } else {
                GossipConfig::with_relays(relays)
            };
            if let Some(room) = room {
                config.room = room;
            }
            BackendConfig::Gossip(config)
        }
    }
}

/// Only the gossip backend signs events, so only it touches the key file.
fn key_store(kind: BackendKind, key_file: Option<PathBuf>) -> Result<Box<dyn KeyStore>> {
    if kind != BackendKind::Gossip {
        return Ok(Box::new(MemoryKeyStore::new()));
    }
    Ok(match key_file {
        Some(path) => Box::new(FileKeyStore::new(path)),
        None => Box::new(FileKeyStore::open_default()?),
    })
}

async fn serve(bind: String, max_peers: usize) -> Result<()> {
    let server = RoomServer::new(RoomServerConfig {
        bind_addr: bind,
        max_peers_per_room: max_peers,
        ..RoomServerConfig::default()
    });
    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("room server stopped: {e}"))
}

/// Wander around, steer at random and fire now and then.
fn step(backend: &mut Backend, world: &WorldConfig, heading: &mut Vec2) {
    let Some(id) = backend.local_player_id() else {
        return;
    };
    let snapshot = backend.snapshot();
    let Some(me) = snapshot.player(&id) else {
        return;
    };
    let mut rng = rand::rng();
    if rng.random_bool(0.05) {
        *heading = Vec2::new(rng.random_range(-4.0..4.0), rng.random_range(-4.0..4.0));
    }
    let next = world
        .bounds
        .clamp(Vec2::new(me.x + heading.x, me.y + heading.y));
    let rotation = match heading.x {
        x if x < -1.0 => Rotation::Left,
        x if x > 1.0 => Rotation::Right,
        _ => Rotation::Up,
    };
    backend.update_local_player(PlayerPatch::position(next.x, next.y).with_rotation(rotation));
    if rng.random_bool(0.02) {
        backend.fire_bullet(next, Vec2::new(0.0, -500.0));
    }
}

async fn play(backend: &mut Backend, duration: Duration, rate: Duration) -> Result<()> {
    backend.connect().await.context("failed to connect")?;
    log::info!(
        "Flying as {} via the {} backend",
        backend.local_player_id().map(|id| id.to_string()).unwrap_or_default(),
        backend.name()
    );

    let world = WorldConfig::default();
    let mut heading = Vec2::ZERO;
    let mut ticker = tokio::time::interval(rate);
    let mut report = tokio::time::interval(Duration::from_secs(5));
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                backend.tick();
                step(backend, &world, &mut heading);
            }
            _ = report.tick() => {
                let snapshot = backend.snapshot();
                log::info!(
                    "{} players online, {} bullets in flight, status {}",
                    snapshot.players.len(),
                    snapshot.bullets.len(),
                    backend.status()
                );
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }
    backend.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, max_peers } => serve(bind, max_peers).await,
        Command::Play {
            backend,
            url,
            room,
            policy,
            relays,
            key_file,
            duration_secs,
            rate_ms,
        } => {
            let store = key_store(backend, key_file)?;
            let config = backend_config(backend, url, room, policy, relays);
            let mut backend = Backend::from_config(config, WorldConfig::default(), store.as_ref())?;
            play(
                &mut backend,
                Duration::from_secs(duration_secs),
                Duration::from_millis(rate_ms.max(1)),
            )
            .await
        }
    }
}
