//! # planebattle-sync: Replication backends for planebattle
//!
//! Three interchangeable implementations of
//! [`SyncBackend`](planebattle_core::SyncBackend) plus the room server the
//! first two talk to.
//!
//! ```text
//!  GameLoop ──► Backend ─┬─ DocumentBackend ─┐
//!                        ├─ PresenceBackend ─┴─ RoomProvider ══ws══ RoomServer
//!                        └─ GossipBackend ───── TransportAdapter × N ══ws══ relays
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: one WebSocket stream with multicast observers
//! - [`protocol`]: bincode room wire protocol
//! - [`replica`]: the shared `yrs` document
//! - [`presence`]: presence records and the three write policies
//! - [`provider`]: client side of a room
//! - [`broadcast`]: per-room fan-out
//! - [`server`]: the room server
//! - [`gossip`]: keys, NIP-01 framing and the gossip merge state
//! - [`backend`]: the backends and the [`Backend`] selector

pub mod backend;
pub mod broadcast;
pub mod gossip;
pub mod presence;
pub mod protocol;
pub mod provider;
pub mod replica;
pub mod server;
pub mod transport;

pub use backend::{
    Backend, BackendConfig, DocumentBackend, DocumentConfig, GossipBackend, GossipConfig,
    PresenceBackend, PresenceConfig, RoomConfig,
};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use gossip::{FileKeyStore, GossipKind, GossipState, GossipWindows, KeyStore, KeyStoreError, MemoryKeyStore};
pub use presence::{PresenceDelta, PresencePolicy, PresenceTable, PresenceUpdate};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use provider::{ProviderEvent, RoomProvider};
pub use replica::{DocumentReplica, ReplicaError};
pub use server::{RoomServer, RoomServerConfig, ServerStats};
pub use transport::{Frame, ReadyState, TransportAdapter, TransportError, TransportEvent};
