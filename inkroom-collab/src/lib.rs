//! # inkroom-collab — room relay and client sync
//!
//! ```text
//! ┌──────────────┐      WebSocket      ┌──────────────┐
//! │ RelayClient  │ ◄─────────────────► │ RelayServer  │
//! │ + Reconciler │  bincode or JSON    │ + RoomStore  │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ LayerStack   │                     │ operation log│
//! │ (local view) │                     │ per room     │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                     ┌───────┴────────┐
//!                                     │ BroadcastGroup │
//!                                     │ (fan-out)      │
//!                                     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: client/server messages and frame encoding
//! - [`broadcast`]: per-room fan-out without echo
//! - [`store`]: rooms, operation logs, membership
//! - [`server`]: WebSocket relay
//! - [`client`]: WebSocket client with reconnect policy
//! - [`reconciler`]: local gestures and remote operations on a layer stack

pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod reconciler;
pub mod server;
pub mod store;

pub use broadcast::{BroadcastGroup, BroadcastStats, PeerId, Relayed};
pub use client::{ClientConfig, ClientEvent, ConnectionState, OpSink, RelayClient};
pub use protocol::{ClientMessage, JoinReply, ProtocolError, RoomInfo, ServerMessage};
pub use reconciler::{Delivery, Reconciler, ToolMode, ToolSettings};
pub use server::{RelayServer, ServerConfig, ServerStats, SharedStore};
pub use store::{Room, RoomSnapshot, RoomStore, StoreError};
