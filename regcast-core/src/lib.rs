//! # regcast-core
//!
//! Core library for the regcast register broadcaster.
//!
//! This crate contains:
//! - **Delta codec**: `encode`/`snapshot` for the Pair/Run wire format, and
//!   `decode`/`apply` for receivers
//! - **Store**: `RegisterStore` of simulated devices and their registers
//! - **Simulation**: fixed-tick drift with hard reset at the range bounds
//! - **Registry**: per-channel `Subscription` lists with fps cadence
//! - **Scheduler**: per-subscriber delta delivery
//! - **Channel store**: last-value cache for generic channels
//! - **Service**: `SyncService` with shared state, control dispatch, periodic loops
//! - **Transport / Codec / Network**: `Transport` trait, `FrameCodec` for
//!   framed TCP I/O, per-connection serving
//! - **Error**: `RegcastError`, a typed, `thiserror`-based error hierarchy

pub mod channel;
pub mod channel_store;
pub mod codec;
pub mod delta;
pub mod error;
pub mod message;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod simulation;
pub mod store;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::ChannelName;
pub use channel_store::{ChannelStore, PublishStats};
pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use delta::DeltaRecord;
pub use error::{RegcastError, TransportError};
pub use message::{InspectReport, Request, RequestKind, Response, ResponseKind};
pub use network::{Connection, ConnectionInfo, ConnectionRegistry, serve_connection};
pub use registry::{Subscription, SubscriptionRegistry};
pub use scheduler::BroadcastStats;
pub use service::{ServiceConfig, ServiceTasks, SyncService};
pub use simulation::Simulation;
pub use store::{Device, Register, RegisterStore};
pub use transport::{ChannelTransport, Frame, Transport, TransportHandle};
