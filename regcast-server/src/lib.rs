//! # regcast-server
//!
//! Hosts a [`regcast_core::SyncService`] behind a TCP listener. Clients
//! exchange JSON control messages and receive binary register deltas
//! over one framed connection each.
//!
//! ## Modules
//!
//! - **config**: TOML configuration with defaults for every field.
//! - **server**: accept loop with a connection cap.

pub mod config;
pub mod server;
