//! TCP plumbing: per-connection serving, the open-connection registry,
//! and a client-side framed connection.

pub mod connection;

pub use connection::{
    Connection, ConnectionEntry, ConnectionInfo, ConnectionRegistry, serve_connection,
};
