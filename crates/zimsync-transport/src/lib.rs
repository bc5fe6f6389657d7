//! # ZimSync Transport
//!
//! Datagram transport abstraction for the ZimSync protocol.
//!
//! This crate provides:
//! - [`Connection`] and [`Listener`] traits the core consumes
//! - An async UDP implementation with per-peer demultiplexing
//! - Idempotent cancellation and per-connection statistics
//!
//! The core makes no assumption of reliability or ordering: each datagram is
//! self-contained and carries one complete framed packet.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod udp;

pub use connection::{Connection, Listener, TransportStats};
pub use udp::{UdpConnection, UdpListener};

use std::time::Duration;
use thiserror::Error;

/// Maximum datagram size the protocol will put on the wire (64 KiB).
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Bound on waiting for a client socket to become ready.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll interval while waiting for connect readiness.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be bound.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport did not reach a ready state in time.
    #[error("transport not ready within {0:?}")]
    Timeout(Duration),

    /// A zero-length datagram was received.
    #[error("empty datagram")]
    EmptyDatagram,

    /// A datagram exceeds [`MAX_DATAGRAM_SIZE`].
    #[error("datagram too large: {0} bytes")]
    DatagramTooLarge(usize),

    /// The connection was cancelled locally.
    #[error("connection closed")]
    Closed,

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
