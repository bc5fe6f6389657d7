//! Transport traits consumed by the protocol core.

use crate::TransportResult;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One datagram conversation with a single peer.
///
/// Implementations deliver whole datagrams: a `send` puts one datagram on
/// the wire, a `recv` blocks until one datagram from this peer is available.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one datagram.
    ///
    /// # Errors
    ///
    /// Fails if the connection is cancelled, the datagram exceeds the
    /// transport maximum, or the socket reports an error.
    async fn send(&self, data: &[u8]) -> TransportResult<()>;

    /// Receive one datagram, waiting until one is available.
    ///
    /// # Errors
    ///
    /// Fails if the connection is cancelled, the datagram is zero-length,
    /// or the socket reports an error.
    async fn recv(&self) -> TransportResult<Vec<u8>>;

    /// Address of the peer, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Tear the connection down. Idempotent; pending and future operations
    /// fail with a closed error.
    fn cancel(&self);

    /// Whether the connection has been cancelled.
    fn is_cancelled(&self) -> bool;

    /// Snapshot of this connection's traffic counters.
    fn stats(&self) -> TransportStats;
}

/// Produces inbound [`Connection`]s from a bound local port.
#[async_trait]
pub trait Listener: Send {
    /// Connection type produced by this listener.
    type Conn: Connection;

    /// Wait for the next inbound conversation.
    ///
    /// # Errors
    ///
    /// Fails once the listener is shut down.
    async fn accept(&mut self) -> TransportResult<Self::Conn>;

    /// Local address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot report its address.
    fn local_addr(&self) -> TransportResult<SocketAddr>;
}

/// Traffic counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Datagrams sent.
    pub packets_sent: u64,
    /// Datagrams received.
    pub packets_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
}

/// Shared atomic counters backing [`TransportStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) packets_sent: AtomicU64,
    pub(crate) packets_received: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record_send(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
