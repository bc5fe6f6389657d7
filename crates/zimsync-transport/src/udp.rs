//! Async UDP transport.
//!
//! A [`UdpListener`] binds one socket and demultiplexes inbound datagrams
//! into per-peer [`UdpConnection`]s keyed by source address; a background
//! task feeds each connection's inbound queue. Client connections own a
//! connected socket of their own.

use crate::connection::{Connection, Listener, StatsCounters, TransportStats};
use crate::{
    TransportError, TransportResult, CONNECT_POLL_INTERVAL, CONNECT_TIMEOUT, MAX_DATAGRAM_SIZE,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify};

/// Capacity of a per-peer inbound datagram queue.
const INBOUND_QUEUE_DEPTH: usize = 256;

enum Inbound {
    /// Client side: read straight off the connected socket.
    Socket,
    /// Server side: datagrams arrive via the listener's demux task.
    Queue(Mutex<mpsc::Receiver<Vec<u8>>>),
}

/// One UDP conversation with a single peer.
pub struct UdpConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbound: Inbound,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    stats: Arc<StatsCounters>,
}

impl UdpConnection {
    /// Open a client-side connection to `endpoint`.
    ///
    /// Binds an ephemeral local port, connects the socket, and waits for it
    /// to become writable, polling in [`CONNECT_POLL_INTERVAL`] steps up to
    /// [`CONNECT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the OS cannot bind or connect, and
    /// `Timeout` if the socket does not reach a ready state in time.
    pub async fn connect(endpoint: SocketAddr) -> TransportResult<Self> {
        let bind_addr: SocketAddr = if endpoint.is_ipv4() {
            "0.0.0.0:0".parse().expect("static addr")
        } else {
            "[::]:0".parse().expect("static addr")
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(endpoint)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match tokio::time::timeout(CONNECT_POLL_INTERVAL, socket.writable()).await {
                Ok(Ok(())) => break,
                Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
                Err(_) if Instant::now() >= deadline => {
                    return Err(TransportError::Timeout(CONNECT_TIMEOUT));
                }
                Err(_) => {}
            }
        }

        tracing::debug!(%endpoint, "udp connection ready");
        Ok(Self {
            socket: Arc::new(socket),
            peer: endpoint,
            inbound: Inbound::Socket,
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            stats: StatsCounters::new(),
        })
    }

    /// Server-side connection built by the listener demux.
    fn accepted(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        inbound: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            socket,
            peer,
            inbound: Inbound::Queue(Mutex::new(inbound)),
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            stats: StatsCounters::new(),
        }
    }

    /// Local address of the underlying socket.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot report its address.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn check_open(&self) -> TransportResult<()> {
        if self.cancelled.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn send(&self, data: &[u8]) -> TransportResult<()> {
        self.check_open()?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge(data.len()));
        }
        let sent = match self.inbound {
            Inbound::Socket => self.socket.send(data).await?,
            Inbound::Queue(_) => self.socket.send_to(data, self.peer).await?,
        };
        self.stats.record_send(sent);
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Vec<u8>> {
        self.check_open()?;
        let data = match &self.inbound {
            Inbound::Socket => {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                tokio::select! {
                    res = self.socket.recv(&mut buf) => {
                        let n = res?;
                        buf.truncate(n);
                        buf
                    }
                    () = self.cancel_notify.notified() => return Err(TransportError::Closed),
                }
            }
            Inbound::Queue(rx) => {
                let mut rx = rx.lock().await;
                tokio::select! {
                    msg = rx.recv() => msg.ok_or(TransportError::Closed)?,
                    () = self.cancel_notify.notified() => return Err(TransportError::Closed),
                }
            }
        };
        if data.is_empty() {
            return Err(TransportError::EmptyDatagram);
        }
        self.stats.record_recv(data.len());
        Ok(data)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(peer = %self.peer, "udp connection cancelled");
        }
        self.cancel_notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

/// Bound UDP socket producing one [`UdpConnection`] per peer address.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    accept_rx: mpsc::Receiver<UdpConnection>,
    demux_task: tokio::task::JoinHandle<()>,
}

impl UdpListener {
    /// Bind the listener on `port` (all interfaces).
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the OS cannot bind the port.
    pub async fn bind(port: u16) -> TransportResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let socket = Arc::new(socket);

        let (accept_tx, accept_rx) = mpsc::channel(64);
        let demux_socket = Arc::clone(&socket);
        let demux_task = tokio::spawn(async move {
            demux_loop(demux_socket, accept_tx).await;
        });

        Ok(Self {
            socket,
            accept_rx,
            demux_task,
        })
    }
}

/// Route inbound datagrams to per-peer queues, creating a connection for
/// each new source address.
async fn demux_loop(socket: Arc<UdpSocket>, accept_tx: mpsc::Sender<UdpConnection>) {
    let mut peers: HashMap<SocketAddr, mpsc::Sender<Vec<u8>>> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "udp listener receive failed");
                return;
            }
        };
        let datagram = buf[..n].to_vec();

        if let Some(tx) = peers.get(&from) {
            if tx.send(datagram).await.is_ok() {
                continue;
            }
            // Receiver dropped: the conversation ended. Fall through and
            // start a fresh one for this address.
            peers.remove(&from);
            continue;
        }

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let conn = UdpConnection::accepted(Arc::clone(&socket), from, rx);
        if tx.send(datagram).await.is_err() || accept_tx.send(conn).await.is_err() {
            // Listener dropped; stop demultiplexing.
            return;
        }
        tracing::debug!(peer = %from, "accepted udp conversation");
        peers.insert(from, tx);
    }
}

#[async_trait]
impl Listener for UdpListener {
    type Conn = UdpConnection;

    async fn accept(&mut self) -> TransportResult<UdpConnection> {
        self.accept_rx.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.demux_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listener_pair() -> (UdpListener, SocketAddr) {
        let listener = UdpListener::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn datagram_roundtrip() {
        let (mut listener, addr) = listener_pair().await;
        let client = UdpConnection::connect(addr).await.unwrap();

        client.send(b"ping").await.unwrap();
        let server_conn = listener.accept().await.unwrap();
        assert_eq!(server_conn.recv().await.unwrap(), b"ping");

        server_conn.send(b"pong").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"pong");

        let stats = client.stats();
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.bytes_sent, 4);
    }

    #[tokio::test]
    async fn demux_separates_peers() {
        let (mut listener, addr) = listener_pair().await;
        let a = UdpConnection::connect(addr).await.unwrap();
        let b = UdpConnection::connect(addr).await.unwrap();

        a.send(b"from-a").await.unwrap();
        let conn_a = listener.accept().await.unwrap();
        b.send(b"from-b").await.unwrap();
        let conn_b = listener.accept().await.unwrap();

        assert_eq!(conn_a.recv().await.unwrap(), b"from-a");
        assert_eq!(conn_b.recv().await.unwrap(), b"from-b");
        assert_ne!(conn_a.peer_addr(), conn_b.peer_addr());

        // Later datagrams keep routing to the same conversation.
        a.send(b"again").await.unwrap();
        assert_eq!(conn_a.recv().await.unwrap(), b"again");
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_fails_operations() {
        let (mut listener, addr) = listener_pair().await;
        let client = UdpConnection::connect(addr).await.unwrap();
        client.send(b"x").await.unwrap();
        let conn = listener.accept().await.unwrap();

        conn.cancel();
        conn.cancel();
        assert!(conn.is_cancelled());
        assert!(matches!(conn.recv().await, Err(TransportError::Closed)));
        assert!(matches!(conn.send(b"y").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn cancel_wakes_pending_recv() {
        let (mut listener, addr) = listener_pair().await;
        let client = UdpConnection::connect(addr).await.unwrap();
        client.send(b"x").await.unwrap();
        let conn = Arc::new(listener.accept().await.unwrap());
        conn.recv().await.unwrap();

        let waiter = Arc::clone(&conn);
        let pending = tokio::spawn(async move { waiter.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        conn.cancel();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn oversized_send_rejected() {
        let (_listener, addr) = listener_pair().await;
        let client = UdpConnection::connect(addr).await.unwrap();
        let too_big = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            client.send(&too_big).await,
            Err(TransportError::DatagramTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn empty_datagram_surfaces_as_error() {
        let (mut listener, addr) = listener_pair().await;
        let client = UdpConnection::connect(addr).await.unwrap();

        client.send(b"").await.unwrap();
        let conn = listener.accept().await.unwrap();
        assert!(matches!(
            conn.recv().await,
            Err(TransportError::EmptyDatagram)
        ));
    }
}
