//! Sync server: one listener, one cooperative task per peer conversation.
//!
//! Each accepted connection gets its own [`SyncEngine`]; all conversation
//! state stays inside that task. The only state crossing task boundaries
//! is the shared-file catalog, which is swapped atomically on refresh.

use crate::codec;
use crate::device::DeviceInfo;
use crate::engine::{EngineOptions, SyncEngine};
use crate::error::{CodecError, Result, SyncError};
use crate::packet::{ErrorCode, ErrorPayload, Packet, PacketFlags};
use crate::PACKET_HEADER_SIZE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use zimsync_files::Catalog;

/// Prefix of the plain-text diagnostic reply.
const ECHO_PREFIX: &str = "ZimSync Echo: ";

/// Handle to the shared-file catalog.
///
/// Snapshots are immutable; a refresh scans the shared directory into a
/// fresh snapshot and swaps it in whole, so peer tasks holding an older
/// snapshot keep a consistent view.
#[derive(Clone)]
pub struct SharedCatalog {
    dir: PathBuf,
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl SharedCatalog {
    /// Catalog handle over `dir`, initially empty until the first refresh.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            current: Arc::new(RwLock::new(Arc::new(Catalog::default()))),
        }
    }

    /// The shared directory being offered.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Rescan the shared directory and swap in the fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the shared directory is gone, or the scan
    /// IO failure.
    pub async fn refresh(&self) -> Result<Arc<Catalog>> {
        let mut fresh = Catalog::scan(&self.dir).await?;
        // Keep handles stable for unchanged files: peers hold offered IDs
        // across repeated discovers.
        fresh.adopt_ids(&*self.snapshot().await);
        let fresh = Arc::new(fresh);
        *self.current.write().await = Arc::clone(&fresh);
        tracing::debug!(
            dir = %self.dir.display(),
            files = fresh.len(),
            bytes = fresh.total_size(),
            "catalog refreshed"
        );
        Ok(fresh)
    }

    /// The current snapshot without rescanning.
    pub async fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&*self.current.read().await)
    }
}

/// Server tunables.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Free space advertised to peers.
    pub available_space: i64,
    /// Where pushed files land; defaults to the shared directory.
    pub inbound_dir: Option<PathBuf>,
    /// Answer undecodable UTF-8 datagrams with a plain-text echo.
    pub echo_fallback: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            available_space: 1_000_000_000,
            inbound_dir: None,
            echo_fallback: true,
        }
    }
}

/// The ZimSync server: shared catalog plus per-peer conversation tasks.
pub struct SyncServer {
    device: DeviceInfo,
    catalog: SharedCatalog,
    options: ServerOptions,
}

impl SyncServer {
    /// Server offering the immediate regular files of `shared_dir`.
    #[must_use]
    pub fn new(device: DeviceInfo, shared_dir: PathBuf, options: ServerOptions) -> Self {
        Self {
            device,
            catalog: SharedCatalog::new(shared_dir),
            options,
        }
    }

    /// The catalog handle, for out-of-band inspection.
    #[must_use]
    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Accept conversations until the listener shuts down.
    ///
    /// # Errors
    ///
    /// Returns the listener failure that ended the accept loop.
    pub async fn run<L>(self: Arc<Self>, mut listener: L) -> Result<()>
    where
        L: zimsync_transport::Listener,
        L::Conn: zimsync_transport::Connection + 'static,
    {
        tracing::info!(
            device = %self.device.name,
            dir = %self.catalog.directory().display(),
            "server accepting peers"
        );
        loop {
            let conn = listener.accept().await.map_err(SyncError::from)?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_connection(conn).await;
            });
        }
    }

    /// Drive one peer conversation to completion.
    ///
    /// Transport errors end the conversation: sessions are dropped, partial
    /// receives discarded, and the connection cancelled.
    pub async fn serve_connection<C>(self: Arc<Self>, conn: C)
    where
        C: zimsync_transport::Connection,
    {
        let peer = conn.peer_addr();
        tracing::debug!(?peer, "conversation started");

        let engine_options = EngineOptions {
            available_space: self.options.available_space,
            inbound_dir: self
                .options
                .inbound_dir
                .clone()
                .unwrap_or_else(|| self.catalog.directory().to_path_buf()),
        };
        let mut engine = SyncEngine::new(self.device.clone(), self.catalog.clone(), engine_options);

        loop {
            let datagram = match conn.recv().await {
                Ok(datagram) => datagram,
                Err(zimsync_transport::TransportError::EmptyDatagram) => continue,
                Err(err) => {
                    tracing::debug!(?peer, %err, "conversation ended");
                    break;
                }
            };

            match codec::decode_packet(&datagram) {
                Ok((header, packet)) => {
                    let responses = match engine.handle_packet(&header, packet).await {
                        Ok(responses) => responses,
                        Err(err) => {
                            tracing::warn!(?peer, %err, "dropping packet after handler failure");
                            continue;
                        }
                    };
                    for (packet, flags) in responses {
                        if self.send_response(&conn, &mut engine, &packet, flags).await.is_err() {
                            engine.abort().await;
                            conn.cancel();
                            return;
                        }
                    }
                }
                Err(CodecError::UnsupportedVersion(version)) => {
                    tracing::warn!(?peer, version, "dropping peer with newer protocol");
                    let error = Packet::Error(ErrorPayload::new(
                        ErrorCode::UnsupportedFormat,
                        "unsupported version",
                    ));
                    let _ = self
                        .send_response(&conn, &mut engine, &error, PacketFlags::empty())
                        .await;
                    break;
                }
                Err(CodecError::ChecksumMismatch) => {
                    tracing::warn!(?peer, "payload checksum mismatch");
                    let error = Packet::Error(ErrorPayload::new(
                        ErrorCode::ChecksumMismatch,
                        "payload checksum mismatch",
                    ));
                    if self
                        .send_response(&conn, &mut engine, &error, PacketFlags::empty())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    if !self.try_echo(&conn, &datagram).await {
                        tracing::debug!(?peer, %err, "dropping undecodable datagram");
                    }
                }
            }
        }

        engine.abort().await;
        conn.cancel();
    }

    async fn send_response<C>(
        &self,
        conn: &C,
        engine: &mut SyncEngine,
        packet: &Packet,
        flags: PacketFlags,
    ) -> Result<()>
    where
        C: zimsync_transport::Connection,
    {
        let datagram = engine.encode_response(packet, flags)?;
        conn.send(&datagram).await.map_err(SyncError::from)
    }

    /// Plain-text diagnostic echo for datagrams that never were packets.
    ///
    /// Applies only when the header itself is undecodable (too short or
    /// wrong magic) and the bytes are valid UTF-8; well-formed frames that
    /// fail later stages never echo.
    async fn try_echo<C>(&self, conn: &C, datagram: &[u8]) -> bool
    where
        C: zimsync_transport::Connection,
    {
        if !self.options.echo_fallback {
            return false;
        }
        let framed = datagram.len() >= PACKET_HEADER_SIZE
            && datagram[0..4] == crate::PROTOCOL_MAGIC.to_be_bytes();
        if framed {
            return false;
        }
        let Ok(text) = std::str::from_utf8(datagram) else {
            return false;
        };
        let reply = format!("{ECHO_PREFIX}{}\n", text.trim_end_matches('\n'));
        conn.send(reply.as_bytes()).await.is_ok()
    }
}
