//! End-to-end protocol tests over loopback UDP.
//!
//! Each test runs a real server task on an ephemeral port and drives it
//! with either the pull-model client or hand-encoded datagrams.

use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;
use zimsync_core::{
    codec, DeviceInfo, ErrorCode, FileRequestPayload, Packet, Platform, ServerOptions, SyncClient,
    SyncError, SyncServer, PACKET_HEADER_SIZE, PROTOCOL_VERSION,
};
use zimsync_files::hash_bytes;
use zimsync_transport::{Connection, Listener, UdpConnection, UdpListener};

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn studio_device() -> DeviceInfo {
    DeviceInfo {
        id: Uuid::new_v4(),
        name: "Studio".into(),
        platform: Platform::MacOs,
        version: "1.0.0".into(),
    }
}

/// Start a server over `shared_dir` and return its endpoint.
async fn spawn_server(shared_dir: &Path, options: ServerOptions) -> SocketAddr {
    let listener = UdpListener::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(SyncServer::new(
        studio_device(),
        shared_dir.to_path_buf(),
        options,
    ));
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn client_for(endpoint: SocketAddr) -> SyncClient<UdpConnection> {
    let conn = UdpConnection::connect(endpoint).await.unwrap();
    SyncClient::new(conn, DeviceInfo::new("Laptop"))
}

#[tokio::test]
async fn discover_returns_announce_then_empty_catalog() {
    let dir = TempDir::new().unwrap();
    let endpoint = spawn_server(
        dir.path(),
        ServerOptions {
            available_space: 1_000_000_000,
            ..ServerOptions::default()
        },
    )
    .await;

    let mut client = client_for(endpoint).await;
    let (announce, list) = client.discover().await.unwrap();

    assert_eq!(announce.device_info.name, "Studio");
    assert_eq!(announce.available_space, 1_000_000_000);
    assert_eq!(
        announce.supported_features,
        vec!["compression", "chunking", "resume"]
    );
    assert!(list.files.is_empty());
    assert_eq!(list.total_size, 0);
    client.shutdown().await;
}

#[tokio::test]
async fn echo_fallback_answers_plain_text() {
    let dir = TempDir::new().unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let conn = UdpConnection::connect(endpoint).await.unwrap();
    conn.send(b"Hello ZimSync!\n").await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"ZimSync Echo: Hello ZimSync!\n");
    conn.cancel();
}

#[tokio::test]
async fn five_mebibyte_transfer_verifies_end_to_end() {
    let dir = TempDir::new().unwrap();
    let content = random_bytes(5 * 1024 * 1024, 11);
    tokio::fs::write(dir.path().join("session.wav"), &content)
        .await
        .unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let mut client = client_for(endpoint).await;
    let (_, list) = client.discover().await.unwrap();
    assert_eq!(list.files.len(), 1);
    let metadata = &list.files[0];
    assert_eq!(metadata.size, content.len() as u64);
    assert_eq!(metadata.checksum, hash_bytes(&content));

    let out_dir = TempDir::new().unwrap();
    let path = client.download(metadata, out_dir.path()).await.unwrap();

    let received = tokio::fs::read(&path).await.unwrap();
    assert_eq!(hash_bytes(&received), metadata.checksum);
    assert_eq!(received, content);
    client.shutdown().await;
}

#[tokio::test]
async fn unknown_file_id_surfaces_peer_404() {
    let dir = TempDir::new().unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let mut client = client_for(endpoint).await;
    client.discover().await.unwrap();

    let ghost = zimsync_files::FileMetadata {
        id: Uuid::new_v4(),
        path: "ghost.wav".into(),
        size: 1_000,
        modified_at: 0,
        checksum: [0; 32],
        audio: None,
    };
    let out_dir = TempDir::new().unwrap();
    let result = client.download(&ghost, out_dir.path()).await;

    match result {
        Err(SyncError::PeerError { code, message }) => {
            assert_eq!(code, ErrorCode::FileNotFound);
            assert_eq!(message, "File not found");
        }
        other => panic!("expected peer 404, got {other:?}"),
    }
    assert!(!out_dir.path().join("ghost.wav").exists());
    client.shutdown().await;
}

#[tokio::test]
async fn mp3_chunks_travel_uncompressed() {
    let dir = TempDir::new().unwrap();
    // Zero-filled content compresses extremely well, so a present
    // original_size would prove the policy failed.
    tokio::fs::write(dir.path().join("song.mp3"), vec![0u8; 50_000])
        .await
        .unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let mut client = client_for(endpoint).await;
    let (_, list) = client.discover().await.unwrap();
    let file_id = list.files[0].id;
    client.shutdown().await;

    // Hand-rolled request so the raw FileData payload is observable.
    let conn = UdpConnection::connect(endpoint).await.unwrap();
    let request = Packet::FileRequest(FileRequestPayload {
        file_id,
        start_offset: 0,
        chunk_size: 32_768,
        compression_type: None,
    });
    // Fresh conversation: re-discover before requesting.
    let discover = Packet::Discover(zimsync_core::DiscoverPayload {
        device_id: Uuid::new_v4(),
        timestamp: 0,
    });
    conn.send(&codec::encode_packet(&discover, 0).unwrap())
        .await
        .unwrap();
    let _announce = conn.recv().await.unwrap();
    let _list = conn.recv().await.unwrap();

    conn.send(&codec::encode_packet(&request, 1).unwrap())
        .await
        .unwrap();
    let datagram = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .unwrap()
        .unwrap();
    let (_, packet) = codec::decode_packet(&datagram).unwrap();
    let Packet::FileData(chunk) = packet else {
        panic!("expected file data, got {packet:?}");
    };
    assert_eq!(chunk.original_size, None);
    assert_eq!(chunk.data.len(), 32_768);
    assert_eq!(chunk.total_chunks, 2);
    conn.cancel();
}

#[tokio::test]
async fn newer_protocol_version_rejected_with_415() {
    let dir = TempDir::new().unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let conn = UdpConnection::connect(endpoint).await.unwrap();
    let discover = Packet::Discover(zimsync_core::DiscoverPayload {
        device_id: Uuid::new_v4(),
        timestamp: 0,
    });
    let mut datagram = codec::encode_packet(&discover, 0).unwrap();
    datagram[4] = PROTOCOL_VERSION + 1;

    conn.send(&datagram).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .unwrap()
        .unwrap();
    let (_, packet) = codec::decode_packet(&reply).unwrap();
    let Packet::Error(error) = packet else {
        panic!("expected error packet, got {packet:?}");
    };
    assert_eq!(error.code, ErrorCode::UnsupportedFormat);
    assert_eq!(error.message, "unsupported version");
    conn.cancel();
}

#[tokio::test]
async fn push_lands_file_in_inbound_directory() {
    let shared = TempDir::new().unwrap();
    let inbound = TempDir::new().unwrap();
    let endpoint = spawn_server(
        shared.path(),
        ServerOptions {
            inbound_dir: Some(inbound.path().to_path_buf()),
            ..ServerOptions::default()
        },
    )
    .await;

    let source_dir = TempDir::new().unwrap();
    let content = random_bytes(100_000, 12);
    let source = source_dir.path().join("bounce.wav");
    tokio::fs::write(&source, &content).await.unwrap();

    let mut client = client_for(endpoint).await;
    client.discover().await.unwrap();
    client.upload(&source).await.unwrap();
    client.shutdown().await;

    let landed = inbound.path().join("bounce.wav");
    assert_eq!(tokio::fs::read(&landed).await.unwrap(), content);
}

#[tokio::test]
async fn corrupted_datagram_gets_checksum_error_not_echo() {
    let dir = TempDir::new().unwrap();
    let endpoint = spawn_server(dir.path(), ServerOptions::default()).await;

    let conn = UdpConnection::connect(endpoint).await.unwrap();
    let discover = Packet::Discover(zimsync_core::DiscoverPayload {
        device_id: Uuid::new_v4(),
        timestamp: 0,
    });
    let mut datagram = codec::encode_packet(&discover, 0).unwrap();
    // Flip one payload bit: the frame stays well-formed, so no echo.
    datagram[PACKET_HEADER_SIZE] ^= 0x01;

    conn.send(&datagram).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .unwrap()
        .unwrap();
    let (_, packet) = codec::decode_packet(&reply).unwrap();
    let Packet::Error(error) = packet else {
        panic!("expected error packet, got {packet:?}");
    };
    assert_eq!(error.code, ErrorCode::ChecksumMismatch);
    conn.cancel();
}
