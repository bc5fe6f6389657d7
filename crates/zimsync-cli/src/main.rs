//! ZimSync command-line front-end.
//!
//! A thin adapter over the core: browse the LAN for peers, serve a shared
//! directory, poke a server with a diagnostic datagram or a discover, and
//! fetch files from a peer's catalog.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use zimsync_core::{DeviceInfo, ServerOptions, SyncClient, SyncServer};
use zimsync_discovery::{Advertiser, Browser};
use zimsync_transport::{Connection, UdpConnection, UdpListener};

/// Diagnostic payload for the `test` subcommand.
const TEST_MESSAGE: &[u8] = b"Hello from ZimSync!";

/// ZimSync - LAN file sync for audio workflows
#[derive(Parser)]
#[command(name = "zimsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse the LAN for ZimSync peers
    Discover {
        /// How long to browse, in seconds
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },

    /// Share a directory until interrupted
    Serve {
        /// UDP port to listen on
        #[arg(short, long, default_value_t = zimsync_core::DEFAULT_PORT)]
        port: u16,

        /// Directory whose files are shared
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,

        /// Device name announced to peers
        #[arg(short, long, default_value = "ZimSync")]
        name: String,
    },

    /// Send a diagnostic datagram and print the reply
    Test {
        /// Server host
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = zimsync_core::DEFAULT_PORT)]
        port: u16,
    },

    /// Probe a peer with a discover and print the first responses
    Send {
        /// File to offer
        file: PathBuf,

        /// Peer host
        host: String,

        /// Peer port
        #[arg(short, long, default_value_t = zimsync_core::DEFAULT_PORT)]
        port: u16,
    },

    /// Download a named file from a peer's catalog
    Fetch {
        /// Basename of the file in the peer's catalog
        file: String,

        /// Peer host
        host: String,

        /// Peer port
        #[arg(short, long, default_value_t = zimsync_core::DEFAULT_PORT)]
        port: u16,

        /// Directory to write the file into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Discover { timeout } => discover(timeout).await,
        Commands::Serve {
            port,
            directory,
            name,
        } => serve(port, directory, name).await,
        Commands::Test { host, port } => test(&host, port).await,
        Commands::Send { file, host, port } => send(file, &host, port).await,
        Commands::Fetch {
            file,
            host,
            port,
            output,
        } => fetch(&file, &host, port, output).await,
    }
}

/// Browse the discovery group and print every peer seen.
async fn discover(timeout: u64) -> anyhow::Result<()> {
    let peers = Browser::browse(Duration::from_secs(timeout))
        .await
        .context("browsing failed")?;

    if peers.is_empty() {
        println!("No peers found in {timeout}s");
        return Ok(());
    }
    for peer in peers {
        match &peer.device_info {
            Some(info) => println!(
                "{} @ {} ({:?}, v{})",
                peer.name, peer.endpoint, info.platform, info.version
            ),
            None => println!("{} @ {}", peer.name, peer.endpoint),
        }
    }
    Ok(())
}

/// Run the server and advertise it until ctrl-c.
async fn serve(port: u16, directory: PathBuf, name: String) -> anyhow::Result<()> {
    if !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }

    let device = DeviceInfo::new(&name);
    let listener = UdpListener::bind(port)
        .await
        .with_context(|| format!("cannot bind UDP port {port}"))?;
    let _advertiser = Advertiser::start(&name, port, Some(&device))
        .await
        .context("cannot advertise service")?;

    let server = Arc::new(SyncServer::new(
        device,
        directory.clone(),
        ServerOptions::default(),
    ));
    println!("Serving {} on UDP {port} as \"{name}\"", directory.display());

    tokio::select! {
        result = server.run(listener) => result.context("server failed")?,
        _ = tokio::signal::ctrl_c() => println!("\nInterrupted"),
    }
    Ok(())
}

/// Send the literal diagnostic bytes and print whatever comes back.
async fn test(host: &str, port: u16) -> anyhow::Result<()> {
    let conn = connect(host, port).await?;
    conn.send(TEST_MESSAGE)
        .await
        .context("send failed")?;
    let reply = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .context("no reply within 5s")?
        .context("receive failed")?;
    print!("{}", String::from_utf8_lossy(&reply));
    conn.cancel();
    Ok(())
}

/// Open a connection, send a discover, and print the first responses.
async fn send(file: PathBuf, host: &str, port: u16) -> anyhow::Result<()> {
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }

    let conn = connect(host, port).await?;
    let mut client = SyncClient::new(conn, DeviceInfo::new(hostname()));

    let (announce, list) = client.discover().await.context("discover failed")?;
    println!(
        "Peer \"{}\" ({:?}, v{}), {} bytes free",
        announce.device_info.name,
        announce.device_info.platform,
        announce.device_info.version,
        announce.available_space
    );
    println!("Shares {} file(s), {} bytes total", list.files.len(), list.total_size);
    for metadata in list.files.iter().take(5) {
        println!("  {} ({} bytes)", metadata.path, metadata.size);
    }
    client.shutdown().await;
    Ok(())
}

/// Pull one named file out of the peer's catalog.
async fn fetch(file: &str, host: &str, port: u16, output: PathBuf) -> anyhow::Result<()> {
    let conn = connect(host, port).await?;
    let mut client = SyncClient::new(conn, DeviceInfo::new(hostname()));

    let (_, list) = client.discover().await.context("discover failed")?;
    let Some(metadata) = list.files.iter().find(|m| m.path == file) else {
        bail!("peer does not share {file:?}");
    };

    let path = client
        .download(metadata, &output)
        .await
        .with_context(|| format!("Transfer failed: {file}"))?;
    println!("Fetched {} ({} bytes)", path.display(), metadata.size);
    client.shutdown().await;
    Ok(())
}

async fn connect(host: &str, port: u16) -> anyhow::Result<UdpConnection> {
    let endpoint: SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))?;
    UdpConnection::connect(endpoint)
        .await
        .with_context(|| format!("cannot connect to {endpoint}"))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "zimsync-cli".to_owned())
}
