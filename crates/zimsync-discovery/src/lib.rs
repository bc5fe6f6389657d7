//! # ZimSync Discovery
//!
//! LAN service advertisement and browsing for ZimSync peers.
//!
//! Peers announce the service type `_zimsync._udp` in `local.` with a
//! TXT-style record map whose `info` key carries a serialized
//! [`DeviceInfo`]. On the wire this is UDP multicast beaconing: an
//! advertiser beacons periodically and answers probes; a browser probes
//! once and collects announcements into a peer set with quiet-interval
//! expiry. Browsers tolerate missing or malformed `info` records and
//! surface `device_info = None` for such peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advertiser;
pub mod beacon;
pub mod browser;

pub use advertiser::Advertiser;
pub use beacon::{Beacon, BeaconKind};
pub use browser::{Browser, DiscoveredPeer};

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// DNS-SD service type ZimSync peers advertise.
pub const SERVICE_TYPE: &str = "_zimsync._udp";

/// DNS-SD domain.
pub const SERVICE_DOMAIN: &str = "local.";

/// TXT record key carrying the serialized device info blob.
pub const INFO_TXT_KEY: &str = "info";

/// Multicast group the beacons travel on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 90, 83);

/// UDP port for discovery beacons.
pub const DISCOVERY_PORT: u16 = 5757;

/// Interval between announcements.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(4);

/// A peer is dropped from the browse set after this long without a beacon.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(16);

/// Errors from discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The multicast socket could not be set up.
    #[error("multicast bind failed: {0}")]
    BindFailed(String),

    /// A beacon could not be serialized.
    #[error("beacon encode failed: {0}")]
    Encode(String),

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

pub(crate) async fn multicast_socket(port: u16) -> Result<tokio::net::UdpSocket> {
    let std_socket = std::net::UdpSocket::bind(("0.0.0.0", port))
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    std_socket
        .join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    std_socket
        .set_multicast_loop_v4(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    std_socket
        .set_multicast_ttl_v4(1)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    std_socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    tokio::net::UdpSocket::from_std(std_socket).map_err(DiscoveryError::Io)
}
