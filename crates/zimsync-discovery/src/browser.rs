//! Service browsing: probe the group and collect announcements.

use crate::beacon::{Beacon, BeaconKind};
use crate::{multicast_socket, Result, DISCOVERY_PORT, MULTICAST_GROUP, PEER_TIMEOUT};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use zimsync_core::DeviceInfo;

/// A peer seen on the discovery group.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    /// Advertised instance name.
    pub name: String,
    /// Transport endpoint: the beacon's source address with its advertised
    /// serving port.
    pub endpoint: SocketAddr,
    /// Decoded `info` TXT record, when present and well-formed.
    pub device_info: Option<DeviceInfo>,
    /// When the last beacon from this peer arrived.
    pub last_seen: Instant,
}

impl DiscoveredPeer {
    fn from_beacon(beacon: &Beacon, source: SocketAddr) -> Self {
        Self {
            name: beacon.name.clone(),
            endpoint: SocketAddr::new(source.ip(), beacon.port),
            device_info: beacon.device_info(),
            last_seen: Instant::now(),
        }
    }

    /// Whether the peer has gone quiet past the timeout.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() >= PEER_TIMEOUT
    }
}

/// One-shot and continuous browsing over the discovery group.
pub struct Browser {
    socket: UdpSocket,
    peers: HashMap<SocketAddr, DiscoveredPeer>,
}

impl Browser {
    /// Join the discovery group and send one probe.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn start(instance_name: &str) -> Result<Self> {
        Self::start_on(instance_name, DISCOVERY_PORT).await
    }

    /// Join the discovery group on a specific port and send one probe.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn start_on(instance_name: &str, discovery_port: u16) -> Result<Self> {
        let socket = multicast_socket(discovery_port).await?;
        let probe = Beacon::probe(instance_name).encode()?;
        let group: SocketAddr = (MULTICAST_GROUP, discovery_port).into();
        socket.send_to(&probe, group).await?;
        Ok(Self {
            socket,
            peers: HashMap::new(),
        })
    }

    /// Wait for the next new-or-updated peer, up to `timeout`. Returns
    /// `None` when the window elapses quietly. Stale peers are pruned as a
    /// side effect.
    pub async fn next_peer(&mut self, timeout: Duration) -> Option<DiscoveredPeer> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; 8192];
        loop {
            self.peers.retain(|_, peer| !peer.is_stale());

            let remaining = deadline.checked_duration_since(Instant::now())?;
            let Ok(received) = tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await
            else {
                return None;
            };
            let Ok((n, from)) = received else {
                return None;
            };
            let Some(beacon) = Beacon::parse(&buf[..n]) else {
                continue;
            };
            if beacon.kind != BeaconKind::Announce {
                continue;
            }

            let peer = DiscoveredPeer::from_beacon(&beacon, from);
            let is_new = !self.peers.contains_key(&peer.endpoint);
            self.peers.insert(peer.endpoint, peer.clone());
            if is_new {
                tracing::debug!(name = %peer.name, endpoint = %peer.endpoint, "peer discovered");
                return Some(peer);
            }
        }
    }

    /// Every live peer seen so far.
    #[must_use]
    pub fn peers(&self) -> Vec<DiscoveredPeer> {
        self.peers.values().cloned().collect()
    }

    /// Browse for `duration` and return the peers seen.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn browse(duration: Duration) -> Result<Vec<DiscoveredPeer>> {
        Self::browse_on(duration, DISCOVERY_PORT).await
    }

    /// Browse on a specific discovery port for `duration`.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn browse_on(duration: Duration, discovery_port: u16) -> Result<Vec<DiscoveredPeer>> {
        let mut browser = Self::start_on("browser", discovery_port).await?;
        let deadline = Instant::now() + duration;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            if browser.next_peer(remaining).await.is_none() {
                break;
            }
        }
        Ok(browser.peers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use zimsync_core::Platform;

    #[test]
    fn peer_from_beacon_uses_advertised_port() {
        let info = DeviceInfo {
            id: Uuid::new_v4(),
            name: "Studio".into(),
            platform: Platform::MacOs,
            version: "1.0.0".into(),
        };
        let beacon = Beacon::announce("Studio", 8080, Some(&info));
        let source: SocketAddr = "192.168.1.20:5757".parse().unwrap();

        let peer = DiscoveredPeer::from_beacon(&beacon, source);
        assert_eq!(peer.endpoint, "192.168.1.20:8080".parse().unwrap());
        assert_eq!(peer.name, "Studio");
        assert_eq!(peer.device_info, Some(info));
        assert!(!peer.is_stale());
    }

    #[test]
    fn peer_without_info_is_accepted() {
        let beacon = Beacon::announce("Bare", 9000, None);
        let source: SocketAddr = "10.0.0.5:5757".parse().unwrap();
        let peer = DiscoveredPeer::from_beacon(&beacon, source);
        assert_eq!(peer.device_info, None);
    }
}
