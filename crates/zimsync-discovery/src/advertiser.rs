//! Service advertisement: periodic beacons plus probe responses.

use crate::beacon::{Beacon, BeaconKind};
use crate::{multicast_socket, Result, BEACON_INTERVAL, DISCOVERY_PORT, MULTICAST_GROUP};
use std::net::SocketAddr;
use std::sync::Arc;
use zimsync_core::DeviceInfo;

/// Advertises this peer on the discovery group until dropped.
pub struct Advertiser {
    beacon_task: tokio::task::JoinHandle<()>,
    responder_task: tokio::task::JoinHandle<()>,
}

impl Advertiser {
    /// Start advertising `name`, serving on `transport_port`.
    ///
    /// Beacons repeat every [`BEACON_INTERVAL`]; probes from browsers are
    /// answered immediately with a unicast announcement.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn start(
        name: &str,
        transport_port: u16,
        device_info: Option<&DeviceInfo>,
    ) -> Result<Self> {
        Self::start_on(name, transport_port, device_info, DISCOVERY_PORT).await
    }

    /// Start advertising on a specific discovery port.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the multicast socket cannot be set up.
    pub async fn start_on(
        name: &str,
        transport_port: u16,
        device_info: Option<&DeviceInfo>,
        discovery_port: u16,
    ) -> Result<Self> {
        let socket = Arc::new(multicast_socket(discovery_port).await?);
        let announcement = Beacon::announce(name, transport_port, device_info).encode()?;
        let group: SocketAddr = (MULTICAST_GROUP, discovery_port).into();

        let beacon_socket = Arc::clone(&socket);
        let beacon_frame = announcement.clone();
        let beacon_task = tokio::spawn(async move {
            loop {
                if let Err(err) = beacon_socket.send_to(&beacon_frame, group).await {
                    tracing::warn!(%err, "beacon send failed");
                }
                tokio::time::sleep(BEACON_INTERVAL).await;
            }
        });

        let responder_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Some(beacon) = Beacon::parse(&buf[..n]) else {
                    continue;
                };
                if beacon.kind == BeaconKind::Probe {
                    tracing::debug!(%from, prober = %beacon.name, "answering probe");
                    let _ = socket.send_to(&announcement, from).await;
                }
            }
        });

        tracing::info!(name, transport_port, "advertising service");
        Ok(Self {
            beacon_task,
            responder_task,
        })
    }

    /// Stop advertising.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.beacon_task.abort();
        self.responder_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use std::time::Duration;
    use uuid::Uuid;
    use zimsync_core::Platform;

    // Exercises real multicast; loopback multicast is not available in
    // every test environment.
    #[tokio::test]
    #[ignore = "requires a multicast-capable interface"]
    async fn browser_sees_advertiser() {
        let info = DeviceInfo {
            id: Uuid::new_v4(),
            name: "Studio".into(),
            platform: Platform::Linux,
            version: "1.0.0".into(),
        };
        let port = 15_757;
        let _advertiser = Advertiser::start_on("Studio", 8080, Some(&info), port)
            .await
            .unwrap();

        let peers = Browser::browse_on(Duration::from_secs(2), port)
            .await
            .unwrap();
        assert!(peers.iter().any(|p| p.name == "Studio"));
    }
}
