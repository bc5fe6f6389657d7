//! Beacon wire format.
//!
//! A beacon is one JSON datagram on the discovery multicast group. It
//! names the service type and instance, the transport port the peer
//! listens on, and a TXT-style record map.

use crate::{DiscoveryError, Result, INFO_TXT_KEY, SERVICE_DOMAIN, SERVICE_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zimsync_core::DeviceInfo;

/// What a beacon is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    /// Periodic or reply announcement of a serving peer.
    Announce,
    /// A browser asking serving peers to announce themselves now.
    Probe,
}

/// One discovery datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    /// Announce or probe.
    pub kind: BeaconKind,
    /// Fully qualified service type, e.g. `_zimsync._udp.local.`.
    pub service: String,
    /// Instance name of the peer.
    pub name: String,
    /// Transport port the peer serves on.
    pub port: u16,
    /// TXT-style records; the `info` key holds serialized device info.
    #[serde(default)]
    pub txt: BTreeMap<String, String>,
}

impl Beacon {
    /// Announcement for a serving peer.
    #[must_use]
    pub fn announce(name: &str, port: u16, device_info: Option<&DeviceInfo>) -> Self {
        let mut txt = BTreeMap::new();
        if let Some(info) = device_info {
            if let Ok(blob) = serde_json::to_string(info) {
                txt.insert(INFO_TXT_KEY.to_owned(), blob);
            }
        }
        Self {
            kind: BeaconKind::Announce,
            service: qualified_service(),
            name: name.to_owned(),
            port,
            txt,
        }
    }

    /// Probe asking peers to announce themselves.
    #[must_use]
    pub fn probe(name: &str) -> Self {
        Self {
            kind: BeaconKind::Probe,
            service: qualified_service(),
            name: name.to_owned(),
            port: 0,
            txt: BTreeMap::new(),
        }
    }

    /// Whether this beacon belongs to the ZimSync service.
    #[must_use]
    pub fn is_zimsync(&self) -> bool {
        self.service == qualified_service()
    }

    /// Device info from the `info` TXT record, if present and well-formed.
    /// Missing or malformed records are not an error.
    #[must_use]
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.txt
            .get(INFO_TXT_KEY)
            .and_then(|blob| serde_json::from_str(blob).ok())
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DiscoveryError::Encode(e.to_string()))
    }

    /// Parse a datagram; `None` for anything that is not a ZimSync beacon.
    #[must_use]
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let beacon: Self = serde_json::from_slice(datagram).ok()?;
        beacon.is_zimsync().then_some(beacon)
    }
}

/// `_zimsync._udp.local.`
#[must_use]
pub fn qualified_service() -> String {
    format!("{SERVICE_TYPE}.{SERVICE_DOMAIN}")
}
