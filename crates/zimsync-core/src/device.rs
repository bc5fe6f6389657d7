//! Device identity exchanged during discovery and announcement.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform tag carried in [`DeviceInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// macOS desktop.
    #[serde(rename = "macOS")]
    MacOs,
    /// iOS handset.
    #[serde(rename = "iOS")]
    Ios,
    /// iPadOS tablet.
    #[serde(rename = "iPadOS")]
    IPadOs,
    /// Linux host.
    #[serde(rename = "linux")]
    Linux,
    /// Windows host.
    #[serde(rename = "windows")]
    Windows,
}

impl Platform {
    /// Platform of the running host.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// Identity of a peer device. Produced once at startup and immutable
/// thereafter; travels in announce packets and discovery TXT records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub id: Uuid,
    /// Human-readable device name.
    pub name: String,
    /// Platform tag.
    pub platform: Platform,
    /// Software version string.
    pub version: String,
}

impl DeviceInfo {
    /// Build the identity for this host.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            platform: Platform::current(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_serializes_with_vendor_casing() {
        assert_eq!(
            serde_json::to_string(&Platform::MacOs).unwrap(),
            "\"macOS\""
        );
        assert_eq!(
            serde_json::to_string(&Platform::IPadOs).unwrap(),
            "\"iPadOS\""
        );
    }

    #[test]
    fn device_info_json_roundtrip() {
        let info = DeviceInfo {
            id: Uuid::new_v4(),
            name: "Studio".into(),
            platform: Platform::MacOs,
            version: "1.0.0".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
