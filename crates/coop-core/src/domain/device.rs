//! Device identity and classification.
//!
//! A [`DeviceInfo`] is the immutable snapshot of a peer carried by every
//! discovery and pairing message.  It is never mutated after construction —
//! a re-announcement simply supersedes the previous snapshot.
//!
//! Peers split into two *device classes*: PC-like machines (desktop OSes)
//! and Android.  The pairing engine allows at most one connected peer per
//! class, so the class of a device decides which pairing slot it competes
//! for.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operating system identifier announced by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceOs {
    Linux = 0x01,
    Uos = 0x02,
    Windows = 0x03,
    MacOs = 0x04,
    Android = 0x05,
}

impl TryFrom<u8> for DeviceOs {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DeviceOs::Linux),
            0x02 => Ok(DeviceOs::Uos),
            0x03 => Ok(DeviceOs::Windows),
            0x04 => Ok(DeviceOs::MacOs),
            0x05 => Ok(DeviceOs::Android),
            _ => Err(()),
        }
    }
}

/// Grouping used to enforce the one-active-pairing-per-class invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Desktop operating systems: Linux, UOS, Windows, macOS.
    Pc,
    /// Android phones and tablets.
    Android,
}

impl DeviceOs {
    /// Returns the pairing class this operating system belongs to.
    pub fn device_class(self) -> DeviceClass {
        match self {
            DeviceOs::Android => DeviceClass::Android,
            _ => DeviceClass::Pc,
        }
    }
}

/// Immutable snapshot of a peer, as carried on the wire.
///
/// The `uuid` is transported as a string and must pass UUID-format
/// validation (see [`DeviceInfo::has_valid_uuid`]) before it is allowed to
/// touch the machine registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Globally unique machine identifier, generated once per installation.
    pub uuid: String,
    /// Human-readable hostname or display name.
    pub name: String,
    /// Operating system of the peer.
    pub os: DeviceOs,
}

impl DeviceInfo {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, os: DeviceOs) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            os,
        }
    }

    /// Whether the announced uuid parses as a real UUID.
    ///
    /// Discovery traffic is unauthenticated; a peer that announces a
    /// non-UUID identifier is dropped before it can pollute the registry.
    pub fn has_valid_uuid(&self) -> bool {
        Uuid::parse_str(&self.uuid).is_ok()
    }

    /// Whether this device belongs to the PC class.
    pub fn is_pc_machine(&self) -> bool {
        self.os.device_class() == DeviceClass::Pc
    }

    /// Whether this device is an Android device.
    pub fn is_android(&self) -> bool {
        self.os.device_class() == DeviceClass::Android
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
