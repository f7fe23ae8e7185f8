//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection lifecycle of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Discovered,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionStatus {
    /// Returns true if `next` is reachable from `self` in one step.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, Connected)
                | (Connecting, Discovered)
                | (Connected, Disconnecting)
                | (Connected, Discovered)
                | (Disconnecting, Discovered)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Why a device last fell back to `discovered`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    #[default]
    None,
    Manual,
    Unexpected,
    Timeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Manual => "manual",
            Self::Unexpected => "unexpected",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Advertisement payload kept alongside a device record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementDetails {
    /// Manufacturer data keyed by company identifier
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs
    pub service_uuids: Vec<Uuid>,
}

/// One advertisement frame as delivered by a radio backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Normalized radio address
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
    pub details: AdvertisementDetails,
}

impl Advertisement {
    /// Returns true if the advertisement lists the given service.
    pub fn exposes_service(&self, service: &Uuid) -> bool {
        self.details.service_uuids.contains(service)
    }
}

/// Fields the scanner refreshes on every matching advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub name: String,
    pub rssi: i16,
    pub seen_at: DateTime<Utc>,
    pub details: AdvertisementDetails,
}

impl Discovery {
    pub fn from_advertisement(adv: &Advertisement, seen_at: DateTime<Utc>) -> Self {
        Self {
            name: adv.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            rssi: adv.rssi.unwrap_or(0),
            seen_at,
            details: adv.details.clone(),
        }
    }
}

/// Represents a discovered Hublink device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Radio address, unique key of the registry
    pub address: String,
    /// Advertised name
    pub name: String,
    /// Last seen signal strength (dBm)
    pub rssi: i16,
    /// When the device was first seen in this process
    pub first_discovered_at: DateTime<Utc>,
    /// When the device was last seen advertising
    pub discovered_at: DateTime<Utc>,
    pub advertisement_data: AdvertisementDetails,
    pub connection_status: ConnectionStatus,
    pub disconnect_reason: DisconnectReason,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Raw text of the last status characteristic read
    pub node_data_raw: Option<String>,
    /// Upload destination reported by the node
    pub upload_path: Option<String>,
}

impl DeviceRecord {
    pub fn new(address: &str, discovery: Discovery) -> Self {
        Self {
            address: address.to_string(),
            name: discovery.name,
            rssi: discovery.rssi,
            first_discovered_at: discovery.seen_at,
            discovered_at: discovery.seen_at,
            advertisement_data: discovery.details,
            connection_status: ConnectionStatus::Discovered,
            disconnect_reason: DisconnectReason::None,
            connected_at: None,
            disconnected_at: None,
            node_data_raw: None,
            upload_path: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}

/// A time-boxed discovery session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Monotonic session number within this process
    pub id: u64,
    /// Case-insensitive substring matched against advertised names
    pub name_filter: String,
    pub started_at: DateTime<Utc>,
    pub active: bool,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    /// Returns true if the advertisement belongs to a Hublink node matching the filter.
    pub fn matches(&self, adv: &Advertisement, service: &Uuid) -> bool {
        let Some(name) = adv.name.as_deref() else {
            return false;
        };
        name.to_lowercase()
            .contains(&self.name_filter.to_lowercase())
            && adv.exposes_service(service)
    }
}

/// Scanner status as exposed to the surrounding application
#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub is_scanning: bool,
    /// False when no radio adapter could be acquired
    pub adapter_available: bool,
    pub scan_start_time: Option<DateTime<Utc>>,
    pub name_filter: Option<String>,
    pub discovered_count: usize,
    pub connected_count: usize,
    pub devices: Vec<DeviceRecord>,
}

/// Characteristics exposed by the Hublink service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicRole {
    Status,
    Command,
    Filename,
    FileTransfer,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 4] = [
        CharacteristicRole::Status,
        CharacteristicRole::Command,
        CharacteristicRole::Filename,
        CharacteristicRole::FileTransfer,
    ];

    pub fn uuid(self) -> Uuid {
        use super::constants::*;
        match self {
            Self::Status => UUID_STATUS_CHAR,
            Self::Command => UUID_COMMAND_CHAR,
            Self::Filename => UUID_FILENAME_CHAR,
            Self::FileTransfer => UUID_FILE_TRANSFER_CHAR,
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == *uuid)
    }
}

/// How a live link was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLoss {
    /// Keep-alive check found the link gone
    Timeout,
    /// The adapter reported a disconnect nobody asked for
    Unexpected,
}

impl From<LinkLoss> for DisconnectReason {
    fn from(loss: LinkLoss) -> Self {
        match loss {
            LinkLoss::Timeout => DisconnectReason::Timeout,
            LinkLoss::Unexpected => DisconnectReason::Unexpected,
        }
    }
}
