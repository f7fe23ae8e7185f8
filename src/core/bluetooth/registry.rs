//! Device registry: one record per radio address for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use crate::core::bluetooth::types::{ConnectionStatus, DeviceRecord, DisconnectReason, Discovery};
use crate::error::{SessionError, SessionResult};

/// Whether an upsert created a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Refreshed,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record or refreshes its discovery fields. Connection state is preserved.
    pub fn upsert(&self, address: &str, discovery: Discovery) -> Upsert {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(address) {
            Some(record) => {
                record.name = discovery.name;
                record.rssi = discovery.rssi;
                record.discovered_at = discovery.seen_at;
                record.advertisement_data = discovery.details;
                Upsert::Refreshed
            }
            None => {
                records.insert(address.to_string(), DeviceRecord::new(address, discovery));
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, address: &str) -> SessionResult<DeviceRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(address.to_string()))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }

    /// Read-consistent copy of every record.
    pub fn list(&self) -> RegistrySnapshot {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        RegistrySnapshot {
            records: records.values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses currently in the given status.
    pub fn addresses_in(&self, status: ConnectionStatus) -> Vec<String> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.connection_status == status)
            .map(|r| r.address.clone())
            .collect()
    }

    /// Atomically moves a record to `status`.
    ///
    /// Entering `discovered` from any other state records `reason` (defaulting
    /// to `unexpected`) and the disconnect time. Entering `connected` clears
    /// the previous reason.
    pub fn set_connection_state(
        &self,
        address: &str,
        status: ConnectionStatus,
        reason: Option<DisconnectReason>,
    ) -> SessionResult<DeviceRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(address)
            .ok_or_else(|| SessionError::NotFound(address.to_string()))?;

        let from = record.connection_status;
        if !from.can_transition_to(status) {
            return Err(SessionError::InvalidTransition {
                address: address.to_string(),
                from,
                to: status,
            });
        }

        record.connection_status = status;
        match status {
            ConnectionStatus::Connected => {
                record.disconnect_reason = DisconnectReason::None;
                record.connected_at = Some(Utc::now());
            }
            ConnectionStatus::Discovered => {
                record.disconnect_reason = match reason {
                    Some(DisconnectReason::None) | None => DisconnectReason::Unexpected,
                    Some(r) => r,
                };
                record.disconnected_at = Some(Utc::now());
            }
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting => {}
        }
        Ok(record.clone())
    }

    /// Stores the last status characteristic read. The upload path always
    /// follows the latest snapshot.
    pub fn set_snapshot(
        &self,
        address: &str,
        raw: Option<String>,
        upload_path: Option<String>,
    ) -> SessionResult<DeviceRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(address)
            .ok_or_else(|| SessionError::NotFound(address.to_string()))?;
        record.node_data_raw = raw;
        record.upload_path = upload_path;
        Ok(record.clone())
    }
}

/// Point-in-time copy of the registry. Iterate it as many times as needed.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    records: Arc<[DeviceRecord]>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_vec(&self) -> Vec<DeviceRecord> {
        self.records.to_vec()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a DeviceRecord;
    type IntoIter = std::slice::Iter<'a, DeviceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::AdvertisementDetails;
    use chrono::{Duration, Utc};

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    fn discovery(rssi: i16) -> Discovery {
        Discovery {
            name: "Hublink-Node-1".to_string(),
            rssi,
            seen_at: Utc::now(),
            details: AdvertisementDetails::default(),
        }
    }

    #[test]
    fn repeated_advertisements_do_not_duplicate() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.upsert(ADDR, discovery(-52)), Upsert::Inserted);
        let first = registry.get(ADDR).unwrap();

        let mut later = discovery(-60);
        later.seen_at = first.discovered_at + Duration::seconds(3);
        assert_eq!(registry.upsert(ADDR, later), Upsert::Refreshed);

        assert_eq!(registry.len(), 1);
        let record = registry.get(ADDR).unwrap();
        assert_eq!(record.rssi, -60);
        assert_eq!(record.first_discovered_at, first.first_discovered_at);
        assert!(record.discovered_at > first.discovered_at);
    }

    #[test]
    fn upsert_preserves_connection_state() {
        let registry = DeviceRegistry::new();
        registry.upsert(ADDR, discovery(-52));
        registry
            .set_connection_state(ADDR, ConnectionStatus::Connecting, None)
            .unwrap();
        registry
            .set_connection_state(ADDR, ConnectionStatus::Connected, None)
            .unwrap();
        registry.upsert(ADDR, discovery(-40));
        assert_eq!(
            registry.get(ADDR).unwrap().connection_status,
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = DeviceRegistry::new();
        assert!(matches!(registry.get(ADDR), Err(SessionError::NotFound(_))));
    }

    #[test]
    fn rejects_unreachable_transition() {
        let registry = DeviceRegistry::new();
        registry.upsert(ADDR, discovery(-52));
        let err = registry
            .set_connection_state(ADDR, ConnectionStatus::Connected, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert_eq!(
            registry.get(ADDR).unwrap().connection_status,
            ConnectionStatus::Discovered
        );
    }

    #[test]
    fn falling_back_to_discovered_records_reason() {
        let registry = DeviceRegistry::new();
        registry.upsert(ADDR, discovery(-52));
        registry
            .set_connection_state(ADDR, ConnectionStatus::Connecting, None)
            .unwrap();
        let record = registry
            .set_connection_state(ADDR, ConnectionStatus::Discovered, None)
            .unwrap();
        assert_eq!(record.disconnect_reason, DisconnectReason::Unexpected);
        assert!(record.disconnected_at.is_some());

        registry
            .set_connection_state(ADDR, ConnectionStatus::Connecting, None)
            .unwrap();
        let record = registry
            .set_connection_state(ADDR, ConnectionStatus::Connected, None)
            .unwrap();
        assert_eq!(record.disconnect_reason, DisconnectReason::None);
        assert!(record.connected_at.is_some());
    }

    #[test]
    fn list_is_a_detached_snapshot() {
        let registry = DeviceRegistry::new();
        registry.upsert(ADDR, discovery(-52));
        let snapshot = registry.list();
        registry.upsert("AA:BB:CC:DD:EE:02", discovery(-70));
        assert_eq!(snapshot.iter().count(), 1);
        assert_eq!(snapshot.iter().count(), 1);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn later_snapshot_without_upload_path_clears_it() {
        let registry = DeviceRegistry::new();
        registry.upsert(ADDR, discovery(-52));
        let record = registry
            .set_snapshot(ADDR, Some(r#"{"upload_path":"/data"}"#.into()), Some("/data".into()))
            .unwrap();
        assert_eq!(record.upload_path.as_deref(), Some("/data"));

        let record = registry
            .set_snapshot(ADDR, Some("battery=87".into()), None)
            .unwrap();
        assert_eq!(record.node_data_raw.as_deref(), Some("battery=87"));
        assert_eq!(record.upload_path, None);
    }
}
