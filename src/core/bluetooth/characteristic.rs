//! Bounded reads and writes against a connected device's characteristics.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::timeout;

use crate::config::connection_config::ConnectionConfig;
use crate::core::bluetooth::adapter::{AdapterError, RadioLink};
use crate::core::bluetooth::types::CharacteristicRole;
use crate::error::{SessionError, SessionResult};

/// Outcome of a completed command write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub bytes: usize,
    pub chunks: usize,
    /// The exact text written
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct CharacteristicIo {
    read_timeout: Duration,
    write_timeout: Duration,
    max_chunks: usize,
}

impl CharacteristicIo {
    pub fn new(read_timeout: Duration, write_timeout: Duration, max_chunks: usize) -> Self {
        Self {
            read_timeout,
            write_timeout,
            max_chunks: max_chunks.max(1),
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.read_timeout(),
            config.write_timeout(),
            config.max_write_chunks,
        )
    }

    /// Reads the status characteristic.
    pub async fn read_status(&self, link: &dyn RadioLink) -> SessionResult<Vec<u8>> {
        debug!("Reading status characteristic from {}", link.address());
        match timeout(self.read_timeout, link.read(CharacteristicRole::Status)).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(SessionError::ReadFailed(e.to_string())),
            Err(_) => Err(SessionError::ReadTimeout(self.read_timeout)),
        }
    }

    /// Writes `payload` to the command characteristic, split into transfer-unit
    /// sized chunks written in order.
    ///
    /// Payloads that would need more than the configured number of chunks are
    /// refused before anything is written. A failing chunk aborts the sequence
    /// and the error carries the byte offset reached. An empty payload is one
    /// zero-length write.
    pub async fn write_command(&self, link: &dyn RadioLink, payload: &[u8]) -> SessionResult<usize> {
        let unit = link.transfer_unit().max(1);
        let limit = unit.saturating_mul(self.max_chunks);
        if payload.len() > limit {
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let pieces: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(unit).collect()
        };

        let mut offset = 0;
        let mut chunks = 0;
        for chunk in pieces {
            match timeout(self.write_timeout, link.write(CharacteristicRole::Command, chunk)).await {
                Ok(Ok(())) => {}
                Ok(Err(AdapterError::Rejected(reason))) => {
                    warn!("Write to {} rejected at byte {}: {}", link.address(), offset, reason);
                    return Err(SessionError::WriteRejected { offset, reason });
                }
                Ok(Err(e)) => {
                    warn!("Write to {} failed at byte {}: {}", link.address(), offset, e);
                    return Err(SessionError::WriteFailed {
                        offset,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!("Write to {} timed out at byte {}", link.address(), offset);
                    return Err(SessionError::WriteTimeout { offset });
                }
            }
            offset += chunk.len();
            chunks += 1;
        }
        info!(
            "Wrote {} bytes in {} chunk(s) to {}",
            payload.len(),
            chunks,
            link.address()
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::adapter::RadioAdapter;
    use crate::core::bluetooth::simulated::{SimulatedAdapter, SimulatedDevice};
    use crate::error::ErrorKind;

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    fn io() -> CharacteristicIo {
        CharacteristicIo::new(Duration::from_millis(200), Duration::from_millis(200), 4)
    }

    async fn link_with(device: SimulatedDevice) -> (SimulatedAdapter, Box<dyn RadioLink>) {
        let adapter = SimulatedAdapter::new();
        adapter.add_device(device);
        let link = adapter.connect(ADDR).await.unwrap();
        (adapter, link)
    }

    #[tokio::test]
    async fn reads_status_text() {
        let (_adapter, link) =
            link_with(SimulatedDevice::new(ADDR, "Hublink-Node-1", -52).with_status("battery=87")).await;
        let data = io().read_status(link.as_ref()).await.unwrap();
        assert_eq!(data, b"battery=87");
    }

    #[tokio::test]
    async fn read_times_out() {
        let mut device = SimulatedDevice::new(ADDR, "Hublink-Node-1", -52);
        device.read_delay = Some(Duration::from_secs(5));
        let (_adapter, link) = link_with(device).await;
        let err = io().read_status(link.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);
    }

    #[tokio::test]
    async fn read_failure_is_reported() {
        let mut device = SimulatedDevice::new(ADDR, "Hublink-Node-1", -52);
        device.fail_reads = true;
        let (_adapter, link) = link_with(device).await;
        let err = io().read_status(link.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailed);
    }

    #[tokio::test]
    async fn splits_payload_into_ordered_chunks() {
        let (adapter, link) =
            link_with(SimulatedDevice::new(ADDR, "Hublink-Node-1", -52).with_transfer_unit(8)).await;
        let payload = br#"{"timestamp":1700000000}"#;
        let chunks = io().write_command(link.as_ref(), payload).await.unwrap();
        assert_eq!(chunks, 3);
        let writes = adapter.writes(ADDR);
        assert!(writes.iter().all(|w| w.len() <= 8));
        assert_eq!(adapter.written_payload(ADDR), payload.to_vec());
    }

    #[tokio::test]
    async fn empty_payload_is_a_single_empty_write() {
        let (adapter, link) = link_with(SimulatedDevice::new(ADDR, "Hublink-Node-1", -52)).await;
        let chunks = io().write_command(link.as_ref(), b"").await.unwrap();
        assert_eq!(chunks, 1);
        assert_eq!(adapter.writes(ADDR), vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn refuses_oversized_payload_without_writing() {
        let (adapter, link) =
            link_with(SimulatedDevice::new(ADDR, "Hublink-Node-1", -52).with_transfer_unit(4)).await;
        let err = io().write_command(link.as_ref(), &[b'x'; 17]).await.unwrap_err();
        assert!(matches!(err, SessionError::PayloadTooLarge { size: 17, limit: 16 }));
        assert!(adapter.writes(ADDR).is_empty());
    }

    #[tokio::test]
    async fn mid_sequence_rejection_reports_offset() {
        let mut device = SimulatedDevice::new(ADDR, "Hublink-Node-1", -52).with_transfer_unit(4);
        device.reject_write_chunk = Some(2);
        let (_adapter, link) = link_with(device).await;
        let err = io().write_command(link.as_ref(), b"0123456789").await.unwrap_err();
        assert!(matches!(err, SessionError::WriteRejected { offset: 8, .. }));
    }

    #[tokio::test]
    async fn write_times_out() {
        let mut device = SimulatedDevice::new(ADDR, "Hublink-Node-1", -52);
        device.write_delay = Some(Duration::from_secs(5));
        let (_adapter, link) = link_with(device).await;
        let err = io().write_command(link.as_ref(), b"{}").await.unwrap_err();
        assert!(matches!(err, SessionError::WriteTimeout { offset: 0 }));
    }
}
