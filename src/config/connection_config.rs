use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY_MS, CONNECT_TIMEOUT_SECS, KEEPALIVE_INTERVAL_SECS,
    MAX_CONNECTED_DEVICES, MAX_WRITE_CHUNKS, READ_TIMEOUT_SECS, WRITE_TIMEOUT_SECS,
};

/// Timeouts and admission policy for device connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout of a single connection attempt (ms)
    pub connect_timeout_ms: u64,
    /// Attempts per connect request
    pub connect_attempts: u32,
    /// Pause between attempts (ms)
    pub retry_delay_ms: u64,
    /// Status characteristic read timeout (ms)
    pub read_timeout_ms: u64,
    /// Timeout of each command characteristic write (ms)
    pub write_timeout_ms: u64,
    /// Commands larger than this many transfer units are refused
    pub max_write_chunks: usize,
    /// How often live links are checked (ms)
    pub keepalive_interval_ms: u64,
    /// Devices that may be connected at the same time
    pub max_connected_devices: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout_ms: CONNECT_TIMEOUT_SECS * 1000,
            connect_attempts: CONNECT_ATTEMPTS,
            retry_delay_ms: CONNECT_RETRY_DELAY_MS,
            read_timeout_ms: READ_TIMEOUT_SECS * 1000,
            write_timeout_ms: WRITE_TIMEOUT_SECS * 1000,
            max_write_chunks: MAX_WRITE_CHUNKS,
            keepalive_interval_ms: KEEPALIVE_INTERVAL_SECS * 1000,
            max_connected_devices: MAX_CONNECTED_DEVICES,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }
}
