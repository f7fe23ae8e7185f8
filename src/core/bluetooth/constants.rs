//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

/// Default advertised-name filter for Hublink nodes
pub const DEFAULT_NAME_FILTER: &str = "Hublink";

/// The UUID of the Hublink service
pub const UUID_HUBLINK_SERVICE: Uuid = Uuid::from_u128(0x57617368_5501_0001_8000_00805f9b34fb);

/// The UUID of the filename characteristic
pub const UUID_FILENAME_CHAR: Uuid = Uuid::from_u128(0x57617368_5502_0001_8000_00805f9b34fb);

/// The UUID of the bulk file transfer characteristic
pub const UUID_FILE_TRANSFER_CHAR: Uuid = Uuid::from_u128(0x57617368_5503_0001_8000_00805f9b34fb);

/// The UUID of the gateway command characteristic (write)
pub const UUID_COMMAND_CHAR: Uuid = Uuid::from_u128(0x57617368_5504_0001_8000_00805f9b34fb);

/// The UUID of the node status characteristic (read)
pub const UUID_STATUS_CHAR: Uuid = Uuid::from_u128(0x57617368_5505_0001_8000_00805f9b34fb);

/// Number of connection attempts per connect request
pub const CONNECT_ATTEMPTS: u32 = 1;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Timeout for a single connection attempt in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Timeout for characteristic reads in seconds
pub const READ_TIMEOUT_SECS: u64 = 3;

/// Timeout for each characteristic write in seconds
pub const WRITE_TIMEOUT_SECS: u64 = 3;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Transfer unit assumed when the platform does not report one
pub const DEFAULT_TRANSFER_UNIT: usize = 20;

/// Upper bound on the number of writes a single command may be split into
pub const MAX_WRITE_CHUNKS: usize = 16;

/// Link keep-alive check interval in seconds
pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;

/// Devices allowed to be connected at the same time
pub const MAX_CONNECTED_DEVICES: usize = 1;

/// Activity log capacity
pub const ACTIVITY_LOG_CAPACITY: usize = 100;

/// Sentinel replaced by the current Unix timestamp when a command is resolved
pub const TIMESTAMP_SENTINEL: i64 = -1;
