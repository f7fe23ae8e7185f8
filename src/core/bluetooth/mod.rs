//! Bluetooth functionality for Hublink nodes
//! This module handles all bluetooth operations including scanning,
//! connecting, and exchanging data with Hublink gateways.

pub mod adapter;
pub mod bluest_adapter;
pub mod characteristic;
pub mod connection;
mod constants;
pub mod events;
pub mod manager;
pub mod radio;
pub mod registry;
pub mod scanner;
pub mod simulated;
pub mod types;

// Re-export types that should be publicly accessible
pub use adapter::{AdapterError, RadioAdapter, RadioLink};
pub use bluest_adapter::BluestAdapter;
pub use characteristic::WriteReport;
pub use connection::ConnectionManager;
pub use constants::*; // Re-export all constants
pub use manager::{BluetoothManager, CommandRequest};
pub use registry::{DeviceRegistry, RegistrySnapshot};
pub use scanner::BluetoothScanner;
pub use simulated::{SimulatedAdapter, SimulatedDevice};
pub use types::{
    Advertisement, ConnectionStatus, DeviceRecord, DisconnectReason, LinkLoss, ScanSession,
    ScannerStatus,
};
