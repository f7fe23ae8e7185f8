//! Core functionality for the Hublink scanner
//! This module contains the radio session layer and the command templates.

pub mod bluetooth;
pub mod templates;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use templates::{CommandLibrary, CommandValue};
