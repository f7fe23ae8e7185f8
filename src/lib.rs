//! Hublink scanner library
//! Discovery, connection and command dispatch for Hublink BLE nodes.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::{ErrorKind, OperationResult, SessionError, SessionResult};
pub use state::AppState;
