//! Application operations
//! This module defines all the operations the surrounding application can invoke.
//! Every operation returns an [`OperationResult`] and never panics.

use serde::Serialize;

use crate::core::bluetooth::{CommandRequest, DeviceRecord, ScanSession, ScannerStatus, WriteReport};
use crate::core::templates::{CommandFileStatus, CommandSet, CommandValue};
use crate::error::OperationResult;
use crate::logging::ActivityEvent;
use crate::state::AppState;

/// Outcome of a command file reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub old_count: usize,
    pub new_count: usize,
}

/// Gets the scanner status together with every known device
pub fn get_scanner_status(app_state: &AppState) -> OperationResult<ScannerStatus> {
    OperationResult::ok(app_state.bluetooth_manager.scanner_status())
}

/// Starts a scan session
///
/// # Arguments
/// * `app_state` - The application state
/// * `name_filter` - Name substring to match, the configured filter if `None`
pub async fn start_scan(
    app_state: &AppState,
    name_filter: Option<&str>,
) -> OperationResult<ScanSession> {
    app_state
        .bluetooth_manager
        .start_scan(name_filter, None)
        .await
        .into()
}

pub async fn stop_scan(app_state: &AppState) -> OperationResult<()> {
    app_state.bluetooth_manager.stop_scan().await.into()
}

/// Lists discovered devices with their full records
pub fn list_devices(app_state: &AppState) -> OperationResult<Vec<DeviceRecord>> {
    OperationResult::ok(app_state.bluetooth_manager.devices().to_vec())
}

pub fn get_device(app_state: &AppState, address: &str) -> OperationResult<DeviceRecord> {
    app_state.bluetooth_manager.device(address).into()
}

/// Connects to a Bluetooth device
///
/// # Arguments
/// * `app_state` - The application state
/// * `address` - The address of a discovered device
///
/// # Returns
/// The device record after the automatic status read
pub async fn connect_to_device(app_state: &AppState, address: &str) -> OperationResult<DeviceRecord> {
    app_state.bluetooth_manager.connect(address).await.into()
}

/// Disconnects from a connected device
pub async fn disconnect(app_state: &AppState, address: &str) -> OperationResult<DeviceRecord> {
    app_state.bluetooth_manager.disconnect(address).await.into()
}

/// Disconnects every device. Returns how many were disconnected.
pub async fn disconnect_all(app_state: &AppState) -> OperationResult<usize> {
    OperationResult::ok(app_state.bluetooth_manager.disconnect_all().await)
}

/// Reads the status characteristic of a connected device
pub async fn read_status(app_state: &AppState, address: &str) -> OperationResult<String> {
    app_state.bluetooth_manager.read_status(address).await.into()
}

/// Sends a command from the command file
pub async fn send_named_command(
    app_state: &AppState,
    address: &str,
    name: &str,
) -> OperationResult<WriteReport> {
    app_state
        .bluetooth_manager
        .write_command(address, CommandRequest::Named(name.to_string()))
        .await
        .into()
}

/// Sends an ad-hoc command
///
/// # Arguments
/// * `payload` - A JSON document, resolved like a named command, or plain text sent as is
pub async fn send_raw_command(
    app_state: &AppState,
    address: &str,
    payload: &str,
) -> OperationResult<WriteReport> {
    let request = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) if value.is_object() || value.is_array() => {
            CommandRequest::Template(CommandValue::from(value))
        }
        _ => CommandRequest::Text(payload.to_string()),
    };
    app_state
        .bluetooth_manager
        .write_command(address, request)
        .await
        .into()
}

pub fn list_commands(app_state: &AppState) -> OperationResult<Vec<String>> {
    OperationResult::ok(app_state.bluetooth_manager.command_names())
}

pub fn get_command_templates(app_state: &AppState) -> OperationResult<CommandSet> {
    OperationResult::ok(app_state.bluetooth_manager.command_templates())
}

pub async fn get_command_file_status(app_state: &AppState) -> OperationResult<CommandFileStatus> {
    OperationResult::ok(app_state.bluetooth_manager.command_file_status().await)
}

pub async fn reload_commands(app_state: &AppState) -> OperationResult<ReloadReport> {
    app_state
        .bluetooth_manager
        .reload_commands()
        .await
        .map(|(old_count, new_count)| ReloadReport {
            old_count,
            new_count,
        })
        .into()
}

/// Fetches the most recent activity events, oldest first
pub fn get_activity(app_state: &AppState, limit: usize) -> OperationResult<Vec<ActivityEvent>> {
    OperationResult::ok(app_state.bluetooth_manager.recent_activity(limit))
}
