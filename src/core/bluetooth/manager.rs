//! Bluetooth manager for Hublink nodes
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::bluetooth::adapter::RadioAdapter;
use crate::core::bluetooth::characteristic::WriteReport;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::events::SessionEvent;
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::registry::{DeviceRegistry, RegistrySnapshot};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::{ConnectionStatus, DeviceRecord, ScanSession, ScannerStatus};
use crate::core::templates::{CommandFileStatus, CommandLibrary, CommandSet, CommandValue};
use crate::error::SessionResult;
use crate::logging::{ActivityEvent, ActivityLog, ActivitySnapshot};
use crate::utils::normalize_address;

/// What to write to a node's command characteristic
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    /// A command from the loaded command file
    Named(String),
    /// An ad-hoc payload tree, resolved like a named command
    Template(CommandValue),
    /// Raw text sent as is
    Text(String),
}

/// Manages Bluetooth operations
pub struct BluetoothManager {
    radio: Radio,
    registry: Arc<DeviceRegistry>,
    activity: Arc<ActivityLog>,
    scanner: Arc<BluetoothScanner>,
    connections: Arc<ConnectionManager>,
    templates: CommandLibrary,
    shutdown: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl BluetoothManager {
    /// Creates the manager and starts its event loop. Must be called from
    /// within a Tokio runtime.
    pub fn new(adapter: Option<Arc<dyn RadioAdapter>>, config: &AppConfig) -> Self {
        let radio = Radio::new(adapter);
        let registry = Arc::new(DeviceRegistry::new());
        let activity = Arc::new(ActivityLog::new(config.activity.capacity));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let scanner = Arc::new(BluetoothScanner::new(
            radio.clone(),
            registry.clone(),
            activity.clone(),
            events_tx.clone(),
            config.scanner.clone(),
        ));
        let connections = Arc::new(ConnectionManager::new(
            radio.clone(),
            registry.clone(),
            activity.clone(),
            scanner.clone(),
            config.connection.clone(),
            events_tx,
        ));
        let templates = CommandLibrary::new(config.commands.path.clone(), activity.clone());

        let shutdown = CancellationToken::new();
        let event_loop = tokio::spawn(run_event_loop(
            events_rx,
            scanner.clone(),
            connections.clone(),
            shutdown.clone(),
        ));

        if !radio.is_available() {
            activity.warning("No Bluetooth adapter, scanning and connecting are disabled", None);
        }

        Self {
            radio,
            registry,
            activity,
            scanner,
            connections,
            templates,
            shutdown,
            event_loop: Mutex::new(Some(event_loop)),
        }
    }

    pub fn scanner_status(&self) -> ScannerStatus {
        let session = self.scanner.current_session();
        let devices = self.registry.list().to_vec();
        let connected_count = devices
            .iter()
            .filter(|d| d.connection_status == ConnectionStatus::Connected)
            .count();
        let is_scanning = session.as_ref().is_some_and(|s| s.active);

        ScannerStatus {
            is_scanning,
            adapter_available: self.radio.is_available(),
            scan_start_time: session.as_ref().filter(|s| s.active).map(|s| s.started_at),
            name_filter: session.map(|s| s.name_filter),
            discovered_count: devices.len(),
            connected_count,
            devices,
        }
    }

    pub async fn start_scan(
        &self,
        name_filter: Option<&str>,
        duration: Option<Duration>,
    ) -> SessionResult<ScanSession> {
        self.scanner.start_scan(name_filter, duration).await
    }

    pub async fn stop_scan(&self) -> SessionResult<()> {
        self.scanner.stop_scan().await
    }

    pub fn devices(&self) -> RegistrySnapshot {
        self.registry.list()
    }

    pub fn device(&self, address: &str) -> SessionResult<DeviceRecord> {
        self.registry.get(&normalize_address(address))
    }

    pub async fn connect(&self, address: &str) -> SessionResult<DeviceRecord> {
        self.connections.connect(&normalize_address(address)).await
    }

    pub async fn disconnect(&self, address: &str) -> SessionResult<DeviceRecord> {
        self.connections.disconnect(&normalize_address(address)).await
    }

    pub async fn disconnect_all(&self) -> usize {
        self.connections.disconnect_all().await
    }

    pub async fn read_status(&self, address: &str) -> SessionResult<String> {
        let address = normalize_address(address);
        match self.connections.read_status(&address).await {
            Ok(text) => {
                self.activity.info("Read node status", Some(&address));
                Ok(text)
            }
            Err(e) => {
                self.activity
                    .error(format!("Status read failed: {}", e), Some(&address));
                Err(e)
            }
        }
    }

    /// Resolves `request` against the current time and writes it.
    pub async fn write_command(
        &self,
        address: &str,
        request: CommandRequest,
    ) -> SessionResult<WriteReport> {
        let address = normalize_address(address);
        let (label, payload) = self.encode_request(request).await?;

        match self.connections.write(&address, payload.as_bytes()).await {
            Ok(chunks) => {
                self.activity
                    .success(format!("Sent command {}", label), Some(&address));
                Ok(WriteReport {
                    bytes: payload.len(),
                    chunks,
                    payload,
                })
            }
            Err(e) => {
                self.activity
                    .error(format!("Command {} failed: {}", label, e), Some(&address));
                Err(e)
            }
        }
    }

    async fn encode_request(&self, request: CommandRequest) -> SessionResult<(String, String)> {
        let now = Utc::now();
        match request {
            CommandRequest::Named(name) => {
                if let Err(e) = self.templates.refresh_if_modified().await {
                    warn!("Command file could not be refreshed: {}", e);
                }
                let resolved = self.templates.resolve_named(&name, now)?;
                Ok((format!("'{}'", name), resolved.to_json()))
            }
            CommandRequest::Template(template) => {
                Ok(("(custom)".to_string(), template.resolve(now).to_json()))
            }
            CommandRequest::Text(text) => Ok(("(raw)".to_string(), text)),
        }
    }

    pub fn command_names(&self) -> Vec<String> {
        self.templates.names()
    }

    pub fn command_templates(&self) -> CommandSet {
        self.templates.templates()
    }

    pub async fn command_file_status(&self) -> CommandFileStatus {
        self.templates.status().await
    }

    /// Initial load of the command file.
    pub async fn load_commands(&self) -> SessionResult<usize> {
        self.templates.load().await
    }

    pub async fn reload_commands(&self) -> SessionResult<(usize, usize)> {
        self.templates.reload().await
    }

    pub fn activity(&self) -> ActivitySnapshot {
        self.activity.snapshot()
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEvent> {
        self.activity.recent(limit)
    }

    /// Stops the scan, drops every link and ends the event loop.
    pub async fn shutdown(&self) {
        info!("Shutting down Bluetooth manager");
        if let Err(e) = self.scanner.stop_scan().await {
            warn!("Failed to stop scan during shutdown: {}", e);
        }
        self.connections.disconnect_all().await;
        self.shutdown.cancel();
        if let Some(handle) = self.event_loop.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Drains radio events into the registry and the connection state machine.
async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    scanner: Arc<BluetoothScanner>,
    connections: Arc<ConnectionManager>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(SessionEvent::Advertisement { session_id, advertisement }) => {
                    debug!("Advertisement from {} (session {})", advertisement.address, session_id);
                    scanner.ingest(&advertisement);
                }
                Some(SessionEvent::LinkLost { address, link_id, loss }) => {
                    connections.handle_link_loss(&address, link_id, loss);
                }
                None => break,
            },
        }
    }
    debug!("Session event loop finished");
}
