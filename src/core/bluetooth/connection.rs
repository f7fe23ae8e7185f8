//! Bluetooth connection handling for Hublink nodes
//! This module owns the connect/disconnect state machine of every device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::connection_config::ConnectionConfig;
use crate::core::bluetooth::adapter::RadioLink;
use crate::core::bluetooth::characteristic::CharacteristicIo;
use crate::core::bluetooth::events::SessionEvent;
use crate::core::bluetooth::radio::{Radio, RadioHolder, RadioLease};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::{ConnectionStatus, DeviceRecord, DisconnectReason, LinkLoss};
use crate::error::{SessionError, SessionResult};
use crate::logging::ActivityLog;

#[derive(Clone)]
struct ActiveLink {
    id: u64,
    link: Arc<dyn RadioLink>,
    watcher: CancellationToken,
}

/// Marks a connect attempt as in flight for as long as it lives.
///
/// If the attempt is abandoned while the record is `connecting`, the record
/// falls back to `discovered`.
struct ConnectAttempt<'a> {
    flag: &'a AtomicBool,
    registry: &'a DeviceRegistry,
    connecting: Option<String>,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(flag: &'a AtomicBool, registry: &'a DeviceRegistry) -> SessionResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SessionError::ConnectionInProgress)?;
        Ok(Self {
            flag,
            registry,
            connecting: None,
        })
    }

    fn settle(&mut self) {
        self.connecting = None;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if let Some(address) = self.connecting.take() {
            let _ = self.registry.set_connection_state(
                &address,
                ConnectionStatus::Discovered,
                Some(DisconnectReason::Unexpected),
            );
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Connection manager for Hublink nodes
pub struct ConnectionManager {
    radio: Radio,
    registry: Arc<DeviceRegistry>,
    activity: Arc<ActivityLog>,
    scanner: Arc<BluetoothScanner>,
    io: CharacteristicIo,
    config: ConnectionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    links: Mutex<HashMap<String, ActiveLink>>,
    connecting: AtomicBool,
    next_link_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        radio: Radio,
        registry: Arc<DeviceRegistry>,
        activity: Arc<ActivityLog>,
        scanner: Arc<BluetoothScanner>,
        config: ConnectionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            radio,
            registry,
            activity,
            scanner,
            io: CharacteristicIo::from_config(&config),
            config,
            events,
            links: Mutex::new(HashMap::new()),
            connecting: AtomicBool::new(false),
            next_link_id: AtomicU64::new(1),
        }
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveLink>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connected_count(&self) -> usize {
        self.links().len()
    }

    /// Connects to a discovered device and reads its status once.
    pub async fn connect(&self, address: &str) -> SessionResult<DeviceRecord> {
        let mut attempt = ConnectAttempt::begin(&self.connecting, &self.registry)?;

        let record = self
            .registry
            .get(address)
            .map_err(|_| SessionError::UnknownAddress(address.to_string()))?;
        match record.connection_status {
            ConnectionStatus::Discovered => {}
            ConnectionStatus::Connected => {
                return Err(SessionError::AlreadyConnected(address.to_string()));
            }
            from => {
                return Err(SessionError::InvalidTransition {
                    address: address.to_string(),
                    from,
                    to: ConnectionStatus::Connecting,
                });
            }
        }
        let connected = self.registry.addresses_in(ConnectionStatus::Connected);
        if connected.len() >= self.config.max_connected_devices.max(1) {
            return Err(SessionError::AlreadyConnected(connected.join(", ")));
        }

        let lease = self.take_radio().await?;

        self.registry
            .set_connection_state(address, ConnectionStatus::Connecting, None)?;
        attempt.connecting = Some(address.to_string());
        self.activity
            .info(format!("Connecting to {}", record.name), Some(address));

        let link = match self.connect_with_retry(&lease, address).await {
            Ok(link) => link,
            Err(e) => {
                attempt.settle();
                self.registry.set_connection_state(
                    address,
                    ConnectionStatus::Discovered,
                    Some(DisconnectReason::Unexpected),
                )?;
                self.activity
                    .error(format!("Connection failed: {}", e), Some(address));
                return Err(e);
            }
        };

        attempt.settle();
        if let Err(e) = self
            .registry
            .set_connection_state(address, ConnectionStatus::Connected, None)
        {
            warn!("{} changed state while connecting: {}", address, e);
            let _ = link.disconnect().await;
            return Err(e);
        }

        let link_id = self.next_link_id.fetch_add(1, Ordering::SeqCst);
        let watcher = CancellationToken::new();
        self.links().insert(
            address.to_string(),
            ActiveLink {
                id: link_id,
                link: link.clone(),
                watcher: watcher.clone(),
            },
        );
        self.spawn_link_watcher(address.to_string(), link_id, link.clone(), watcher);
        self.activity
            .success(format!("Connected to {}", record.name), Some(address));

        if let Err(e) = self.refresh_status(address, link.as_ref()).await {
            warn!("Could not read node info from {}: {}", address, e);
            self.activity
                .warning(format!("Status read after connect failed: {}", e), Some(address));
            self.registry.set_snapshot(address, None, None)?;
        }
        drop(lease);

        self.registry.get(address)
    }

    /// Ends any running scan session and takes the radio.
    async fn take_radio(&self) -> SessionResult<RadioLease> {
        self.scanner.stop_scan().await?;
        self.radio.acquire(RadioHolder::Connection).await
    }

    /// Connect to the device with retry mechanism
    async fn connect_with_retry(
        &self,
        lease: &RadioLease,
        address: &str,
    ) -> SessionResult<Arc<dyn RadioLink>> {
        let attempts = self.config.connect_attempts.max(1);
        let connect_timeout = self.config.connect_timeout();
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result: SessionResult<Arc<dyn RadioLink>> =
                match timeout(connect_timeout, lease.connect(address)).await {
                    Ok(Ok(link)) => Ok(Arc::from(link)),
                    Ok(Err(e)) => Err(SessionError::from_adapter(address, e)),
                    Err(_) => Err(SessionError::ConnectTimeout {
                        address: address.to_string(),
                        timeout: connect_timeout,
                    }),
                };
            match result {
                Ok(link) => {
                    info!("Successfully connected to device {}", address);
                    return Ok(link);
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        info!("Retrying connection in {:?}...", self.config.retry_delay());
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SessionError::ConnectFailed {
            address: address.to_string(),
            reason: format!("failed after {} attempts", attempts),
        }))
    }

    /// Reads the status characteristic and stores it in the registry.
    async fn refresh_status(&self, address: &str, link: &dyn RadioLink) -> SessionResult<String> {
        let data = self.io.read_status(link).await?;
        let text = String::from_utf8_lossy(&data).into_owned();
        let upload_path = upload_path_of(&text);
        if let Some(path) = &upload_path {
            info!("Device upload path: {}", path);
        }
        self.registry
            .set_snapshot(address, Some(text.clone()), upload_path)?;
        Ok(text)
    }

    fn spawn_link_watcher(
        &self,
        address: String,
        link_id: u64,
        link: Arc<dyn RadioLink>,
        cancel: CancellationToken,
    ) {
        let events = self.events.clone();
        let interval = self.config.keepalive_interval();

        tokio::spawn(async move {
            let loss = link.wait_for_loss();
            tokio::pin!(loss);
            let mut keepalive = tokio::time::interval(interval);
            keepalive.tick().await;

            let cause = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = &mut loss => break LinkLoss::Unexpected,
                    _ = keepalive.tick() => {
                        if !link.is_connected().await {
                            break LinkLoss::Timeout;
                        }
                    }
                }
            };
            debug!("Link to {} lost: {:?}", address, cause);
            let _ = events.send(SessionEvent::LinkLost {
                address,
                link_id,
                loss: cause,
            });
        });
    }

    /// Recovers from a link that dropped without an operator request.
    pub fn handle_link_loss(&self, address: &str, link_id: u64, loss: LinkLoss) {
        let removed = {
            let mut links = self.links();
            match links.get(address) {
                Some(active) if active.id == link_id => links.remove(address),
                _ => None,
            }
        };
        let Some(active) = removed else {
            debug!("Ignoring stale link loss for {}", address);
            return;
        };
        active.watcher.cancel();

        let reason = DisconnectReason::from(loss);
        match self
            .registry
            .set_connection_state(address, ConnectionStatus::Discovered, Some(reason))
        {
            Ok(_) => self.activity.warning(
                format!("Lost connection ({})", reason),
                Some(address),
            ),
            Err(e) => debug!("Link loss for {} after state change: {}", address, e),
        }
    }

    /// The live link of a connected device.
    fn active_link(&self, address: &str) -> SessionResult<ActiveLink> {
        let active = self
            .links()
            .get(address)
            .cloned()
            .ok_or_else(|| SessionError::NotConnected(address.to_string()))?;
        match self.registry.get(address) {
            Ok(record) if record.is_connected() => Ok(active),
            _ => Err(SessionError::NotConnected(address.to_string())),
        }
    }

    /// Fails with `NotConnected` if the link went away, recording a timeout.
    async fn ensure_alive(&self, address: &str, active: &ActiveLink) -> SessionResult<()> {
        if active.link.is_connected().await {
            return Ok(());
        }
        warn!("Device {} is no longer connected", address);
        self.handle_link_loss(address, active.id, LinkLoss::Timeout);
        Err(SessionError::NotConnected(address.to_string()))
    }

    /// Reads the status characteristic of a connected device.
    pub async fn read_status(&self, address: &str) -> SessionResult<String> {
        let active = self.active_link(address)?;
        let _lease = self.take_radio().await?;
        self.ensure_alive(address, &active).await?;
        info!("Reading node characteristic from {}", address);
        self.refresh_status(address, active.link.as_ref()).await
    }

    /// Writes an encoded command to a connected device. Returns the chunk count.
    pub async fn write(&self, address: &str, payload: &[u8]) -> SessionResult<usize> {
        let active = self.active_link(address)?;
        let _lease = self.take_radio().await?;
        self.ensure_alive(address, &active).await?;
        self.io.write_command(active.link.as_ref(), payload).await
    }

    /// Operator-initiated disconnect.
    pub async fn disconnect(&self, address: &str) -> SessionResult<DeviceRecord> {
        self.active_link(address)?;
        let _lease = self.take_radio().await?;
        // The link may have dropped while waiting for the radio.
        let active = self.active_link(address)?;

        self.registry
            .set_connection_state(address, ConnectionStatus::Disconnecting, None)?;
        info!("Disconnecting from device: {}", address);
        self.release_link(address, &active).await;
        let record = self.registry.set_connection_state(
            address,
            ConnectionStatus::Discovered,
            Some(DisconnectReason::Manual),
        )?;
        self.activity
            .info(format!("Disconnected from {}", record.name), Some(address));
        Ok(record)
    }

    async fn release_link(&self, address: &str, active: &ActiveLink) {
        active.watcher.cancel();
        {
            let mut links = self.links();
            if links.get(address).is_some_and(|l| l.id == active.id) {
                links.remove(address);
            }
        }
        match timeout(self.config.connect_timeout(), active.link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error disconnecting from {}: {}", address, e),
            Err(_) => warn!("Timed out disconnecting from {}", address),
        }
    }

    /// Best-effort disconnect of every connected or connecting device.
    pub async fn disconnect_all(&self) -> usize {
        let _lease = self.take_radio().await.ok();
        let actives: Vec<(String, ActiveLink)> = self
            .links()
            .iter()
            .map(|(a, l)| (a.clone(), l.clone()))
            .collect();

        if actives.is_empty() {
            debug!("No devices connected");
        } else {
            info!("Disconnecting from {} devices", actives.len());
        }

        let mut count = 0;
        for (address, active) in &actives {
            let _ = self.registry.set_connection_state(
                address,
                ConnectionStatus::Disconnecting,
                None,
            );
            self.release_link(address, active).await;
            if self
                .registry
                .set_connection_state(
                    address,
                    ConnectionStatus::Discovered,
                    Some(DisconnectReason::Manual),
                )
                .is_ok()
            {
                count += 1;
            }
        }

        for address in self.registry.addresses_in(ConnectionStatus::Connecting) {
            if self
                .registry
                .set_connection_state(
                    &address,
                    ConnectionStatus::Discovered,
                    Some(DisconnectReason::Manual),
                )
                .is_ok()
            {
                count += 1;
            }
        }

        if count > 0 {
            self.activity
                .info(format!("Disconnected from {} device(s)", count), None);
        }
        count
    }
}

/// `upload_path` from a JSON status snapshot, if present.
fn upload_path_of(status: &str) -> Option<String> {
    let value: Value = serde_json::from_str(status).ok()?;
    value
        .get("upload_path")
        .and_then(Value::as_str)
        .map(str::to_string)
}
