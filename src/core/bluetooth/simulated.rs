//! Simulated radio backend.
//!
//! Advertises scripted Hublink nodes and records everything written to them.
//! Used when `simulation` is enabled in the configuration and by the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, info};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{AdapterError, AdapterResult, RadioAdapter, RadioLink};
use crate::core::bluetooth::constants::{DEFAULT_TRANSFER_UNIT, UUID_HUBLINK_SERVICE};
use crate::core::bluetooth::types::{
    Advertisement, AdvertisementDetails, CharacteristicRole, LinkLoss,
};

const ADVERTISE_INTERVAL: Duration = Duration::from_millis(100);

/// A scripted device and how it misbehaves.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub address: String,
    pub name: String,
    pub rssi: i16,
    pub services: Vec<Uuid>,
    /// Text served from the status characteristic
    pub status_payload: Option<String>,
    pub transfer_unit: usize,
    pub reject_connect: bool,
    pub connect_delay: Option<Duration>,
    pub fail_reads: bool,
    pub read_delay: Option<Duration>,
    /// Index of the write chunk that will be rejected
    pub reject_write_chunk: Option<usize>,
    pub write_delay: Option<Duration>,
}

impl SimulatedDevice {
    pub fn new(address: &str, name: &str, rssi: i16) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            rssi,
            services: vec![UUID_HUBLINK_SERVICE],
            status_payload: None,
            transfer_unit: DEFAULT_TRANSFER_UNIT,
            reject_connect: false,
            connect_delay: None,
            fail_reads: false,
            read_delay: None,
            reject_write_chunk: None,
            write_delay: None,
        }
    }

    pub fn with_status(mut self, payload: &str) -> Self {
        self.status_payload = Some(payload.to_string());
        self
    }

    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }

    pub fn with_transfer_unit(mut self, transfer_unit: usize) -> Self {
        self.transfer_unit = transfer_unit;
        self
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address.clone(),
            name: Some(self.name.clone()),
            rssi: Some(self.rssi),
            details: AdvertisementDetails {
                service_uuids: self.services.clone(),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    lost: CancellationToken,
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<String, SimulatedDevice>,
    links: HashMap<String, Arc<LinkState>>,
    writes: HashMap<String, Vec<Vec<u8>>>,
    reads: HashMap<String, usize>,
    connect_attempts: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedAdapter {
    state: Arc<Mutex<SimState>>,
    active_scans: Arc<AtomicUsize>,
    scanned_during_connect: Arc<AtomicBool>,
    refuse_scans: Arc<AtomicBool>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two demo gateways, matching what the dashboard shows in simulation mode.
    pub fn with_demo_devices() -> Self {
        let adapter = Self::new();
        adapter.add_device(
            SimulatedDevice::new("AA:BB:CC:DD:EE:FF", "Hublink Gateway #1", -45)
                .with_status(r#"{"upload_path":"/data/uploads","status":"ready"}"#),
        );
        adapter.add_device(
            SimulatedDevice::new("11:22:33:44:55:66", "Hublink Gateway #2", -67)
                .with_status(r#"{"upload_path":"/home/hublink/data","status":"ready"}"#),
        );
        adapter
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: SimulatedDevice) {
        self.state().devices.insert(device.address.clone(), device);
    }

    /// Changes a scripted device in place.
    pub fn update_device(&self, address: &str, f: impl FnOnce(&mut SimulatedDevice)) {
        if let Some(device) = self.state().devices.get_mut(address) {
            f(device);
        }
    }

    /// Drops a live link. `Unexpected` is reported by the adapter; `Timeout`
    /// goes silent and is only noticed by keep-alive checks.
    pub fn drop_link(&self, address: &str, loss: LinkLoss) {
        let link = self.state().links.get(address).cloned();
        if let Some(link) = link {
            info!("Simulating link loss ({:?}) for {}", loss, address);
            link.connected.store(false, Ordering::SeqCst);
            if loss == LinkLoss::Unexpected {
                link.lost.cancel();
            }
        }
    }

    /// Every chunk written to the command characteristic of `address`.
    pub fn writes(&self, address: &str) -> Vec<Vec<u8>> {
        self.state().writes.get(address).cloned().unwrap_or_default()
    }

    /// Command characteristic contents joined back together.
    pub fn written_payload(&self, address: &str) -> Vec<u8> {
        self.writes(address).concat()
    }

    pub fn read_count(&self, address: &str) -> usize {
        self.state().reads.get(address).copied().unwrap_or(0)
    }

    pub fn connect_attempts(&self, address: &str) -> usize {
        self.state().connect_attempts.get(address).copied().unwrap_or(0)
    }

    pub fn is_linked(&self, address: &str) -> bool {
        self.state()
            .links
            .get(address)
            .is_some_and(|l| l.connected.load(Ordering::SeqCst))
    }

    /// Makes every later scan fail to start, as a powered-off radio does.
    pub fn refuse_scans(&self, refuse: bool) {
        self.refuse_scans.store(refuse, Ordering::SeqCst);
    }

    pub fn active_scans(&self) -> usize {
        self.active_scans.load(Ordering::SeqCst)
    }

    /// True if a connect ever started while a scan stream was alive.
    pub fn scanned_during_connect(&self) -> bool {
        self.scanned_during_connect.load(Ordering::SeqCst)
    }
}

/// Decrements the active scan counter when the stream is dropped.
struct ScanGuard(Arc<AtomicUsize>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioAdapter for SimulatedAdapter {
    async fn scan(&self, services: &[Uuid]) -> AdapterResult<BoxStream<'static, Advertisement>> {
        if self.refuse_scans.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("radio is powered off".to_string()));
        }
        self.active_scans.fetch_add(1, Ordering::SeqCst);
        let guard = ScanGuard(self.active_scans.clone());
        let state = self.state.clone();
        let services = services.to_vec();
        debug!("Simulated scan started for {:?}", services);

        let rounds = stream::unfold((guard, true), move |(guard, first)| {
            let state = state.clone();
            async move {
                if !first {
                    sleep(ADVERTISE_INTERVAL).await;
                }
                let advertisements: Vec<Advertisement> = state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .devices
                    .values()
                    .map(SimulatedDevice::advertisement)
                    .collect();
                Some((stream::iter(advertisements), (guard, false)))
            }
        });
        Ok(rounds.flatten().boxed())
    }

    async fn connect(&self, address: &str) -> AdapterResult<Box<dyn RadioLink>> {
        if self.active_scans() > 0 {
            self.scanned_during_connect.store(true, Ordering::SeqCst);
        }
        let device = {
            let mut state = self.state();
            *state.connect_attempts.entry(address.to_string()).or_default() += 1;
            state
                .devices
                .get(address)
                .cloned()
                .ok_or_else(|| AdapterError::UnknownDevice(address.to_string()))?
        };
        if let Some(delay) = device.connect_delay {
            sleep(delay).await;
        }
        if device.reject_connect {
            return Err(AdapterError::Rejected("connection refused by peer".to_string()));
        }
        if !device.services.contains(&UUID_HUBLINK_SERVICE) {
            return Err(AdapterError::ServiceNotFound);
        }

        let link = Arc::new(LinkState {
            connected: AtomicBool::new(true),
            lost: CancellationToken::new(),
        });
        self.state().links.insert(address.to_string(), link.clone());
        Ok(Box::new(SimulatedLink {
            address: address.to_string(),
            transfer_unit: device.transfer_unit,
            link,
            adapter: self.clone(),
            chunk_index: AtomicUsize::new(0),
        }))
    }
}

struct SimulatedLink {
    address: String,
    transfer_unit: usize,
    link: Arc<LinkState>,
    adapter: SimulatedAdapter,
    chunk_index: AtomicUsize,
}

impl SimulatedLink {
    fn device(&self) -> AdapterResult<SimulatedDevice> {
        self.adapter
            .state()
            .devices
            .get(&self.address)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownDevice(self.address.clone()))
    }

    fn ensure_connected(&self) -> AdapterResult<()> {
        if self.link.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Disconnected)
        }
    }
}

#[async_trait]
impl RadioLink for SimulatedLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn transfer_unit(&self) -> usize {
        self.transfer_unit
    }

    async fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, role: CharacteristicRole) -> AdapterResult<Vec<u8>> {
        self.ensure_connected()?;
        let device = self.device()?;
        *self.adapter.state().reads.entry(self.address.clone()).or_default() += 1;
        if let Some(delay) = device.read_delay {
            sleep(delay).await;
        }
        if device.fail_reads {
            return Err(AdapterError::Rejected("read not permitted".to_string()));
        }
        match role {
            CharacteristicRole::Status => Ok(device.status_payload.unwrap_or_default().into_bytes()),
            other => Ok(format!("{other:?}").into_bytes()),
        }
    }

    async fn write(&self, role: CharacteristicRole, data: &[u8]) -> AdapterResult<()> {
        self.ensure_connected()?;
        let device = self.device()?;
        if let Some(delay) = device.write_delay {
            sleep(delay).await;
        }
        let index = self.chunk_index.fetch_add(1, Ordering::SeqCst);
        if device.reject_write_chunk == Some(index) {
            return Err(AdapterError::Rejected(format!("chunk {index} refused")));
        }
        if role == CharacteristicRole::Command {
            self.adapter
                .state()
                .writes
                .entry(self.address.clone())
                .or_default()
                .push(data.to_vec());
        }
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.link.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_loss(&self) {
        self.link.lost.cancelled().await;
    }
}
