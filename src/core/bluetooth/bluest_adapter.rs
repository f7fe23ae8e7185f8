//! Radio backend over the platform Bluetooth stack (bluest).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, ConnectionEvent, Device};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::core::bluetooth::adapter::{AdapterError, AdapterResult, RadioAdapter, RadioLink};
use crate::core::bluetooth::constants::{DEFAULT_TRANSFER_UNIT, UUID_HUBLINK_SERVICE};
use crate::core::bluetooth::types::{Advertisement, AdvertisementDetails, CharacteristicRole};
use crate::utils::normalize_address;

const SCAN_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct BluestAdapter {
    adapter: Adapter,
    /// Devices seen while scanning, keyed by normalized address
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl fmt::Debug for BluestAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BluestAdapter").finish_non_exhaustive()
    }
}

impl BluestAdapter {
    /// Opens the default adapter and waits for it to power on.
    pub async fn new() -> AdapterResult<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| AdapterError::Unavailable("No Bluetooth adapter found".to_string()))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn to_advertisement(discovered: &AdvertisingDevice) -> Advertisement {
        let id = discovered.device.id().to_string();
        let data = &discovered.adv_data;
        let manufacturer_data: BTreeMap<u16, Vec<u8>> = data
            .manufacturer_data
            .iter()
            .map(|m| (m.company_id, m.data.clone()))
            .collect();
        Advertisement {
            address: normalize_address(&id),
            name: data
                .local_name
                .clone()
                .or_else(|| discovered.device.name().ok()),
            rssi: discovered.rssi,
            details: AdvertisementDetails {
                manufacturer_data,
                service_data: data
                    .service_data
                    .iter()
                    .map(|(uuid, bytes)| (*uuid, bytes.clone()))
                    .collect(),
                service_uuids: data.services.clone(),
            },
        }
    }

    async fn resolve_characteristics(
        device: &Device,
    ) -> AdapterResult<HashMap<CharacteristicRole, Characteristic>> {
        let services = device.services().await?;
        let service = services
            .iter()
            .find(|s| s.uuid() == UUID_HUBLINK_SERVICE)
            .ok_or_else(|| {
                for service in &services {
                    debug!("Available service: {}", service.uuid());
                }
                AdapterError::ServiceNotFound
            })?
            .clone();
        info!("Found Hublink service: {}", service.uuid());

        let mut characteristics = HashMap::new();
        for characteristic in service.characteristics().await? {
            if let Some(role) = CharacteristicRole::from_uuid(&characteristic.uuid()) {
                debug!("Found {:?} characteristic: {}", role, characteristic.uuid());
                characteristics.insert(role, characteristic);
            }
        }
        for role in [CharacteristicRole::Status, CharacteristicRole::Command] {
            if !characteristics.contains_key(&role) {
                return Err(AdapterError::CharacteristicNotFound(role));
            }
        }
        Ok(characteristics)
    }
}

#[async_trait]
impl RadioAdapter for BluestAdapter {
    async fn scan(&self, services: &[Uuid]) -> AdapterResult<BoxStream<'static, Advertisement>> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let services = services.to_vec();
        let (started_tx, started_rx) = oneshot::channel();

        // The bluest scan stream borrows the adapter, so it lives in its own task
        // and stops as soon as the receiving side is dropped.
        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to start bluetooth scan: {}", e);
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            if started_tx.send(Ok(())).is_err() {
                return;
            }
            info!("Bluetooth scan started");
            loop {
                tokio::select! {
                    next = scan_stream.next() => {
                        let Some(discovered) = next else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let advertisement = Self::to_advertisement(&discovered);
                        debug!("Found device - {:?}, RSSI: {:?}", advertisement.name, advertisement.rssi);
                        devices
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(advertisement.address.clone(), discovered.device);
                        if tx.send(advertisement).await.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            info!("Bluetooth scan stopped");
        });

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AdapterError::Bluest(e)),
            Err(_) => {
                return Err(AdapterError::Unavailable(
                    "scan task ended before the scan started".to_string(),
                ))
            }
        }

        let advertisements =
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|adv| (adv, rx)) });
        Ok(advertisements.boxed())
    }

    async fn connect(&self, address: &str) -> AdapterResult<Box<dyn RadioLink>> {
        let device = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownDevice(address.to_string()))?;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            self.adapter.connect_device(&device).await?;
        }

        info!("Connection successful, discovering services...");
        let characteristics = match Self::resolve_characteristics(&device).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Service discovery on {} failed: {}", address, e);
                if let Err(e) = self.adapter.disconnect_device(&device).await {
                    warn!("Failed to disconnect {} after discovery error: {}", address, e);
                }
                return Err(e);
            }
        };

        let transfer_unit = characteristics
            .get(&CharacteristicRole::Command)
            .and_then(|c| c.max_write_len().ok())
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_TRANSFER_UNIT);

        Ok(Box::new(BluestLink {
            address: address.to_string(),
            adapter: self.adapter.clone(),
            device,
            characteristics,
            transfer_unit,
        }))
    }
}

struct BluestLink {
    address: String,
    adapter: Adapter,
    device: Device,
    characteristics: HashMap<CharacteristicRole, Characteristic>,
    transfer_unit: usize,
}

impl BluestLink {
    fn characteristic(&self, role: CharacteristicRole) -> AdapterResult<&Characteristic> {
        self.characteristics
            .get(&role)
            .ok_or(AdapterError::CharacteristicNotFound(role))
    }
}

#[async_trait]
impl RadioLink for BluestLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn transfer_unit(&self) -> usize {
        self.transfer_unit
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn read(&self, role: CharacteristicRole) -> AdapterResult<Vec<u8>> {
        Ok(self.characteristic(role)?.read().await?)
    }

    async fn write(&self, role: CharacteristicRole, data: &[u8]) -> AdapterResult<()> {
        self.characteristic(role)?.write(data).await?;
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.address);
            self.adapter.disconnect_device(&self.device).await?;
        }
        Ok(())
    }

    async fn wait_for_loss(&self) {
        match self.adapter.device_connection_events(&self.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        return;
                    }
                }
            }
            Err(e) => warn!("Connection events unavailable for {}: {}", self.address, e),
        }
        // No event source: leave loss detection to the keep-alive check.
        std::future::pending::<()>().await
    }
}
