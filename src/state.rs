//! Application state management
//! This module defines and manages the session context shared by every operation.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestAdapter, RadioAdapter, SimulatedAdapter};
use crate::core::BluetoothManager;

/// Global application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    pub config: AppConfig,
}

impl AppState {
    /// Creates a new AppState instance, picking the radio backend from `config`.
    ///
    /// A missing adapter is not fatal: the state is still built with scanning
    /// and connecting disabled.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let adapter: Option<Arc<dyn RadioAdapter>> = if config.simulation {
            info!("Simulation mode enabled, using scripted Hublink devices");
            Some(Arc::new(SimulatedAdapter::with_demo_devices()))
        } else {
            match BluestAdapter::new().await {
                Ok(adapter) => Some(Arc::new(adapter)),
                Err(e) => {
                    warn!("Bluetooth adapter unavailable: {}", e);
                    None
                }
            }
        };
        Self::with_adapter(adapter, config).await
    }

    /// Creates the state around an already constructed radio backend.
    pub async fn with_adapter(
        adapter: Option<Arc<dyn RadioAdapter>>,
        config: AppConfig,
    ) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let manager = BluetoothManager::new(adapter, &config);
        if let Err(e) = manager.load_commands().await {
            warn!("Starting without commands: {}", e);
        }
        Ok(Self {
            bluetooth_manager: Arc::new(manager),
            config,
        })
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }

    /// Releases the radio and stops background work.
    pub async fn shutdown(&self) {
        self.bluetooth_manager.shutdown().await;
        info!("Application state shut down");
    }
}
