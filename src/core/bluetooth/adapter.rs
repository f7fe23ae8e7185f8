//! Radio backend seam.
//!
//! The scanner and connection manager only talk to the radio through these
//! traits, so the bluest backend and the simulated backend are interchangeable.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{Advertisement, CharacteristicRole};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("device {0} is not known to the adapter")]
    UnknownDevice(String),

    #[error("Hublink service not found")]
    ServiceNotFound,

    #[error("characteristic {0:?} not found")]
    CharacteristicNotFound(CharacteristicRole),

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("link is not connected")]
    Disconnected,

    #[error(transparent)]
    Bluest(#[from] bluest::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// A physical (or simulated) radio adapter.
#[async_trait]
pub trait RadioAdapter: Send + Sync + fmt::Debug {
    /// Starts discovery. Dropping the returned stream ends the radio scan.
    async fn scan(&self, services: &[Uuid]) -> AdapterResult<BoxStream<'static, Advertisement>>;

    /// Connects to a previously advertised device and resolves the Hublink service.
    async fn connect(&self, address: &str) -> AdapterResult<Box<dyn RadioLink>>;
}

/// A live connection to one device.
#[async_trait]
pub trait RadioLink: Send + Sync {
    fn address(&self) -> &str;

    /// Largest payload one write can carry.
    fn transfer_unit(&self) -> usize;

    async fn is_connected(&self) -> bool;

    async fn read(&self, role: CharacteristicRole) -> AdapterResult<Vec<u8>>;

    async fn write(&self, role: CharacteristicRole, data: &[u8]) -> AdapterResult<()>;

    async fn disconnect(&self) -> AdapterResult<()>;

    /// Resolves when the adapter reports the link dropped without being asked to.
    async fn wait_for_loss(&self);
}
