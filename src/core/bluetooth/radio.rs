//! Exclusive ownership of the single radio adapter.
//!
//! Whoever holds a [`RadioLease`] owns the adapter: the scanner for the whole
//! of a scan session, the connection manager for one connect, read, write or
//! disconnect sequence. No two holders can exist at once.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::bluetooth::adapter::RadioAdapter;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioHolder {
    Scanner,
    Connection,
}

impl fmt::Display for RadioHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanner => f.write_str("scan session"),
            Self::Connection => f.write_str("connection"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Radio {
    adapter: Option<Arc<dyn RadioAdapter>>,
    lock: Arc<AsyncMutex<()>>,
    holder: Arc<Mutex<Option<RadioHolder>>>,
}

impl Radio {
    pub fn new(adapter: Option<Arc<dyn RadioAdapter>>) -> Self {
        Self {
            adapter,
            lock: Arc::new(AsyncMutex::new(())),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn holder(&self) -> Option<RadioHolder> {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn adapter(&self) -> SessionResult<Arc<dyn RadioAdapter>> {
        self.adapter
            .clone()
            .ok_or_else(|| SessionError::AdapterUnavailable("no Bluetooth adapter".to_string()))
    }

    /// Takes the adapter now or fails with `AdapterUnavailable`.
    pub fn try_acquire(&self, holder: RadioHolder) -> SessionResult<RadioLease> {
        let adapter = self.adapter()?;
        let guard = self.lock.clone().try_lock_owned().map_err(|_| {
            let current = self
                .holder()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "another operation".to_string());
            SessionError::AdapterUnavailable(format!("radio is held by {current}"))
        })?;
        Ok(self.lease(adapter, guard, holder))
    }

    /// Waits until the adapter is free.
    pub async fn acquire(&self, holder: RadioHolder) -> SessionResult<RadioLease> {
        let adapter = self.adapter()?;
        let guard = self.lock.clone().lock_owned().await;
        Ok(self.lease(adapter, guard, holder))
    }

    fn lease(
        &self,
        adapter: Arc<dyn RadioAdapter>,
        guard: OwnedMutexGuard<()>,
        holder: RadioHolder,
    ) -> RadioLease {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(holder);
        debug!("Radio acquired by {}", holder);
        RadioLease {
            adapter,
            holder,
            holder_slot: self.holder.clone(),
            _guard: guard,
        }
    }
}

/// Exclusive access to the adapter, released on drop.
pub struct RadioLease {
    adapter: Arc<dyn RadioAdapter>,
    holder: RadioHolder,
    holder_slot: Arc<Mutex<Option<RadioHolder>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Deref for RadioLease {
    type Target = dyn RadioAdapter;

    fn deref(&self) -> &Self::Target {
        self.adapter.as_ref()
    }
}

impl Drop for RadioLease {
    fn drop(&mut self) {
        *self.holder_slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Radio released by {}", self.holder);
    }
}
