//! Activity log and process logger setup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{error, info, warn, LevelFilter};
use serde::Serialize;

use crate::core::bluetooth::ACTIVITY_LOG_CAPACITY;

/// Initializes the process logger. `RUST_LOG` overrides `level`.
pub fn init(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
    if result.is_ok() {
        info!("Logging initialized");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A single operator-facing event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ActivityEvent {
    pub fn new(severity: Severity, message: impl Into<String>, address: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
            address: address.map(str::to_string),
        }
    }
}

/// Bounded in-memory ring of activity events, oldest evicted first.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    events: Mutex<VecDeque<ActivityEvent>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(ACTIVITY_LOG_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn append(&self, event: ActivityEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Appends an event and mirrors it to the process log.
    pub fn record(&self, severity: Severity, message: impl Into<String>, address: Option<&str>) {
        let event = ActivityEvent::new(severity, message, address);
        let target = event.address.as_deref().unwrap_or("-");
        match severity {
            Severity::Info | Severity::Success => info!("[{}] {}", target, event.message),
            Severity::Warning => warn!("[{}] {}", target, event.message),
            Severity::Error => error!("[{}] {}", target, event.message),
        }
        self.append(event);
    }

    pub fn info(&self, message: impl Into<String>, address: Option<&str>) {
        self.record(Severity::Info, message, address);
    }

    pub fn success(&self, message: impl Into<String>, address: Option<&str>) {
        self.record(Severity::Success, message, address);
    }

    pub fn warning(&self, message: impl Into<String>, address: Option<&str>) {
        self.record(Severity::Warning, message, address);
    }

    pub fn error(&self, message: impl Into<String>, address: Option<&str>) {
        self.record(Severity::Error, message, address);
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current events, oldest first.
    pub fn snapshot(&self) -> ActivitySnapshot {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        ActivitySnapshot {
            events: events.iter().cloned().collect(),
        }
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }
}

/// Point-in-time copy of the activity log. Iterate it as many times as needed.
#[derive(Debug, Clone)]
pub struct ActivitySnapshot {
    events: Arc<[ActivityEvent]>,
}

impl ActivitySnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, ActivityEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<'a> IntoIterator for &'a ActivitySnapshot {
    type Item = &'a ActivityEvent;
    type IntoIter = std::slice::Iter<'a, ActivityEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
