use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{DEFAULT_NAME_FILTER, DEFAULT_SCAN_DURATION_SECS};

/// Configuration for advertisement scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Substring matched (case-insensitively) against advertised names
    pub name_filter: String,
    /// How long a scan session runs unless stopped
    pub scan_duration_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
        }
    }
}

impl ScannerConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}
