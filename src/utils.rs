use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use log::info;
use regex::Regex;
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.as_os_str().is_empty() && !path.exists() {
        fs::create_dir_all(path).await?;
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("MAC address pattern is valid")
    })
}

/// Pulls an `AA:BB:CC:DD:EE:FF` address out of a platform device identifier.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    mac_pattern()
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

/// Registry key for a platform device identifier.
pub fn normalize_address(device_id: &str) -> String {
    extract_mac_address(device_id).unwrap_or_else(|| device_id.to_string())
}
