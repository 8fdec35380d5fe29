/*!
 * Device Configuration Store
 * Remembers the last Wi-Fi credentials for reconnection
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::network::SecurityType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWifiConfig {
    pub ssid: String,
    pub psk: Option<String>,
    pub security: SecurityType,
    pub updated_at: DateTime<Utc>,
}

pub trait DeviceConfigStore: Send + Sync {
    /// Records the credentials of a connect attempt, whatever its outcome.
    fn set_wifi_config(&self, ssid: &str, psk: Option<&str>, security: SecurityType) -> Result<()>;

    fn wifi_config(&self) -> Result<Option<StoredWifiConfig>>;
}

fn stored(ssid: &str, psk: Option<&str>, security: SecurityType) -> StoredWifiConfig {
    StoredWifiConfig {
        ssid: ssid.to_string(),
        psk: psk.map(str::to_string),
        security,
        updated_at: Utc::now(),
    }
}

/// TOML file on disk, rewritten on every update.
pub struct FileDeviceConfig {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DeviceFile {
    wifi: Option<StoredWifiConfig>,
}

impl FileDeviceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<DeviceFile> {
        match fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("invalid device config {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceFile::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

impl DeviceConfigStore for FileDeviceConfig {
    fn set_wifi_config(&self, ssid: &str, psk: Option<&str>, security: SecurityType) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = DeviceFile {
            wifi: Some(stored(ssid, psk, security)),
        };
        fs::write(&self.path, toml::to_string_pretty(&file)?)
            .with_context(|| format!("writing {}", self.path.display()))?;

        tracing::debug!("Saved Wi-Fi config for {} to {}", ssid, self.path.display());
        Ok(())
    }

    fn wifi_config(&self) -> Result<Option<StoredWifiConfig>> {
        Ok(self.read()?.wifi)
    }
}

#[derive(Default)]
pub struct MemoryDeviceConfig {
    wifi: Mutex<Option<StoredWifiConfig>>,
}

impl MemoryDeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceConfigStore for MemoryDeviceConfig {
    fn set_wifi_config(&self, ssid: &str, psk: Option<&str>, security: SecurityType) -> Result<()> {
        *self.wifi.lock() = Some(stored(ssid, psk, security));
        Ok(())
    }

    fn wifi_config(&self) -> Result<Option<StoredWifiConfig>> {
        Ok(self.wifi.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceConfig::new(dir.path().join("state").join("device.toml"));

        assert_eq!(store.wifi_config().unwrap(), None);

        store
            .set_wifi_config("Home", Some("secretpw"), SecurityType::Psk)
            .unwrap();
        let saved = store.wifi_config().unwrap().unwrap();
        assert_eq!(saved.ssid, "Home");
        assert_eq!(saved.psk.as_deref(), Some("secretpw"));
        assert_eq!(saved.security, SecurityType::Psk);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        fs::write(&path, "wifi = 12").unwrap();

        assert!(FileDeviceConfig::new(path).wifi_config().is_err());
    }

    #[test]
    fn memory_store_keeps_latest() {
        let store = MemoryDeviceConfig::new();
        store.set_wifi_config("A", None, SecurityType::None).unwrap();
        store.set_wifi_config("B", Some("pw"), SecurityType::Sae).unwrap();
        assert_eq!(store.wifi_config().unwrap().unwrap().ssid, "B");
    }
}
