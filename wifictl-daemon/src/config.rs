use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::network::{SecurityType, WifiOptions};
use crate::platform::SimNetwork;

#[derive(Debug, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub device_config_path: String,
    pub wifi: WifiConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WifiConfig {
    pub auto_connect: bool,
    pub connect_timeout_secs: u64,
    pub dhcp_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    pub reset_dhcp_on_disconnect: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub interface: String,
    pub event_latency_ms: u64,
    pub dhcp_base: Ipv4Addr,
    pub networks: Vec<SimNetwork>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/wifictl/wifictl.sock".to_string(),
            device_config_path: "/var/lib/wifictl/device.toml".to_string(),
            wifi: WifiConfig {
                auto_connect: true,
                connect_timeout_secs: 30,
                dhcp_timeout_secs: 30,
                scan_timeout_secs: 30,
                reset_dhcp_on_disconnect: false,
            },
            simulation: SimulationConfig {
                interface: "wlan0".to_string(),
                event_latency_ms: 300,
                dhcp_base: Ipv4Addr::new(192, 168, 1, 100),
                networks: vec![
                    SimNetwork {
                        ssid: "Home".to_string(),
                        psk: Some("secretpw".to_string()),
                        security: SecurityType::Psk,
                        rssi: -48,
                        channel: 6,
                    },
                    SimNetwork {
                        ssid: "Guest".to_string(),
                        psk: None,
                        security: SecurityType::None,
                        rssi: -71,
                        channel: 11,
                    },
                ],
            },
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                let _ = fs::write(path, toml::to_string_pretty(&config)?);
                Ok(config)
            }
        }
    }

    pub fn wifi_options(&self) -> WifiOptions {
        WifiOptions {
            connect_timeout: Duration::from_secs(self.wifi.connect_timeout_secs),
            dhcp_timeout: Duration::from_secs(self.wifi.dhcp_timeout_secs),
            reset_dhcp_on_disconnect: self.wifi.reset_dhcp_on_disconnect,
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.wifi.scan_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wifictld.toml");
        let path = path.to_str().unwrap();

        let config = DaemonConfig::load(path).unwrap();
        assert_eq!(config.wifi.connect_timeout_secs, 30);
        assert!(!config.wifi.reset_dhcp_on_disconnect);

        let reloaded = DaemonConfig::load(path).unwrap();
        assert_eq!(reloaded.simulation.networks, config.simulation.networks);
        assert_eq!(reloaded.socket_path, config.socket_path);
    }

    #[test]
    fn parses_hand_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wifictld.toml");
        fs::write(
            &path,
            r#"
socket_path = "/tmp/wifictl.sock"
device_config_path = "/tmp/device.toml"

[wifi]
auto_connect = false
connect_timeout_secs = 10
dhcp_timeout_secs = 20
scan_timeout_secs = 5
reset_dhcp_on_disconnect = true

[simulation]
interface = "wlp2s0"
event_latency_ms = 0
dhcp_base = "10.0.0.50"

[[simulation.networks]]
ssid = "Lab"
psk = "hunter22"
security = "sae"
rssi = -40
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str().unwrap()).unwrap();
        let options = config.wifi_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.dhcp_timeout, Duration::from_secs(20));
        assert!(options.reset_dhcp_on_disconnect);
        assert_eq!(config.scan_timeout(), Duration::from_secs(5));

        let lab = &config.simulation.networks[0];
        assert_eq!(lab.security, SecurityType::Sae);
        assert_eq!(lab.channel, 1);
        assert_eq!(config.simulation.dhcp_base, Ipv4Addr::new(10, 0, 0, 50));
    }
}
