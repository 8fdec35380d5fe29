pub mod events;
pub mod wifi;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

pub use wifi::{WifiOptions, WifiShim};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityType {
    #[default]
    None,
    Psk,
    PskSha256,
    Sae,
    Wapi,
    Eap,
    Wep,
    WpaPsk,
    Unknown(i32),
}

impl SecurityType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => SecurityType::None,
            1 => SecurityType::Psk,
            2 => SecurityType::PskSha256,
            3 => SecurityType::Sae,
            4 => SecurityType::Wapi,
            5 => SecurityType::Eap,
            6 => SecurityType::Wep,
            7 => SecurityType::WpaPsk,
            other => SecurityType::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            SecurityType::None => 0,
            SecurityType::Psk => 1,
            SecurityType::PskSha256 => 2,
            SecurityType::Sae => 3,
            SecurityType::Wapi => 4,
            SecurityType::Eap => 5,
            SecurityType::Wep => 6,
            SecurityType::WpaPsk => 7,
            SecurityType::Unknown(code) => code,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityType::None => "OPEN",
            SecurityType::Psk => "WPA2-PSK",
            SecurityType::PskSha256 => "WPA2-PSK-SHA256",
            SecurityType::Sae => "WPA3-SAE",
            SecurityType::Wapi => "WAPI",
            SecurityType::Eap => "EAP",
            SecurityType::Wep => "WEP",
            SecurityType::WpaPsk => "WPA-PSK",
            SecurityType::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityType {
    type Err = String;

    /// Accepts a numeric code or a name such as `wpa2-psk`, `sae`, `open`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<i32>() {
            return Ok(SecurityType::from_code(code));
        }
        match s.to_ascii_lowercase().as_str() {
            "none" | "open" => Ok(SecurityType::None),
            "psk" | "wpa2" | "wpa2-psk" => Ok(SecurityType::Psk),
            "psk-sha256" | "wpa2-psk-sha256" => Ok(SecurityType::PskSha256),
            "sae" | "wpa3" | "wpa3-sae" => Ok(SecurityType::Sae),
            "wapi" => Ok(SecurityType::Wapi),
            "eap" => Ok(SecurityType::Eap),
            "wep" => Ok(SecurityType::Wep),
            "wpa" | "wpa-psk" => Ok(SecurityType::WpaPsk),
            other => Err(format!("unknown security type: {}", other)),
        }
    }
}

/// Channel code letting the platform pick any channel.
pub const CHANNEL_ANY: u8 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub ssid: String,
    pub psk: Option<String>,
    pub security: SecurityType,
    pub channel: u8,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Management frame protection offered as optional.
    pub mfp_optional: bool,
}

impl ConnectParams {
    /// Without a pre-shared key the request is always an open one, whatever
    /// security was asked for.
    pub fn new(ssid: &str, psk: Option<&str>, security: SecurityType) -> Self {
        let (psk, security) = match psk {
            Some(psk) => (Some(psk.to_string()), security),
            None => (None, SecurityType::None),
        };

        Self {
            ssid: ssid.to_string(),
            mfp_optional: psk.is_some(),
            psk,
            security,
            channel: CHANNEL_ANY,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub ssid: String,
    pub security: SecurityType,
    pub rssi: i32, // dBm
    pub channel: u8,
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SSID: {}, Security: {} ({}), RSSI: {} dBm",
            self.ssid,
            self.security,
            self.security.code(),
            self.rssi
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    pub fn is_connecting(self) -> bool {
        self == LinkState::Connecting
    }

    pub fn is_disconnecting(self) -> bool {
        self == LinkState::Disconnecting
    }

    pub fn is_connected(self) -> bool {
        self == LinkState::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanState {
    pub running: bool,
    pub results: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShimState {
    pub link: LinkState,
    pub scan: ScanState,
    pub dhcp: Option<Ipv4Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_ignores_requested_security() {
        for code in [0, 1, 3, 7, 42] {
            let params = ConnectParams::new("Home", None, SecurityType::from_code(code));
            assert_eq!(params.security, SecurityType::None);
            assert_eq!(params.psk, None);
            assert!(!params.mfp_optional);
        }
    }

    #[test]
    fn keyed_request_keeps_security() {
        let params = ConnectParams::new("Home", Some("secretpw"), SecurityType::Sae);
        assert_eq!(params.security, SecurityType::Sae);
        assert_eq!(params.psk.as_deref(), Some("secretpw"));
        assert!(params.mfp_optional);
        assert_eq!(params.channel, CHANNEL_ANY);
        assert_eq!(params.timeout, None);
    }

    #[test]
    fn scan_line_format() {
        let result = ScanResult {
            ssid: "Cafe".to_string(),
            security: SecurityType::Psk,
            rssi: -61,
            channel: 6,
        };
        assert_eq!(result.to_string(), "SSID: Cafe, Security: WPA2-PSK (1), RSSI: -61 dBm");
    }

    #[test]
    fn security_parsing() {
        assert_eq!("wpa2".parse::<SecurityType>(), Ok(SecurityType::Psk));
        assert_eq!("3".parse::<SecurityType>(), Ok(SecurityType::Sae));
        assert_eq!("99".parse::<SecurityType>(), Ok(SecurityType::Unknown(99)));
        assert!("rot13".parse::<SecurityType>().is_err());
    }
}
