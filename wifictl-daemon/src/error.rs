/*!
 * Error types for the Wi-Fi control shim
 * errno-style codes for the management layer
 */

use std::time::Duration;
use thiserror::Error;

use crate::network::LinkState;

pub const ENOENT: i32 = 2;
pub const ENOEXEC: i32 = 8;
pub const EBUSY: i32 = 16;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const ETIMEDOUT: i32 = 116;
pub const EALREADY: i32 = 120;

/// Failure reported synchronously by the platform when a request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("operation already done")]
    Already,
    #[error("device busy")]
    Busy,
    #[error("request rejected ({0})")]
    Rejected(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Connect,
    Dhcp,
    ScanDone,
}

impl std::fmt::Display for WaitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitKind::Connect => write!(f, "connecting"),
            WaitKind::Dhcp => write!(f, "DHCP configuration"),
            WaitKind::ScanDone => write!(f, "scan"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WifiError {
    #[error("no network name given")]
    MissingSsid,

    #[error("no default network interface")]
    NoInterface,

    #[error("management request failed: {0}")]
    Exec(#[source] PlatformError),

    #[error("{what} timed out after {}s", .after.as_secs())]
    Timeout { what: WaitKind, after: Duration },

    #[error("another request is pending ({0:?})")]
    Busy(LinkState),

    #[error("already connected")]
    AlreadyConnected,

    #[error("no saved network")]
    NoSavedNetwork,
}

impl WifiError {
    /// Negative errno-style code reported to callers.
    pub fn code(&self) -> i32 {
        match self {
            WifiError::MissingSsid => -1,
            WifiError::NoInterface => -ENODEV,
            WifiError::Exec(_) => -ENOEXEC,
            WifiError::Timeout { .. } => -ETIMEDOUT,
            WifiError::Busy(_) => -EBUSY,
            WifiError::AlreadyConnected => -EALREADY,
            WifiError::NoSavedNetwork => -ENOENT,
        }
    }
}

pub type WifiResult<T> = Result<T, WifiError>;
