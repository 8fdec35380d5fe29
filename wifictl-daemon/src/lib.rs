/*!
 * wifictl
 * Event-driven control of the platform Wi-Fi management subsystem
 */

pub mod config;
pub mod device;
pub mod error;
pub mod ipc;
pub mod network;
pub mod platform;

pub use error::{PlatformError, WifiError, WifiResult};
pub use network::{LinkState, ScanResult, SecurityType, ShimState, WifiOptions, WifiShim};
