/*!
 * Network Management Platform Seam
 * Requests and asynchronous events of the OS Wi-Fi management subsystem
 */

pub mod sim;

use std::fmt;
use std::net::Ipv4Addr;
use std::ops::BitOr;
use tokio::sync::mpsc;

use crate::error::PlatformError;
use crate::network::{ConnectParams, ScanResult};

pub use sim::{SimNetwork, SimulatedPlatform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iface {
    pub index: u32,
    pub name: String,
}

impl fmt::Display for Iface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// Set of event codes a sink is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const WIFI_SCAN_RESULT: EventMask = EventMask(1 << 0);
    pub const WIFI_SCAN_DONE: EventMask = EventMask(1 << 1);
    pub const WIFI_CONNECT_RESULT: EventMask = EventMask(1 << 2);
    pub const WIFI_DISCONNECT_RESULT: EventMask = EventMask(1 << 3);
    pub const WIFI_TWT: EventMask = EventMask(1 << 4);
    pub const WIFI_RAW_SCAN_RESULT: EventMask = EventMask(1 << 5);
    pub const IPV4_DHCP_BOUND: EventMask = EventMask(1 << 16);

    pub const WIFI_MGMT: EventMask = EventMask(
        Self::WIFI_SCAN_RESULT.0
            | Self::WIFI_SCAN_DONE.0
            | Self::WIFI_CONNECT_RESULT.0
            | Self::WIFI_DISCONNECT_RESULT.0
            | Self::WIFI_TWT.0
            | Self::WIFI_RAW_SCAN_RESULT.0,
    );

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn matches(self, code: u32) -> bool {
        self.0 & code != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WifiEvent {
    ScanResult(ScanResult),
    ScanDone { status: i32 },
    ConnectResult { status: i32 },
    DisconnectResult { status: i32 },
    Twt,
    RawScanResult(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Ipv4DhcpBound { requested_ip: Ipv4Addr },
    Other { code: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MgmtEventKind {
    Wifi(WifiEvent),
    Net(NetEvent),
}

impl MgmtEventKind {
    /// Bus code of the event, as used for mask filtering.
    pub fn code(&self) -> u32 {
        match self {
            MgmtEventKind::Wifi(WifiEvent::ScanResult(_)) => EventMask::WIFI_SCAN_RESULT.bits(),
            MgmtEventKind::Wifi(WifiEvent::ScanDone { .. }) => EventMask::WIFI_SCAN_DONE.bits(),
            MgmtEventKind::Wifi(WifiEvent::ConnectResult { .. }) => {
                EventMask::WIFI_CONNECT_RESULT.bits()
            }
            MgmtEventKind::Wifi(WifiEvent::DisconnectResult { .. }) => {
                EventMask::WIFI_DISCONNECT_RESULT.bits()
            }
            MgmtEventKind::Wifi(WifiEvent::Twt) => EventMask::WIFI_TWT.bits(),
            MgmtEventKind::Wifi(WifiEvent::RawScanResult(_)) => {
                EventMask::WIFI_RAW_SCAN_RESULT.bits()
            }
            MgmtEventKind::Net(NetEvent::Ipv4DhcpBound { .. }) => {
                EventMask::IPV4_DHCP_BOUND.bits()
            }
            MgmtEventKind::Net(NetEvent::Other { code }) => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MgmtEvent {
    pub iface: Iface,
    pub kind: MgmtEventKind,
}

pub type EventSink = mpsc::UnboundedSender<MgmtEvent>;

/// The OS network management subsystem.
///
/// Requests only enqueue work: completion is reported later as events on the
/// sinks registered with [`NetMgmt::add_event_callback`]. Events may be
/// delivered from any thread.
pub trait NetMgmt: Send + Sync {
    fn default_iface(&self) -> Option<Iface>;

    fn add_event_callback(&self, mask: EventMask, sink: EventSink) -> Result<(), PlatformError>;

    fn scan(&self, iface: &Iface) -> Result<(), PlatformError>;

    fn connect(&self, iface: &Iface, params: &ConnectParams) -> Result<(), PlatformError>;

    fn disconnect(&self, iface: &Iface) -> Result<(), PlatformError>;
}
