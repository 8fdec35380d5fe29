/*!
 * Simulated Management Platform
 * In-process radio with scripted networks, for development and tests
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{EventMask, EventSink, Iface, MgmtEvent, MgmtEventKind, NetEvent, NetMgmt, WifiEvent};
use crate::error::PlatformError;
use crate::network::{ConnectParams, ScanResult, SecurityType};

pub const STATUS_WRONG_PASSWORD: i32 = 2;
pub const STATUS_AP_NOT_FOUND: i32 = 4;

/// Most recent requests kept for inspection.
pub const REQUEST_LOG_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimNetwork {
    pub ssid: String,
    #[serde(default)]
    pub psk: Option<String>,
    #[serde(default)]
    pub security: SecurityType,
    pub rssi: i32,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_channel() -> u8 {
    1
}

impl SimNetwork {
    fn accepts(&self, params: &ConnectParams) -> bool {
        match &self.psk {
            None => true,
            Some(psk) => params.psk.as_deref() == Some(psk.as_str()),
        }
    }

    fn scan_result(&self) -> ScanResult {
        ScanResult {
            ssid: self.ssid.clone(),
            security: self.security,
            rssi: self.rssi,
            channel: self.channel,
        }
    }
}

/// A request as the platform received it.
#[derive(Debug, Clone, PartialEq)]
pub enum MgmtRequest {
    Scan { iface: Iface },
    Connect { iface: Iface, params: ConnectParams },
    Disconnect { iface: Iface },
}

#[derive(Default)]
struct SimInner {
    sinks: Vec<(EventMask, EventSink)>,
    networks: Vec<SimNetwork>,
    requests: VecDeque<MgmtRequest>,
    associated: Option<String>,
    leases: u32,
    fail_scan: Option<PlatformError>,
    fail_connect: Option<PlatformError>,
    fail_disconnect: Option<PlatformError>,
}

impl SimInner {
    fn record(&mut self, request: MgmtRequest) {
        if self.requests.len() == REQUEST_LOG_LIMIT {
            self.requests.pop_front();
        }
        self.requests.push_back(request);
    }
}

pub struct SimulatedPlatform {
    iface: Option<Iface>,
    latency: Duration,
    dhcp_base: Ipv4Addr,
    auto_respond: bool,
    inner: Arc<Mutex<SimInner>>,
}

impl SimulatedPlatform {
    pub fn new(iface_name: &str) -> Self {
        Self {
            iface: Some(Iface {
                index: 1,
                name: iface_name.to_string(),
            }),
            latency: Duration::ZERO,
            dhcp_base: Ipv4Addr::new(192, 168, 1, 100),
            auto_respond: true,
            inner: Arc::new(Mutex::new(SimInner::default())),
        }
    }

    pub fn with_networks(self, networks: Vec<SimNetwork>) -> Self {
        self.inner.lock().networks = networks;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_dhcp_base(mut self, base: Ipv4Addr) -> Self {
        self.dhcp_base = base;
        self
    }

    /// Accept requests but never answer them; events only come from [`emit`](Self::emit).
    pub fn silent(mut self) -> Self {
        self.auto_respond = false;
        self
    }

    pub fn without_interface(mut self) -> Self {
        self.iface = None;
        self
    }

    pub fn fail_next_scan(&self, err: PlatformError) {
        self.inner.lock().fail_scan = Some(err);
    }

    pub fn fail_next_connect(&self, err: PlatformError) {
        self.inner.lock().fail_connect = Some(err);
    }

    pub fn fail_next_disconnect(&self, err: PlatformError) {
        self.inner.lock().fail_disconnect = Some(err);
    }

    /// Mark the radio associated without any event, as after a reboot.
    pub fn set_associated(&self, ssid: Option<&str>) {
        self.inner.lock().associated = ssid.map(str::to_string);
    }

    /// The last [`REQUEST_LOG_LIMIT`] requests, oldest first.
    pub fn requests(&self) -> Vec<MgmtRequest> {
        self.inner.lock().requests.iter().cloned().collect()
    }

    pub fn last_connect(&self) -> Option<ConnectParams> {
        self.inner.lock().requests.iter().rev().find_map(|req| match req {
            MgmtRequest::Connect { params, .. } => Some(params.clone()),
            _ => None,
        })
    }

    /// Deliver an event to every registered sink whose mask matches, right now.
    pub fn emit(&self, kind: MgmtEventKind) {
        let iface = self.iface.clone().unwrap_or(Iface {
            index: 0,
            name: String::new(),
        });
        deliver(&self.inner, &iface, vec![kind]);
    }

    fn schedule(&self, iface: &Iface, kinds: Vec<MgmtEventKind>) {
        if !self.auto_respond || kinds.is_empty() {
            return;
        }

        if self.latency.is_zero() {
            deliver(&self.inner, iface, kinds);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let iface = iface.clone();
                let latency = self.latency;
                handle.spawn(async move {
                    tokio::time::sleep(latency).await;
                    deliver(&inner, &iface, kinds);
                });
            }
            Err(_) => deliver(&self.inner, iface, kinds),
        }
    }

    fn next_lease(&self, inner: &mut SimInner) -> Ipv4Addr {
        let addr = Ipv4Addr::from(u32::from(self.dhcp_base).wrapping_add(inner.leases));
        inner.leases += 1;
        addr
    }
}

fn deliver(inner: &Mutex<SimInner>, iface: &Iface, kinds: Vec<MgmtEventKind>) {
    let mut inner = inner.lock();
    for kind in kinds {
        let code = kind.code();
        trace!("Simulated event 0x{:x} on {}", code, iface);
        let event = MgmtEvent {
            iface: iface.clone(),
            kind,
        };
        // Sinks whose receiver is gone are dropped.
        inner
            .sinks
            .retain(|(mask, sink)| !mask.matches(code) || sink.send(event.clone()).is_ok());
    }
}

impl NetMgmt for SimulatedPlatform {
    fn default_iface(&self) -> Option<Iface> {
        self.iface.clone()
    }

    fn add_event_callback(&self, mask: EventMask, sink: EventSink) -> Result<(), PlatformError> {
        debug!("Registered event sink for mask 0x{:x}", mask.bits());
        self.inner.lock().sinks.push((mask, sink));
        Ok(())
    }

    fn scan(&self, iface: &Iface) -> Result<(), PlatformError> {
        let kinds = {
            let mut inner = self.inner.lock();
            inner.record(MgmtRequest::Scan {
                iface: iface.clone(),
            });
            if let Some(err) = inner.fail_scan.take() {
                return Err(err);
            }

            let mut kinds: Vec<MgmtEventKind> = inner
                .networks
                .iter()
                .map(|network| MgmtEventKind::Wifi(WifiEvent::ScanResult(network.scan_result())))
                .collect();
            kinds.push(MgmtEventKind::Wifi(WifiEvent::ScanDone { status: 0 }));
            kinds
        };

        self.schedule(iface, kinds);
        Ok(())
    }

    fn connect(&self, iface: &Iface, params: &ConnectParams) -> Result<(), PlatformError> {
        let kinds = {
            let mut inner = self.inner.lock();
            inner.record(MgmtRequest::Connect {
                iface: iface.clone(),
                params: params.clone(),
            });
            if let Some(err) = inner.fail_connect.take() {
                return Err(err);
            }

            let status = match inner.networks.iter().find(|n| n.ssid == params.ssid) {
                None => STATUS_AP_NOT_FOUND,
                Some(network) if !network.accepts(params) => STATUS_WRONG_PASSWORD,
                Some(_) => 0,
            };

            let mut kinds = vec![MgmtEventKind::Wifi(WifiEvent::ConnectResult { status })];
            if status == 0 {
                inner.associated = Some(params.ssid.clone());
                let requested_ip = self.next_lease(&mut inner);
                kinds.push(MgmtEventKind::Net(NetEvent::Ipv4DhcpBound { requested_ip }));
            }
            kinds
        };

        self.schedule(iface, kinds);
        Ok(())
    }

    fn disconnect(&self, iface: &Iface) -> Result<(), PlatformError> {
        let kinds = {
            let mut inner = self.inner.lock();
            inner.record(MgmtRequest::Disconnect {
                iface: iface.clone(),
            });
            if let Some(err) = inner.fail_disconnect.take() {
                return Err(err);
            }
            if inner.associated.take().is_none() {
                return Err(PlatformError::Already);
            }
            vec![MgmtEventKind::Wifi(WifiEvent::DisconnectResult { status: 0 })]
        };

        self.schedule(iface, kinds);
        Ok(())
    }
}
