/*!
 * WiFi Control Shim
 * Scan, connect and disconnect requests plus wait helpers over the
 * platform's management events
 */

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::EventHandler;
use super::{ConnectParams, LinkState, ScanResult, SecurityType, ShimState};
use crate::device::DeviceConfigStore;
use crate::error::{PlatformError, WaitKind, WifiError, WifiResult};
use crate::platform::{EventMask, Iface, NetMgmt};

const SCAN_RESULT_BACKLOG: usize = 64;

#[derive(Debug, Clone)]
pub struct WifiOptions {
    pub connect_timeout: Duration,
    pub dhcp_timeout: Duration,
    /// Forget the DHCP lease once a requested disconnect completes.
    pub reset_dhcp_on_disconnect: bool,
}

impl Default for WifiOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            dhcp_timeout: Duration::from_secs(30),
            reset_dhcp_on_disconnect: false,
        }
    }
}

pub struct WifiShim {
    mgmt: Arc<dyn NetMgmt>,
    device: Arc<dyn DeviceConfigStore>,
    handler: Arc<EventHandler>,
    options: WifiOptions,
    /// Link state before the pending disconnect request was first issued.
    before_disconnect: Mutex<LinkState>,
    tasks: Vec<JoinHandle<()>>,
}

impl WifiShim {
    /// Registers the two event sinks and starts their handlers.
    ///
    /// Must be called from within a tokio runtime, before any request.
    pub fn init(
        mgmt: Arc<dyn NetMgmt>,
        device: Arc<dyn DeviceConfigStore>,
        options: WifiOptions,
    ) -> WifiResult<Self> {
        let (state, _) = watch::channel(ShimState::default());
        let (scans, _) = broadcast::channel(SCAN_RESULT_BACKLOG);
        let handler = Arc::new(EventHandler {
            state: Arc::new(state),
            scans,
            reset_dhcp_on_disconnect: options.reset_dhcp_on_disconnect,
        });

        let (wifi_tx, wifi_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        mgmt.add_event_callback(EventMask::WIFI_MGMT, wifi_tx)
            .map_err(WifiError::Exec)?;
        mgmt.add_event_callback(EventMask::IPV4_DHCP_BOUND, net_tx)
            .map_err(WifiError::Exec)?;

        let tasks = vec![
            tokio::spawn(Arc::clone(&handler).run_wifi(wifi_rx)),
            tokio::spawn(Arc::clone(&handler).run_net(net_rx)),
        ];

        Ok(Self {
            mgmt,
            device,
            handler,
            options,
            before_disconnect: Mutex::new(LinkState::Idle),
            tasks,
        })
    }

    fn state_tx(&self) -> &watch::Sender<ShimState> {
        &self.handler.state
    }

    fn iface(&self) -> WifiResult<Iface> {
        self.mgmt.default_iface().ok_or(WifiError::NoInterface)
    }

    pub fn scan(&self) -> WifiResult<()> {
        let iface = self.iface()?;

        // Marked before issuing so a fast scan-done cannot be overwritten.
        // A rejected request leaves it set.
        self.state_tx().send_modify(|state| state.scan.running = true);

        if let Err(e) = self.mgmt.scan(&iface) {
            error!("Scan request failed: {}", e);
            return Err(WifiError::Exec(e));
        }

        info!("Scan requested on {}", iface);
        Ok(())
    }

    /// Waits for the running scan to finish. Never returns if the platform
    /// never reports scan-done.
    pub async fn wait_for_scan_done(&self) {
        state_reaches(self.subscribe(), |state| !state.scan.running).await;
    }

    pub async fn wait_for_scan_done_within(&self, deadline: Duration) -> WifiResult<()> {
        self.wait_until(WaitKind::ScanDone, deadline, |state| !state.scan.running)
            .await
    }

    /// Requests association with `ssid`.
    ///
    /// Without a `psk` the request is always open. The credentials are handed
    /// to the device configuration store before the request is issued.
    pub fn connect(&self, ssid: &str, psk: Option<&str>, security: SecurityType) -> WifiResult<()> {
        if ssid.is_empty() {
            return Err(WifiError::MissingSsid);
        }
        let iface = self.iface()?;
        let params = ConnectParams::new(ssid, psk, security);

        let mut current = LinkState::Idle;
        let claimed = self.state_tx().send_if_modified(|state| {
            current = state.link;
            if state.link == LinkState::Idle {
                state.link = LinkState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(match current {
                LinkState::Connected => WifiError::AlreadyConnected,
                other => WifiError::Busy(other),
            });
        }

        debug!(
            ssid = %params.ssid,
            security = %params.security,
            psk = params.psk.is_some(),
            "Connecting"
        );

        if let Err(e) = self.device.set_wifi_config(ssid, psk, security) {
            warn!("Failed to save Wi-Fi config: {:#}", e);
        }

        if let Err(e) = self.mgmt.connect(&iface, &params) {
            debug!("Connection request failed: {}", e);
            self.state_tx().send_if_modified(|state| {
                if state.link.is_connecting() {
                    state.link = LinkState::Idle;
                    true
                } else {
                    false
                }
            });
            return Err(WifiError::Exec(e));
        }

        debug!("Connection requested");
        Ok(())
    }

    /// Connects with the credentials last saved by [`connect`](Self::connect).
    pub fn reconnect_saved(&self) -> WifiResult<()> {
        let saved = match self.device.wifi_config() {
            Ok(Some(saved)) => saved,
            Ok(None) => return Err(WifiError::NoSavedNetwork),
            Err(e) => {
                warn!("Failed to read saved Wi-Fi config: {:#}", e);
                return Err(WifiError::NoSavedNetwork);
            }
        };

        info!("Reconnecting to saved network {}", saved.ssid);
        self.connect(&saved.ssid, saved.psk.as_deref(), saved.security)
    }

    pub fn disconnect(&self) -> WifiResult<()> {
        let iface = self.iface()?;

        self.state_tx().send_modify(|state| {
            if !state.link.is_disconnecting() {
                *self.before_disconnect.lock() = state.link;
            }
            state.link = LinkState::Disconnecting;
        });

        match self.mgmt.disconnect(&iface) {
            Ok(()) => {
                info!("Disconnect requested");
                Ok(())
            }
            Err(PlatformError::Already) => {
                info!("Already disconnected");
                self.settle_disconnecting(LinkState::Idle);
                Ok(())
            }
            Err(e) => {
                error!("Disconnect request failed: {}", e);
                // A connect-result arriving while disconnecting was dropped,
                // so only an established link survives.
                let restore = if self.before_disconnect.lock().is_connected() {
                    LinkState::Connected
                } else {
                    LinkState::Idle
                };
                self.settle_disconnecting(restore);
                Err(WifiError::Exec(e))
            }
        }
    }

    fn settle_disconnecting(&self, to: LinkState) {
        self.state_tx().send_if_modified(|state| {
            if state.link.is_disconnecting() {
                state.link = to;
                true
            } else {
                false
            }
        });
    }

    /// Waits until no connect request is pending.
    ///
    /// Success only means the request settled; check [`is_connected`](Self::is_connected)
    /// for its outcome.
    pub async fn wait_for_connect(&self) -> WifiResult<()> {
        debug!("Waiting for connection to be established");
        self.wait_until(WaitKind::Connect, self.options.connect_timeout, |state| {
            !state.link.is_connecting()
        })
        .await?;
        info!("Connecting established");
        Ok(())
    }

    pub async fn wait_for_dhcp(&self) -> WifiResult<()> {
        debug!("Waiting for DHCP to be configured");
        self.wait_until(WaitKind::Dhcp, self.options.dhcp_timeout, |state| {
            state.dhcp.is_some()
        })
        .await?;
        info!("DHCP configuration established");
        Ok(())
    }

    async fn wait_until(
        &self,
        what: WaitKind,
        deadline: Duration,
        cond: impl Fn(&ShimState) -> bool + Send,
    ) -> WifiResult<()> {
        match tokio::time::timeout(deadline, state_reaches(self.subscribe(), cond)).await {
            Ok(()) => Ok(()),
            Err(_) => {
                error!("{} timed out", what);
                Err(WifiError::Timeout {
                    what,
                    after: deadline,
                })
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx().borrow().link.is_connected()
    }

    pub fn state(&self) -> ShimState {
        *self.state_tx().borrow()
    }

    pub fn dhcp_address(&self) -> Option<Ipv4Addr> {
        self.state_tx().borrow().dhcp
    }

    pub fn subscribe(&self) -> watch::Receiver<ShimState> {
        self.state_tx().subscribe()
    }

    /// Scan results as they arrive. Results nobody receives are dropped.
    pub fn scan_results(&self) -> broadcast::Receiver<ScanResult> {
        self.handler.scans.subscribe()
    }
}

impl Drop for WifiShim {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn state_reaches(mut rx: watch::Receiver<ShimState>, cond: impl Fn(&ShimState) -> bool) {
    loop {
        let state = *rx.borrow_and_update();
        if cond(&state) {
            return;
        }
        if rx.changed().await.is_err() {
            // The state can no longer change.
            std::future::pending::<()>().await;
        }
    }
}
