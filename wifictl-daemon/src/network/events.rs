/*!
 * Management Event Handlers
 * Drive the shim state from platform events
 */

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::{LinkState, ScanResult, ShimState};
use crate::platform::{MgmtEvent, MgmtEventKind, NetEvent, WifiEvent};

/// Applies a Wi-Fi management event. Returns whether the state changed.
pub fn apply_wifi_event(state: &mut ShimState, event: &WifiEvent, reset_dhcp_on_disconnect: bool) -> bool {
    match event {
        WifiEvent::ScanResult(_) => {
            state.scan.results += 1;
            true
        }
        WifiEvent::ScanDone { status } => {
            if *status != 0 {
                error!("Scan request failed ({})", status);
            } else {
                debug!("Scan done, {} results", state.scan.results);
            }
            state.scan.results = 0;
            state.scan.running = false;
            true
        }
        WifiEvent::ConnectResult { status } => match state.link {
            LinkState::Disconnecting => {
                debug!("Connection result ({}) ignored, disconnect pending", status);
                false
            }
            LinkState::Connected => {
                debug!("Connection result ({}) while already connected", status);
                false
            }
            LinkState::Connecting | LinkState::Idle => {
                if *status != 0 {
                    debug!("Connection request failed ({})", status);
                    state.link = LinkState::Idle;
                } else {
                    debug!("Connected");
                    state.link = LinkState::Connected;
                }
                true
            }
        },
        WifiEvent::DisconnectResult { status } => {
            if state.link.is_disconnecting() {
                debug!(
                    "Disconnection request {} ({})",
                    if *status != 0 { "failed" } else { "done" },
                    status
                );
                state.link = LinkState::Idle;
                if reset_dhcp_on_disconnect {
                    state.dhcp = None;
                }
                true
            } else {
                debug!("Disconnected");
                false
            }
        }
        WifiEvent::Twt | WifiEvent::RawScanResult(_) => false,
    }
}

/// Applies a network (IP layer) event. Returns whether the state changed.
pub fn apply_net_event(state: &mut ShimState, event: &NetEvent) -> bool {
    match event {
        NetEvent::Ipv4DhcpBound { requested_ip } => {
            info!("DHCP IP address: {}", requested_ip);
            state.dhcp = Some(*requested_ip);
            true
        }
        NetEvent::Other { code } => {
            warn!("Unhandled event: 0x{:x}", code);
            false
        }
    }
}

pub(crate) struct EventHandler {
    pub state: Arc<watch::Sender<ShimState>>,
    pub scans: broadcast::Sender<ScanResult>,
    pub reset_dhcp_on_disconnect: bool,
}

impl EventHandler {
    pub fn handle_wifi(&self, event: &MgmtEvent) {
        let MgmtEventKind::Wifi(wifi) = &event.kind else {
            trace!("Ignoring 0x{:x} on Wi-Fi sink", event.kind.code());
            return;
        };

        if let WifiEvent::ScanResult(result) = wifi {
            info!("{}", result);
            // Nobody listening is fine.
            let _ = self.scans.send(result.clone());
        }

        self.state
            .send_if_modified(|state| apply_wifi_event(state, wifi, self.reset_dhcp_on_disconnect));
    }

    pub fn handle_net(&self, event: &MgmtEvent) {
        match &event.kind {
            MgmtEventKind::Net(net) => {
                self.state.send_if_modified(|state| apply_net_event(state, net));
            }
            other => warn!("Unhandled event: 0x{:x}", other.code()),
        }
    }

    pub async fn run_wifi(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<MgmtEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_wifi(&event);
        }
        debug!("Wi-Fi event sink closed");
    }

    pub async fn run_net(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<MgmtEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_net(&event);
        }
        debug!("Network event sink closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SecurityType;
    use crate::platform::Iface;
    use std::net::Ipv4Addr;

    fn connected() -> ShimState {
        ShimState {
            link: LinkState::Connected,
            ..Default::default()
        }
    }

    #[test]
    fn unsolicited_disconnect_keeps_connection() {
        let mut state = connected();
        let changed = apply_wifi_event(&mut state, &WifiEvent::DisconnectResult { status: 0 }, true);
        assert!(!changed);
        assert_eq!(state.link, LinkState::Connected);
    }

    #[test]
    fn requested_disconnect_completes_even_on_failure_status() {
        let mut state = ShimState {
            link: LinkState::Disconnecting,
            dhcp: Some(Ipv4Addr::new(10, 0, 0, 7)),
            ..Default::default()
        };
        apply_wifi_event(&mut state, &WifiEvent::DisconnectResult { status: -5 }, false);
        assert_eq!(state.link, LinkState::Idle);
        assert_eq!(state.dhcp, Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn dhcp_reset_is_opt_in() {
        let mut state = ShimState {
            link: LinkState::Disconnecting,
            dhcp: Some(Ipv4Addr::new(10, 0, 0, 7)),
            ..Default::default()
        };
        apply_wifi_event(&mut state, &WifiEvent::DisconnectResult { status: 0 }, true);
        assert_eq!(state.dhcp, None);
    }

    #[test]
    fn connect_result_settles_connecting() {
        let mut state = ShimState {
            link: LinkState::Connecting,
            ..Default::default()
        };
        apply_wifi_event(&mut state, &WifiEvent::ConnectResult { status: 0 }, false);
        assert_eq!(state.link, LinkState::Connected);

        let mut state = ShimState {
            link: LinkState::Connecting,
            ..Default::default()
        };
        apply_wifi_event(&mut state, &WifiEvent::ConnectResult { status: 2 }, false);
        assert_eq!(state.link, LinkState::Idle);
    }

    #[test]
    fn connect_result_does_not_cancel_pending_disconnect() {
        let mut state = ShimState {
            link: LinkState::Disconnecting,
            ..Default::default()
        };
        assert!(!apply_wifi_event(&mut state, &WifiEvent::ConnectResult { status: 0 }, false));
        assert_eq!(state.link, LinkState::Disconnecting);
    }

    #[test]
    fn scan_counter_resets_on_done() {
        let mut state = ShimState::default();
        state.scan.running = true;
        let result = WifiEvent::ScanResult(ScanResult {
            ssid: "Cafe".to_string(),
            security: SecurityType::None,
            rssi: -70,
            channel: 1,
        });
        apply_wifi_event(&mut state, &result, false);
        apply_wifi_event(&mut state, &result, false);
        assert_eq!(state.scan.results, 2);

        apply_wifi_event(&mut state, &WifiEvent::ScanDone { status: -1 }, false);
        assert_eq!(state.scan.results, 0);
        assert!(!state.scan.running);
    }

    #[test]
    fn twt_is_ignored() {
        let mut state = connected();
        assert!(!apply_wifi_event(&mut state, &WifiEvent::Twt, false));
        assert_eq!(state, connected());
    }

    #[test]
    fn only_dhcp_bound_is_handled() {
        let mut state = ShimState::default();
        assert!(!apply_net_event(&mut state, &NetEvent::Other { code: 0x40 }));
        assert_eq!(state.dhcp, None);

        let ip = Ipv4Addr::new(192, 168, 4, 20);
        assert!(apply_net_event(&mut state, &NetEvent::Ipv4DhcpBound { requested_ip: ip }));
        assert_eq!(state.dhcp, Some(ip));
    }

    #[test]
    fn handler_publishes_scan_results() {
        let (state, _) = watch::channel(ShimState::default());
        let (scans, mut rx) = broadcast::channel(4);
        let handler = EventHandler {
            state: Arc::new(state),
            scans,
            reset_dhcp_on_disconnect: false,
        };

        let result = ScanResult {
            ssid: "Lab".to_string(),
            security: SecurityType::Sae,
            rssi: -55,
            channel: 36,
        };
        handler.handle_wifi(&MgmtEvent {
            iface: Iface {
                index: 1,
                name: "wlan0".to_string(),
            },
            kind: MgmtEventKind::Wifi(WifiEvent::ScanResult(result.clone())),
        });

        assert_eq!(rx.try_recv().unwrap(), result);
        assert_eq!(handler.state.borrow().scan.results, 1);
    }
}
