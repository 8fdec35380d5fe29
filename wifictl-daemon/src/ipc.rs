/*!
 * IPC Server for the wifictl Daemon
 * JSON protocol over Unix socket
 */

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{WifiError, EINVAL, ENOEXEC};
use crate::network::{LinkState, ScanResult, SecurityType, WifiShim};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Scan,
    Connect {
        ssid: String,
        psk: Option<String>,
        #[serde(default)]
        security: SecurityType,
        /// Also wait for the connect result.
        #[serde(default)]
        wait: bool,
    },
    Disconnect,
    WaitConnect,
    WaitDhcp,
    Status,
    ReconnectSaved,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    ScanResults { networks: Vec<ScanResult> },
    Success { message: String },
    Error { code: i32, message: String },
    Status { status: StatusReport },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub link: LinkState,
    pub connected: bool,
    pub scan_running: bool,
    pub dhcp_address: Option<Ipv4Addr>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Link:      {:?}", self.link)?;
        writeln!(f, "Connected: {}", self.connected)?;
        writeln!(f, "Scanning:  {}", self.scan_running)?;
        match self.dhcp_address {
            Some(addr) => write!(f, "DHCP:      {}", addr),
            None => write!(f, "DHCP:      not configured"),
        }
    }
}

impl From<WifiError> for Response {
    fn from(err: WifiError) -> Self {
        Response::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

fn success(message: impl Into<String>) -> Response {
    Response::Success {
        message: message.into(),
    }
}

/// Answers requests against one shim on behalf of every client.
pub struct RequestHandler {
    shim: Arc<WifiShim>,
    scan_timeout: Duration,
    /// Scan results are broadcast to every subscriber, so only one client
    /// scans at a time.
    scan_lock: Mutex<()>,
}

pub struct IpcServer {
    listener: UnixListener,
    handler: Arc<RequestHandler>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, shim: Arc<WifiShim>, scan_timeout: Duration) -> Self {
        Self {
            listener,
            handler: Arc::new(RequestHandler::new(shim, scan_timeout)),
        }
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let session = Uuid::new_v4();
                    tracing::debug!(%session, "New client connected");
                    let handler = Arc::clone(&self.handler);

                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_client(stream, &handler).await {
                                tracing::error!("Client error: {}", e);
                            }
                        }
                        .instrument(tracing::debug_span!("client", %session)),
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(stream: UnixStream, handler: &RequestHandler) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request = line.trim();
        tracing::debug!("Received request: {}", request);

        let response = match serde_json::from_str::<Request>(request) {
            Ok(request) => handler.handle(request).await,
            Err(e) => Response::Error {
                code: -EINVAL,
                message: format!("invalid request: {}", e),
            },
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;

        line.clear();
    }

    tracing::debug!("Client disconnected");
    Ok(())
}

impl RequestHandler {
    pub fn new(shim: Arc<WifiShim>, scan_timeout: Duration) -> Self {
        Self {
            shim,
            scan_timeout,
            scan_lock: Mutex::new(()),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let shim = &self.shim;
        match request {
            Request::Scan => {
                let _scanning = self.scan_lock.lock().await;
                let mut results = shim.scan_results();
                if let Err(e) = shim.scan() {
                    return e.into();
                }
                if let Err(e) = shim.wait_for_scan_done_within(self.scan_timeout).await {
                    return e.into();
                }

                let mut networks = Vec::new();
                loop {
                    match results.try_recv() {
                        Ok(result) => networks.push(result),
                        Err(TryRecvError::Lagged(missed)) => {
                            tracing::warn!("Dropped {} scan results", missed);
                        }
                        Err(_) => break,
                    }
                }
                Response::ScanResults { networks }
            }
            Request::Connect {
                ssid,
                psk,
                security,
                wait,
            } => {
                if let Err(e) = shim.connect(&ssid, psk.as_deref(), security) {
                    return e.into();
                }
                if !wait {
                    return success(format!("Connection to {} requested", ssid));
                }
                match shim.wait_for_connect().await {
                    Ok(()) if shim.is_connected() => success(format!("Connected to {}", ssid)),
                    Ok(()) => Response::Error {
                        code: -ENOEXEC,
                        message: format!("Connection to {} failed", ssid),
                    },
                    Err(e) => e.into(),
                }
            }
            Request::Disconnect => match shim.disconnect() {
                Ok(()) => success("Disconnect requested"),
                Err(e) => e.into(),
            },
            Request::WaitConnect => match shim.wait_for_connect().await {
                Ok(()) => success(if shim.is_connected() {
                    "Connected"
                } else {
                    "Not connected"
                }),
                Err(e) => e.into(),
            },
            Request::WaitDhcp => match shim.wait_for_dhcp().await {
                Ok(()) => success(match shim.dhcp_address() {
                    Some(addr) => format!("DHCP address {}", addr),
                    None => "DHCP configured".to_string(),
                }),
                Err(e) => e.into(),
            },
            Request::Status => {
                let state = shim.state();
                Response::Status {
                    status: StatusReport {
                        link: state.link,
                        connected: state.link.is_connected(),
                        scan_running: state.scan.running,
                        dhcp_address: state.dhcp,
                    },
                }
            }
            Request::ReconnectSaved => match shim.reconnect_saved() {
                Ok(()) => success("Reconnect requested"),
                Err(e) => e.into(),
            },
        }
    }
}

/// Sends one request to a running daemon and reads its response.
pub async fn send_request(socket_path: &str, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();

    let mut request_json = serde_json::to_vec(request)?;
    request_json.push(b'\n');
    writer.write_all(&request_json).await?;

    let mut line = String::new();
    if BufReader::new(reader).read_line(&mut line).await? == 0 {
        bail!("daemon closed the connection without answering");
    }

    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDeviceConfig;
    use crate::network::WifiOptions;
    use crate::platform::{SimNetwork, SimulatedPlatform};

    fn shim() -> Arc<WifiShim> {
        shim_on(SimulatedPlatform::new("wlan0"))
    }

    fn shim_on(platform: SimulatedPlatform) -> Arc<WifiShim> {
        let platform = platform.with_networks(vec![SimNetwork {
            ssid: "Home".to_string(),
            psk: Some("secretpw".to_string()),
            security: SecurityType::Psk,
            rssi: -48,
            channel: 6,
        }]);
        Arc::new(
            WifiShim::init(
                Arc::new(platform),
                Arc::new(MemoryDeviceConfig::new()),
                WifiOptions::default(),
            )
            .unwrap(),
        )
    }

    fn handler() -> RequestHandler {
        RequestHandler::new(shim(), Duration::from_secs(5))
    }

    #[test]
    fn request_wire_format() {
        let request: Request =
            serde_json::from_str(r#"{"type":"Connect","ssid":"Home","psk":null}"#).unwrap();
        match request {
            Request::Connect {
                ssid,
                psk,
                security,
                wait,
            } => {
                assert_eq!(ssid, "Home");
                assert_eq!(psk, None);
                assert_eq!(security, SecurityType::None);
                assert!(!wait);
            }
            other => panic!("unexpected {:?}", other),
        }

        let json = serde_json::to_string(&Response::Error {
            code: -116,
            message: "DHCP configuration timed out after 30s".to_string(),
        })
        .unwrap();
        assert!(json.starts_with(r#"{"type":"Error","code":-116"#));
    }

    #[tokio::test]
    async fn scan_collects_results() {
        match handler().handle(Request::Scan).await {
            Response::ScanResults { networks } => {
                assert_eq!(networks.len(), 1);
                assert_eq!(networks[0].ssid, "Home");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_scans_see_only_their_own_results() {
        let shim = shim_on(SimulatedPlatform::new("wlan0").with_latency(Duration::from_millis(100)));
        let handler = RequestHandler::new(shim, Duration::from_secs(5));

        let (first, second) = tokio::join!(
            handler.handle(Request::Scan),
            handler.handle(Request::Scan)
        );
        for response in [first, second] {
            match response {
                Response::ScanResults { networks } => {
                    assert_eq!(networks.len(), 1);
                    assert_eq!(networks[0].ssid, "Home");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn connect_and_wait_then_status() {
        let handler = handler();
        let request = Request::Connect {
            ssid: "Home".to_string(),
            psk: Some("secretpw".to_string()),
            security: SecurityType::Psk,
            wait: true,
        };
        assert!(matches!(
            handler.handle(request).await,
            Response::Success { .. }
        ));

        handler.shim.wait_for_dhcp().await.unwrap();
        match handler.handle(Request::Status).await {
            Response::Status { status } => {
                assert!(status.connected);
                assert_eq!(status.link, LinkState::Connected);
                assert_eq!(status.dhcp_address, Some(Ipv4Addr::new(192, 168, 1, 100)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_association_is_reported() {
        let request = Request::Connect {
            ssid: "Home".to_string(),
            psk: Some("nope".to_string()),
            security: SecurityType::Psk,
            wait: true,
        };
        match handler().handle(request).await {
            Response::Error { code, .. } => assert_eq!(code, -8),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn round_trip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wifictl.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = IpcServer::new(listener, shim(), Duration::from_secs(5));
        let handle = tokio::spawn(server.run());

        let socket = socket.to_str().unwrap();
        match send_request(socket, &Request::Disconnect).await.unwrap() {
            Response::Success { message } => assert_eq!(message, "Disconnect requested"),
            other => panic!("unexpected {:?}", other),
        }
        match send_request(socket, &Request::ReconnectSaved).await.unwrap() {
            Response::Error { code, .. } => assert_eq!(code, -2),
            other => panic!("unexpected {:?}", other),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn malformed_request_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wifictl.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let handle = tokio::spawn(IpcServer::new(listener, shim(), Duration::from_secs(5)).run());

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"type\":\"Teleport\"}\n").await.unwrap();

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        match serde_json::from_str::<Response>(line.trim()).unwrap() {
            Response::Error { code, message } => {
                assert_eq!(code, -EINVAL);
                assert_eq!(code, -22);
                assert!(message.starts_with("invalid request"));
            }
            other => panic!("unexpected {:?}", other),
        }

        handle.abort();
    }
}
