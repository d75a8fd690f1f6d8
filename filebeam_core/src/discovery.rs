use crate::AppEvent;
use crate::config::DiscoverySettings;
use crate::error::{Result, TransferError};
use crate::protocol::{DISCOVERY_REQUEST, DiscoveryReply, MAX_DATAGRAM_SIZE, is_discovery_request};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

/// Pause after a failed `recv_from` so a persistent socket error cannot spin a loop
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A receiver found during a discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverDevice {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
}

impl fmt::Display for ReceiverDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.ip_address)
    }
}

/// Answers discovery probes on behalf of a running receiver.
pub struct DiscoveryResponder {
    event_tx: mpsc::Sender<AppEvent>,
    state: Mutex<Option<RunningResponder>>,
}

struct RunningResponder {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl DiscoveryResponder {
    pub fn new(event_tx: mpsc::Sender<AppEvent>) -> Self {
        Self {
            event_tx,
            state: Mutex::new(None),
        }
    }

    /// Listen for probes on `discovery_port` (all interfaces), advertising `tcp_port`.
    pub async fn start(
        &self,
        discovery_port: u16,
        tcp_port: u16,
        device_name: String,
    ) -> Result<SocketAddr> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, discovery_port));
        self.start_on(addr, tcp_port, device_name).await
    }

    pub async fn start_on(
        &self,
        addr: SocketAddr,
        tcp_port: u16,
        device_name: String,
    ) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(TransferError::AlreadyRunning("Discovery service"));
        }

        let reply = DiscoveryReply::new(&device_name, tcp_port);
        if reply.device_name != device_name {
            tracing::warn!(
                "Device name {:?} advertised as {:?}",
                device_name,
                reply.device_name
            );
        }
        let reply_bytes = reply.encode()?;

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransferError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(respond_loop(
            socket,
            reply_bytes,
            shutdown.clone(),
            self.event_tx.clone(),
        ));

        tracing::info!("Discovery responder listening on {}", local_addr);
        let _ = self
            .event_tx
            .send(AppEvent::Status(format!(
                "Discovery service started on port {}",
                local_addr.port()
            )))
            .await;

        *state = Some(RunningResponder {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Close the socket and wait for the loop to exit. No-op when stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return;
        };

        running.shutdown.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!("Discovery loop ended abnormally: {}", e);
        }

        tracing::info!("Discovery responder on {} stopped", running.local_addr);
        let _ = self
            .event_tx
            .send(AppEvent::Status("Discovery service stopped".to_string()))
            .await;
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        if let Some(running) = self.state.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}

async fn respond_loop(
    socket: UdpSocket,
    reply_bytes: Vec<u8>,
    shutdown: CancellationToken,
    event_tx: mpsc::Sender<AppEvent>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = recv_datagram(&socket, &mut buf) => res,
        };
        let Some((len, src)) = received else {
            continue;
        };

        if !is_discovery_request(&buf[..len]) {
            continue;
        }

        let _ = event_tx
            .send(AppEvent::Status(format!(
                "Discovery request from: {}",
                src.ip()
            )))
            .await;

        match socket.send_to(&reply_bytes, src).await {
            Ok(_) => {
                let _ = event_tx
                    .send(AppEvent::Status(format!(
                        "Sent availability response to: {}",
                        src.ip()
                    )))
                    .await;
            }
            Err(e) => tracing::warn!("Cannot answer probe from {}: {}", src, e),
        }
    }
}

/// One datagram, or `None` after a receive error.
async fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
    back_off_on_error(socket.recv_from(buf).await).await
}

/// Receive errors are logged and followed by a pause.
async fn back_off_on_error(
    received: std::io::Result<(usize, SocketAddr)>,
) -> Option<(usize, SocketAddr)> {
    match received {
        Ok(v) => Some(v),
        Err(e) => {
            // e.g. ICMP port unreachable surfacing as a reset on Windows
            tracing::debug!("Discovery receive error: {}", e);
            tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            None
        }
    }
}

/// Broadcast one probe and collect replies until the timeout elapses.
///
/// Malformed replies are dropped. Duplicates (one per interface) are kept.
/// No replies is an empty list, not an error.
pub async fn search_devices(
    settings: &DiscoverySettings,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<Vec<ReceiverDevice>> {
    let _ = event_tx
        .send(AppEvent::Status(
            "Searching for receiver devices...".to_string(),
        ))
        .await;

    let bind_addr = match settings.target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|source| TransferError::Bind {
            addr: bind_addr,
            source,
        })?;
    socket.set_broadcast(true)?;

    let _ = event_tx
        .send(AppEvent::Status("Sending discovery broadcast...".to_string()))
        .await;
    socket
        .send_to(DISCOVERY_REQUEST.as_bytes(), settings.target)
        .await?;

    let deadline = Instant::now() + settings.timeout;
    let mut devices = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, src) = match timeout_at(deadline, recv_datagram(&socket, &mut buf)).await {
            Err(_elapsed) => break,
            Ok(Some(v)) => v,
            Ok(None) => continue,
        };

        let Some(reply) = DiscoveryReply::parse(&buf[..len]) else {
            tracing::debug!("Dropping malformed discovery reply from {}", src);
            continue;
        };

        let device = ReceiverDevice {
            name: reply.device_name,
            ip_address: src.ip().to_string(),
            port: reply.tcp_port,
        };
        let _ = event_tx
            .send(AppEvent::Status(format!("Found receiver: {}", device)))
            .await;
        devices.push(device);
    }

    let _ = event_tx
        .send(AppEvent::Status(format!(
            "Discovery completed. Found {} receiver(s).",
            devices.len()
        )))
        .await;

    Ok(devices)
}
