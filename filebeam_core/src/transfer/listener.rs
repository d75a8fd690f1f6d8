use crate::AppEvent;
use crate::config::TransferSettings;
use crate::error::{Result, TransferError};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::receiver::receive_file;

/// Back-off after a failed `accept` so a persistent error cannot spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receiver side TCP listener.
///
/// `STOPPED -> LISTENING -> STOPPED`. Connections are handled one at a time:
/// while a file is being received, further senders wait in the TCP backlog.
pub struct TransferListener {
    save_dir: PathBuf,
    settings: TransferSettings,
    event_tx: mpsc::Sender<AppEvent>,
    state: Mutex<Option<RunningListener>>,
    current_session: Arc<StdMutex<Option<CancellationToken>>>,
}

struct RunningListener {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything the accept loop needs, moved into its task.
struct AcceptContext {
    save_dir: PathBuf,
    settings: TransferSettings,
    event_tx: mpsc::Sender<AppEvent>,
    current_session: Arc<StdMutex<Option<CancellationToken>>>,
}

impl TransferListener {
    pub fn new(
        save_dir: PathBuf,
        settings: TransferSettings,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            save_dir,
            settings,
            event_tx,
            state: Mutex::new(None),
            current_session: Arc::new(StdMutex::new(None)),
        }
    }

    /// Listen on all interfaces.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        self.start_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .await
    }

    /// Bind `addr` and start accepting. Returns the bound address.
    pub async fn start_on(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            let _ = self
                .event_tx
                .send(AppEvent::Status("Receiver is already running.".to_string()))
                .await;
            return Err(TransferError::AlreadyRunning("Receiver"));
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransferError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let ctx = AcceptContext {
            save_dir: self.save_dir.clone(),
            settings: self.settings,
            event_tx: self.event_tx.clone(),
            current_session: self.current_session.clone(),
        };
        let task = tokio::spawn(accept_loop(listener, shutdown.clone(), ctx));

        info!("Receiver listening on {}", local_addr);
        let _ = self
            .event_tx
            .send(AppEvent::Status(format!(
                "File receiver started. Listening on port {}",
                local_addr.port()
            )))
            .await;

        *state = Some(RunningListener {
            local_addr,
            shutdown,
            task,
        });
        Ok(local_addr)
    }

    /// Close the listening socket and wait for the accept loop to exit.
    ///
    /// Cancels an in-flight transfer. Calling this while stopped does nothing.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            debug!("stop() on a receiver that is not running");
            return;
        };

        let _ = self
            .event_tx
            .send(AppEvent::Status("Stopping receiver...".to_string()))
            .await;

        running.shutdown.cancel();
        if let Err(e) = running.task.await {
            warn!("Accept loop ended abnormally: {}", e);
        }

        info!("Receiver on {} stopped", running.local_addr);
        let _ = self
            .event_tx
            .send(AppEvent::Status("Receiver stopped.".to_string()))
            .await;
    }

    /// Abort the transfer in progress, if any. The listener keeps accepting.
    pub fn cancel_transfer(&self) -> bool {
        match lock_session(&self.current_session).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }
}

impl Drop for TransferListener {
    fn drop(&mut self) {
        if let Some(running) = self.state.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}

fn lock_session(
    slot: &StdMutex<Option<CancellationToken>>,
) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn accept_loop(listener: TcpListener, shutdown: CancellationToken, ctx: AcceptContext) {
    loop {
        let _ = ctx
            .event_tx
            .send(AppEvent::Status(
                "Waiting for sender to connect...".to_string(),
            ))
            .await;

        let (mut stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
        };

        info!("Connection from {}", peer);
        let _ = ctx
            .event_tx
            .send(AppEvent::Status(format!(
                "Connection established with: {}",
                peer.ip()
            )))
            .await;

        let session_cancel = shutdown.child_token();
        *lock_session(&ctx.current_session) = Some(session_cancel.clone());

        // outcome is already reported on the event channel
        let _ = receive_file(
            &mut stream,
            &ctx.save_dir,
            &ctx.settings,
            &ctx.event_tx,
            &session_cancel,
        )
        .await;

        *lock_session(&ctx.current_session) = None;
        drop(stream);
    }

    debug!("Accept loop exited");
}
