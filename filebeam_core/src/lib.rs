use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod discovery;
pub mod error;
pub mod history;
pub mod protocol;
pub mod transfer;

use config::AppConfig;
use discovery::{DiscoveryResponder, ReceiverDevice};
use history::TransferRecord;
use transfer::TransferListener;

pub use error::TransferError;

//Command from front-end to Core
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Start the TCP listener and the discovery responder
    StartReceiver { port: u16, save_dir: PathBuf },
    /// Stop both; a no-op when they are not running
    StopReceiver,
    /// Run one discovery round
    SearchDevices,
    /// Send one file to a receiver
    SendFile {
        file: PathBuf,
        target_ip: String,
        port: u16,
    },
    /// Cancel the transfer being received and every send in flight
    CancelTransfer,
}

//Report from Core to front-end
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),
    Error(String),

    /// 0..=100. A 0 after a session means "idle".
    TransferProgress {
        percent: u8,
        is_sending: bool,
    },
    TransferCompleted(TransferRecord),
    TransferCancelled {
        is_sending: bool,
    },

    DevicesFound(Vec<ReceiverDevice>),

    ReceiverStarted {
        addr: SocketAddr,
    },
    ReceiverStopped,
}

pub async fn run_backend(
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    event_tx: mpsc::Sender<AppEvent>,
    config: AppConfig,
) {
    let device_name = config.device_name();
    let responder = DiscoveryResponder::new(event_tx.clone());
    let mut listener: Option<TransferListener> = None;
    let mut send_cancel = CancellationToken::new();

    tracing::info!("Backend ready. Device name: {}", device_name);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            AppCommand::StartReceiver { port, save_dir } => {
                if listener.is_some() {
                    let _ = event_tx
                        .send(AppEvent::Error("Receiver is already running.".to_string()))
                        .await;
                    continue;
                }

                let receiver = TransferListener::new(save_dir, config.transfer, event_tx.clone());
                let addr = match receiver.start(port).await {
                    Ok(addr) => addr,
                    Err(e) => {
                        tracing::error!("Failed to start receiver on port {}: {}", port, e);
                        let _ = event_tx
                            .send(AppEvent::Error(format!("Error starting receiver: {}", e)))
                            .await;
                        continue;
                    }
                };

                listener = Some(receiver);
                let _ = event_tx.send(AppEvent::ReceiverStarted { addr }).await;

                // the receiver stays up even if discovery cannot bind
                if let Err(e) = responder
                    .start(config.discovery_port, addr.port(), device_name.clone())
                    .await
                {
                    tracing::warn!("Discovery responder unavailable: {}", e);
                    let _ = event_tx
                        .send(AppEvent::Error(format!(
                            "Error starting discovery service: {}",
                            e
                        )))
                        .await;
                }
            }
            AppCommand::StopReceiver => {
                match listener.take() {
                    Some(receiver) => receiver.stop().await,
                    None => {
                        let _ = event_tx
                            .send(AppEvent::Status("Receiver is not running.".to_string()))
                            .await;
                    }
                }
                responder.stop().await;
                let _ = event_tx.send(AppEvent::ReceiverStopped).await;
            }
            AppCommand::SearchDevices => {
                let settings = config.discovery_settings();
                let evt = event_tx.clone();
                tokio::spawn(async move {
                    match discovery::search_devices(&settings, &evt).await {
                        Ok(devices) => {
                            let _ = evt.send(AppEvent::DevicesFound(devices)).await;
                        }
                        Err(e) => {
                            let _ = evt
                                .send(AppEvent::Error(format!(
                                    "Error during device discovery: {}",
                                    e
                                )))
                                .await;
                        }
                    }
                });
            }
            AppCommand::SendFile {
                file,
                target_ip,
                port,
            } => {
                tracing::info!(
                    "Initiating transfer of {} to {}:{}",
                    file.display(),
                    target_ip,
                    port
                );
                let evt = event_tx.clone();
                let settings = config.transfer;
                let cancel = send_cancel.child_token();
                tokio::spawn(async move {
                    // send_file reports its own outcome
                    let _ = transfer::send_file(&file, &target_ip, port, &settings, &evt, &cancel)
                        .await;
                });
            }
            AppCommand::CancelTransfer => {
                send_cancel.cancel();
                send_cancel = CancellationToken::new();
                if let Some(receiver) = &listener {
                    receiver.cancel_transfer();
                }
                let _ = event_tx
                    .send(AppEvent::Status("Task cancelled.".to_string()))
                    .await;
            }
        }
    }

    // front-end went away
    send_cancel.cancel();
    if let Some(receiver) = listener.take() {
        receiver.stop().await;
    }
    responder.stop().await;
    tracing::info!("Backend shut down");
}
