use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use filebeam_core::config::AppConfig;
use filebeam_core::{AppCommand, AppEvent, run_backend};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod output;

use output::{print_devices, print_event};

#[derive(Debug, Parser)]
#[command(name = "filebeam", version, about = "Send files to machines on the same network")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for incoming files until Ctrl-C
    Receive {
        /// TCP port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory received files are saved to
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Send a file; without --to the first receiver found on the network is used
    Send {
        file: PathBuf,
        /// Receiver IP address or host name
        #[arg(long)]
        to: Option<String>,
        /// Receiver TCP port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List receivers on the local network
    Scan {
        /// Seconds to wait for replies
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Show or change the saved settings
    Config {
        /// Name other machines see when scanning
        #[arg(long)]
        name: Option<String>,
        /// Default directory for received files
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Default TCP port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 0. Initialize logging (RUST_LOG overrides)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load();
    tracing::debug!("Loaded config: {:?}", config);

    match &cli.command {
        Command::Scan {
            timeout: Some(secs),
        } => config.discovery_timeout_ms = timeout_millis(*secs),
        Command::Config { name, dir, port } => {
            return edit_config(config, name.clone(), dir.clone(), *port);
        }
        _ => {}
    }

    let (cmd_tx, cmd_rx) = mpsc::channel::<AppCommand>(100);
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(1000);

    let backend = tokio::spawn(run_backend(cmd_rx, event_tx, config.clone()));

    let outcome = match cli.command {
        Command::Receive { port, dir } => {
            let port = port.unwrap_or(config.transfer_port);
            let save_dir = dir.unwrap_or_else(|| config.download_path.clone());
            receive(&cmd_tx, &mut event_rx, port, save_dir).await
        }
        Command::Send { file, to, port } => {
            let port = port.unwrap_or(config.transfer_port);
            send(&cmd_tx, &mut event_rx, file, to, port).await
        }
        Command::Scan { .. } => scan(&cmd_tx, &mut event_rx).await,
        Command::Config { .. } => Ok(()),
    };

    drop(cmd_tx);
    // drain so the backend never blocks on a full channel while shutting down
    while event_rx.recv().await.is_some() {}
    let _ = backend.await;
    outcome
}

async fn receive(
    cmd_tx: &mpsc::Sender<AppCommand>,
    event_rx: &mut mpsc::Receiver<AppEvent>,
    port: u16,
    save_dir: PathBuf,
) -> Result<()> {
    println!("Saving files to {}", save_dir.display());
    cmd_tx
        .send(AppCommand::StartReceiver { port, save_dir })
        .await?;

    let mut started = false;
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                cmd_tx.send(AppCommand::StopReceiver).await?;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match &event {
                    AppEvent::ReceiverStarted { addr } => {
                        started = true;
                        let ip = output::local_lan_ip()
                            .unwrap_or_else(|| addr.ip().to_string());
                        println!(
                            "Ready. Senders can reach this machine at {}:{}",
                            ip,
                            addr.port()
                        );
                    }
                    AppEvent::ReceiverStopped => break,
                    AppEvent::Error(msg) if !started => bail!("{}", msg),
                    _ => print_event(&event),
                }
            }
        }
    }
    Ok(())
}

async fn send(
    cmd_tx: &mpsc::Sender<AppCommand>,
    event_rx: &mut mpsc::Receiver<AppEvent>,
    file: PathBuf,
    to: Option<String>,
    port: u16,
) -> Result<()> {
    let (target_ip, port) = match to {
        Some(ip) => (ip, port),
        None => {
            let devices = discover(cmd_tx, event_rx).await?;
            let Some(device) = devices.into_iter().next() else {
                bail!("No receivers found on the network");
            };
            println!("Using receiver {}", device);
            (device.ip_address, device.port)
        }
    };

    cmd_tx
        .send(AppCommand::SendFile {
            file,
            target_ip,
            port,
        })
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cmd_tx.send(AppCommand::CancelTransfer).await?;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { bail!("Backend stopped unexpectedly") };
                match event {
                    AppEvent::TransferCompleted(record) => {
                        println!("Done: {}", record);
                        return Ok(());
                    }
                    AppEvent::TransferCancelled { .. } => bail!("Transfer cancelled"),
                    AppEvent::Error(msg) => bail!("{}", msg),
                    other => print_event(&other),
                }
            }
        }
    }
}

async fn scan(
    cmd_tx: &mpsc::Sender<AppCommand>,
    event_rx: &mut mpsc::Receiver<AppEvent>,
) -> Result<()> {
    let devices = discover(cmd_tx, event_rx).await?;
    print_devices(&devices);
    Ok(())
}

async fn discover(
    cmd_tx: &mpsc::Sender<AppCommand>,
    event_rx: &mut mpsc::Receiver<AppEvent>,
) -> Result<Vec<filebeam_core::discovery::ReceiverDevice>> {
    cmd_tx.send(AppCommand::SearchDevices).await?;
    while let Some(event) = event_rx.recv().await {
        match event {
            AppEvent::DevicesFound(devices) => return Ok(devices),
            AppEvent::Error(msg) => bail!("{}", msg),
            other => print_event(&other),
        }
    }
    bail!("Backend stopped unexpectedly")
}

fn timeout_millis(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

fn edit_config(
    mut config: AppConfig,
    name: Option<String>,
    dir: Option<PathBuf>,
    port: Option<u16>,
) -> Result<()> {
    let changed = name.is_some() || dir.is_some() || port.is_some();
    if let Some(name) = name {
        config.device_name = Some(name);
    }
    if let Some(dir) = dir {
        config.download_path = dir;
    }
    if let Some(port) = port {
        config.transfer_port = port;
    }

    if changed {
        config.save()?;
        if let Some(path) = AppConfig::config_path() {
            println!("Saved {}", path.display());
        }
    }

    println!("Device name:    {}", config.device_name());
    println!("Save directory: {}", config.download_path.display());
    println!("Transfer port:  {}", config.transfer_port);
    println!("Discovery port: {}", config.discovery_port);
    Ok(())
}
