use crate::AppEvent;
use crate::config::TransferSettings;
use crate::error::{Result, TransferError};
use crate::history::{TransferDirection, TransferRecord};
use crate::protocol::TransferHeader;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressTracker;
use super::utils::{file_name_of, report_progress};

/// Send one file to a receiver over a fresh TCP connection.
///
/// Failures are reported once on `event_tx` and returned; nothing is retried.
/// Progress is reset to 0 when the session ends, whatever the outcome.
pub async fn send_file(
    file_path: &Path,
    peer_address: &str,
    peer_port: u16,
    settings: &TransferSettings,
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
) -> Result<TransferRecord> {
    let result =
        send_file_inner(file_path, peer_address, peer_port, settings, event_tx, cancel).await;

    match &result {
        Ok(record) => {
            tracing::info!(
                "Sent {} ({} bytes) to {}",
                record.file_name,
                record.file_size,
                peer_address
            );
            let _ = event_tx
                .send(AppEvent::Status("File sent successfully!".to_string()))
                .await;
            let _ = event_tx
                .send(AppEvent::TransferCompleted(record.clone()))
                .await;
        }
        Err(TransferError::Cancelled) => {
            tracing::info!("Send of {} cancelled", file_path.display());
            let _ = event_tx
                .send(AppEvent::TransferCancelled { is_sending: true })
                .await;
        }
        Err(e) => {
            tracing::error!("Send of {} failed: {}", file_path.display(), e);
            let _ = event_tx
                .send(AppEvent::Error(format!("Error sending file: {}", e)))
                .await;
        }
    }

    report_progress(event_tx, 0, true).await;
    result
}

async fn send_file_inner(
    file_path: &Path,
    peer_address: &str,
    peer_port: u16,
    settings: &TransferSettings,
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
) -> Result<TransferRecord> {
    if peer_port == 0 {
        return Err(TransferError::InvalidInput(
            "Port must be between 1 and 65535".to_string(),
        ));
    }

    let metadata = tokio::fs::metadata(file_path).await?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidInput(format!(
            "{} is not a regular file",
            file_path.display()
        )));
    }
    let file_name = file_name_of(file_path).ok_or_else(|| {
        TransferError::InvalidInput(format!("Invalid file name: {}", file_path.display()))
    })?;
    let file_size = metadata.len();
    let header = TransferHeader::new(file_name.clone(), file_size);
    // fail on unencodable names before touching the network
    header.encode()?;

    let mut file = File::open(file_path).await?;

    let target = format!("{}:{}", peer_address, peer_port);
    let _ = event_tx
        .send(AppEvent::Status(format!("Connecting to {}...", target)))
        .await;

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        res = TcpStream::connect((peer_address, peer_port)) => {
            res.map_err(|source| TransferError::Connect { target: target.clone(), source })?
        }
    };
    let _ = event_tx
        .send(AppEvent::Status("Connected successfully!".to_string()))
        .await;

    header.write_to(&mut stream).await?;

    let _ = event_tx
        .send(AppEvent::Status(format!("Sending file: {}", file_name)))
        .await;
    let _ = event_tx
        .send(AppEvent::Status(format!("File size: {} bytes", file_size)))
        .await;

    let mut tracker = ProgressTracker::new(file_size, settings);
    let mut buffer = vec![0u8; settings.chunk_size.max(1)];

    while tracker.transferred() < file_size {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let remaining = file_size - tracker.transferred();
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let n = file.read(&mut buffer[..to_read]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank while sending ({} of {} bytes read)",
                    file_name,
                    tracker.transferred(),
                    file_size
                ),
            )
            .into());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            res = stream.write_all(&buffer[..n]) => res?,
        }

        if let Some(percent) = tracker.advance(n as u64) {
            report_progress(event_tx, percent, true).await;
        }
    }

    stream.flush().await?;
    stream.shutdown().await?;

    if let Some(percent) = tracker.finish() {
        report_progress(event_tx, percent, true).await;
    }

    Ok(TransferRecord::new(file_name, file_size, TransferDirection::Sent))
}
