use crate::AppEvent;
use crate::config::TransferSettings;
use crate::error::{Result, TransferError};
use crate::history::{TransferDirection, TransferRecord};
use crate::protocol::TransferHeader;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressTracker;
use super::utils::{file_name_of, report_progress, resolve_destination};

/// Receive one file (header, then exactly `file_size` payload bytes) into `save_dir`.
///
/// Bytes beyond the announced size are never read. A truncated payload leaves
/// the partial file on disk.
pub async fn receive_file<R: AsyncRead + Unpin>(
    stream: &mut R,
    save_dir: &Path,
    settings: &TransferSettings,
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
) -> Result<TransferRecord> {
    let result = receive_file_inner(stream, save_dir, settings, event_tx, cancel).await;

    match &result {
        Ok(record) => {
            tracing::info!("Received {} ({} bytes)", record.file_name, record.file_size);
            let _ = event_tx
                .send(AppEvent::Status("File received successfully!".to_string()))
                .await;
            let _ = event_tx
                .send(AppEvent::TransferCompleted(record.clone()))
                .await;
        }
        Err(TransferError::Cancelled) => {
            tracing::info!("Receive cancelled");
            let _ = event_tx
                .send(AppEvent::TransferCancelled { is_sending: false })
                .await;
        }
        Err(e) => {
            tracing::warn!("Receive failed: {}", e);
            let _ = event_tx
                .send(AppEvent::Error(format!("Error receiving file: {}", e)))
                .await;
        }
    }

    report_progress(event_tx, 0, false).await;
    result
}

async fn receive_file_inner<R: AsyncRead + Unpin>(
    stream: &mut R,
    save_dir: &Path,
    settings: &TransferSettings,
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
) -> Result<TransferRecord> {
    let header = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        res = TransferHeader::read_from(stream) => res?,
    };

    let _ = event_tx
        .send(AppEvent::Status(format!("Receiving file: {}", header.file_name)))
        .await;
    let _ = event_tx
        .send(AppEvent::Status(format!("File size: {} bytes", header.file_size)))
        .await;

    tokio::fs::create_dir_all(save_dir).await?;
    let file_path = resolve_destination(save_dir, &header.file_name);
    let saved_name = file_name_of(&file_path).unwrap_or_else(|| header.file_name.clone());
    if saved_name != header.file_name {
        tracing::warn!(
            "Sender file name {:?} rewritten to {:?}",
            header.file_name,
            saved_name
        );
    }

    let mut file = File::create(&file_path).await?;

    let total = header.file_size;
    let mut tracker = ProgressTracker::new(total, settings);
    let mut buffer = vec![0u8; settings.chunk_size.max(1)];

    let _ = event_tx
        .send(AppEvent::Status("Receiving...".to_string()))
        .await;

    while tracker.transferred() < total {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let remaining = total - tracker.transferred();
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            res = stream.read(&mut buffer[..to_read]) => res?,
        };
        if n == 0 {
            // flush what we have; the partial file is left in place
            let _ = file.flush().await;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Connection closed after {} of {} bytes",
                    tracker.transferred(),
                    total
                ),
            )
            .into());
        }

        file.write_all(&buffer[..n]).await?;

        if let Some(percent) = tracker.advance(n as u64) {
            report_progress(event_tx, percent, false).await;
        }
    }

    file.flush().await?;

    if let Some(percent) = tracker.finish() {
        report_progress(event_tx, percent, false).await;
    }

    let _ = event_tx
        .send(AppEvent::Status(format!("Saved to: {}", file_path.display())))
        .await;

    Ok(TransferRecord::new(
        saved_name,
        total,
        TransferDirection::Received,
    ))
}
