mod common;

use anyhow::Result;
use common::{
    EventLog, is_received, is_reset, is_status, loopback, random_bytes, spawn_listener, write_file,
};
use filebeam_core::config::TransferSettings;
use filebeam_core::protocol::TransferHeader;
use filebeam_core::transfer::{TransferListener, send_file};
use filebeam_core::{AppEvent, TransferError};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn send_small(addr: SocketAddr, dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let path = write_file(dir, name, data);
    let (tx, _log) = EventLog::new();
    send_file(
        &path,
        "127.0.0.1",
        addr.port(),
        &TransferSettings::default(),
        &tx,
        &CancellationToken::new(),
    )
    .await?;
    Ok(())
}

/// Header for a large file followed by a few bytes, then the sender goes quiet.
async fn stalled_sender(addr: SocketAddr, name: &str, sent: usize) -> Result<TcpStream> {
    let mut raw = TcpStream::connect(addr).await?;
    raw.write_all(&TransferHeader::new(name, 1 << 20).encode()?)
        .await?;
    raw.write_all(&vec![7u8; sent]).await?;
    raw.flush().await?;
    Ok(raw)
}

#[tokio::test]
async fn test_start_stop_lifecycle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (tx, _log) = EventLog::new();
    let listener = TransferListener::new(dir.path().to_path_buf(), TransferSettings::default(), tx);

    assert!(!listener.is_running().await);
    assert_eq!(listener.local_addr().await, None);

    // stop before start is a no-op
    listener.stop().await;

    let addr = listener.start_on(loopback()).await?;
    assert!(listener.is_running().await);
    assert_eq!(listener.local_addr().await, Some(addr));
    assert_ne!(addr.port(), 0);

    listener.stop().await;
    listener.stop().await;
    assert!(!listener.is_running().await);
    assert!(TcpStream::connect(addr).await.is_err());

    // restartable after a stop
    let again = listener.start_on(loopback()).await?;
    assert!(listener.is_running().await);
    listener.stop().await;
    assert!(TcpStream::connect(again).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_double_start_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (listener, addr, _log) = spawn_listener(dir.path()).await;

    let err = listener.start_on(loopback()).await.unwrap_err();
    assert!(matches!(err, TransferError::AlreadyRunning(_)), "{:?}", err);
    assert_eq!(listener.local_addr().await, Some(addr));

    listener.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_port_in_use_fails_to_start() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = occupied.local_addr()?;

    let (tx, _log) = EventLog::new();
    let listener = TransferListener::new(dir.path().to_path_buf(), TransferSettings::default(), tx);
    let err = listener.start_on(addr).await.unwrap_err();
    assert!(matches!(err, TransferError::Bind { .. }), "{:?}", err);
    assert!(!listener.is_running().await);
    Ok(())
}

#[tokio::test]
async fn test_truncated_header_keeps_listening() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let src = tempfile::tempdir()?;
    let (listener, addr, log) = spawn_listener(dir.path()).await;

    // name length says 10, only 3 bytes follow
    let mut raw = TcpStream::connect(addr).await?;
    raw.write_all(&[0x00, 0x0A, b'a', b'b', b'c']).await?;
    raw.shutdown().await?;
    drop(raw);

    log.wait_for(common::is_error).await;
    let errors = log.snapshot();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, AppEvent::Error(m) if m.contains("Framing error"))),
        "{:#?}",
        errors
    );

    send_small(addr, src.path(), "after.txt", b"still here").await?;
    log.wait_for(is_received).await;
    assert_eq!(std::fs::read(dir.path().join("after.txt"))?, b"still here");

    listener.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_truncated_payload_leaves_partial_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (listener, addr, log) = spawn_listener(dir.path()).await;

    let mut raw = TcpStream::connect(addr).await?;
    raw.write_all(&TransferHeader::new("cut.bin", 1000).encode()?)
        .await?;
    raw.write_all(&[1u8; 10]).await?;
    raw.shutdown().await?;
    drop(raw);

    log.wait_for(common::is_error).await;
    log.wait_for(is_reset(false)).await;
    assert_eq!(log.count(is_received), 0);
    assert!(!log.progress(false).contains(&100));
    assert_eq!(std::fs::metadata(dir.path().join("cut.bin"))?.len(), 10);
    assert!(listener.is_running().await);

    listener.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_transfer_keeps_listening() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let src = tempfile::tempdir()?;
    let (listener, addr, log) = spawn_listener(dir.path()).await;

    assert!(!listener.cancel_transfer(), "nothing to cancel yet");

    let raw = stalled_sender(addr, "big.bin", 8192).await?;
    log.wait_for(|e| is_status(e, "Receiving...")).await;

    assert!(listener.cancel_transfer());
    log.wait_for(|e| matches!(e, AppEvent::TransferCancelled { is_sending: false }))
        .await;
    assert_eq!(log.count(common::is_error), 0);
    assert!(std::fs::metadata(dir.path().join("big.bin"))?.len() <= 8192);
    drop(raw);

    assert!(listener.is_running().await);
    let data = random_bytes(50_000);
    send_small(addr, src.path(), "next.bin", &data).await?;
    log.wait_for(is_received).await;
    assert!(std::fs::read(dir.path().join("next.bin"))? == data);

    listener.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_interrupts_transfer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (listener, addr, log) = spawn_listener(dir.path()).await;

    let _raw = stalled_sender(addr, "stuck.bin", 100).await?;
    log.wait_for(|e| is_status(e, "Receiving...")).await;

    tokio::time::timeout(Duration::from_secs(5), listener.stop()).await?;
    assert!(!listener.is_running().await);
    log.wait_for(|e| matches!(e, AppEvent::TransferCancelled { is_sending: false }))
        .await;
    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_sequential_sessions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let src = tempfile::tempdir()?;
    let (listener, addr, log) = spawn_listener(dir.path()).await;

    for i in 0..3 {
        let name = format!("file_{}.txt", i);
        send_small(addr, src.path(), &name, name.as_bytes()).await?;
    }
    log.wait_for_n(3, is_received).await;
    for i in 0..3 {
        let name = format!("file_{}.txt", i);
        assert_eq!(std::fs::read(dir.path().join(&name))?, name.as_bytes());
    }

    listener.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_two_listeners_receive_concurrently() -> Result<()> {
    let src = tempfile::tempdir()?;
    let dir_a = tempfile::tempdir()?;
    let dir_b = tempfile::tempdir()?;
    let (listener_a, addr_a, log_a) = spawn_listener(dir_a.path()).await;
    let (listener_b, addr_b, log_b) = spawn_listener(dir_b.path()).await;
    assert_ne!(addr_a.port(), addr_b.port());

    let data_a = random_bytes(3 * 1024 * 1024);
    let data_b = random_bytes(2 * 1024 * 1024 + 17);
    let path_a = write_file(src.path(), "a.bin", &data_a);
    let path_b = write_file(src.path(), "b.bin", &data_b);

    let (tx, _log) = EventLog::new();
    let settings = TransferSettings::default();
    let cancel = CancellationToken::new();
    let (res_a, res_b) = tokio::join!(
        send_file(&path_a, "127.0.0.1", addr_a.port(), &settings, &tx, &cancel),
        send_file(&path_b, "127.0.0.1", addr_b.port(), &settings, &tx, &cancel),
    );
    res_a?;
    res_b?;

    log_a.wait_for(is_received).await;
    log_b.wait_for(is_received).await;
    assert!(std::fs::read(dir_a.path().join("a.bin"))? == data_a);
    assert!(std::fs::read(dir_b.path().join("b.bin"))? == data_b);

    listener_a.stop().await;
    listener_b.stop().await;
    Ok(())
}
