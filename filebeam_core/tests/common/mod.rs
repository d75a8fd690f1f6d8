#![allow(dead_code)]

use filebeam_core::AppEvent;
use filebeam_core::config::TransferSettings;
use filebeam_core::transfer::TransferListener;
use rand::Rng;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(10);

/// Drains an event channel in the background so senders never block.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<AppEvent>>>,
}

impl EventLog {
    pub fn new() -> (mpsc::Sender<AppEvent>, Self) {
        init_tracing();
        let (tx, mut rx) = mpsc::channel::<AppEvent>(64);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.lock().unwrap().push(event);
            }
        });
        (tx, Self { events })
    }

    pub fn snapshot(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Wait until at least `n` events match `pred`.
    pub async fn wait_for_n(&self, n: usize, pred: impl Fn(&AppEvent) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.count(&pred) < n {
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for events; got {:#?}", self.snapshot());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for(&self, pred: impl Fn(&AppEvent) -> bool) {
        self.wait_for_n(1, pred).await
    }

    pub fn progress(&self, sending: bool) -> Vec<u8> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::TransferProgress {
                    percent,
                    is_sending,
                } if is_sending == sending => Some(percent),
                _ => None,
            })
            .collect()
    }
}

/// RUST_LOG=debug shows core logs in test output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn is_received(event: &AppEvent) -> bool {
    matches!(event, AppEvent::TransferCompleted(r) if r.direction == filebeam_core::history::TransferDirection::Received)
}

/// The progress reset that closes every session
pub fn is_reset(sending: bool) -> impl Fn(&AppEvent) -> bool {
    move |e| {
        matches!(e, AppEvent::TransferProgress { percent: 0, is_sending } if *is_sending == sending)
    }
}

pub fn is_error(event: &AppEvent) -> bool {
    matches!(event, AppEvent::Error(_))
}

pub fn is_status(event: &AppEvent, text: &str) -> bool {
    matches!(event, AppEvent::Status(s) if s == text)
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Listener on an ephemeral loopback port, saving into `save_dir`.
pub async fn spawn_listener(save_dir: &Path) -> (TransferListener, SocketAddr, EventLog) {
    let (tx, log) = EventLog::new();
    let listener = TransferListener::new(save_dir.to_path_buf(), TransferSettings::default(), tx);
    let addr = listener.start_on(loopback()).await.unwrap();
    (listener, addr, log)
}
