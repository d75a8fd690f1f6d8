//! Completed-transfer records handed to whoever keeps the history.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Sent,
    Received,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Sent => write!(f, "Sent"),
            TransferDirection::Received => write!(f, "Received"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub file_name: String,
    pub file_size: u64,
    pub direction: TransferDirection,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl TransferRecord {
    pub fn new(file_name: impl Into<String>, file_size: u64, direction: TransferDirection) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            direction,
            timestamp: now_millis(),
        }
    }

    pub fn formatted_size(&self) -> String {
        format_file_size(self.file_size)
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.file_name,
            self.formatted_size(),
            self.direction
        )
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Human-readable size: bytes below 1 KiB, otherwise two decimals.
pub fn format_file_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = size as f64;
    if bytes < KB {
        format!("{} B", size)
    } else if bytes < MB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.2} MB", bytes / MB)
    } else {
        format!("{:.2} GB", bytes / GB)
    }
}
