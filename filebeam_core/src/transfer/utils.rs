use crate::AppEvent;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Longest file name we create on disk, in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

const FALLBACK_NAME: &str = "unknown_file";

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a sender-supplied name to a single safe path component.
///
/// Directory parts (either separator) are dropped, control characters removed,
/// and `.`/`..`/Windows device names replaced with a fallback.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut clean: String = last.chars().filter(|c| !c.is_control()).collect();

    if clean.trim().is_empty()
        || clean == "."
        || clean == ".."
        || RESERVED_NAMES.iter().any(|r| clean.eq_ignore_ascii_case(r))
    {
        return FALLBACK_NAME.to_string();
    }

    if clean.len() > MAX_FILENAME_LENGTH {
        clean = truncate_keeping_extension(&clean);
    }
    clean
}

fn truncate_keeping_extension(name: &str) -> String {
    let ext = name
        .rfind('.')
        .map(|idx| &name[idx..])
        .filter(|ext| ext.len() < 20)
        .unwrap_or("");
    let base = &name[..name.len() - ext.len()];

    let mut cutoff = MAX_FILENAME_LENGTH - ext.len();
    while !base.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    format!("{}{}", &base[..cutoff], ext)
}

/// Where an incoming file lands inside `save_dir`.
pub fn resolve_destination(save_dir: &Path, file_name: &str) -> PathBuf {
    save_dir.join(sanitize_file_name(file_name))
}

/// Basename of a local file, as announced in the header.
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

/// Report transfer progress to the event channel
pub async fn report_progress(event_tx: &mpsc::Sender<AppEvent>, percent: u8, is_sending: bool) {
    tracing::debug!("Progress: {}%", percent);
    let _ = event_tx
        .send(AppEvent::TransferProgress {
            percent,
            is_sending,
        })
        .await;
}
