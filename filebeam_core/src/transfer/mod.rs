//! TCP file transfer: one file per connection.
//!
//! This module provides:
//! - The sender session (`send_file`)
//! - The receiver session (`receive_file`), usable on any async reader
//! - The receiver's listener/acceptor (`TransferListener`)
//! - Progress cadence and file-name helpers shared by both sides

pub mod listener;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod utils;

// Re-export public API
pub use listener::TransferListener;
pub use progress::ProgressTracker;
pub use receiver::receive_file;
pub use sender::send_file;
