use crate::config::TransferSettings;

/// Decides when a session should report progress.
///
/// An update fires when the percentage has advanced by `progress_step_percent`
/// or `progress_step_bytes` have moved since the last update, whichever comes
/// first. Reported percentages never decrease.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    transferred: u64,
    last_percent: u8,
    bytes_at_last_update: u64,
    step_percent: u8,
    step_bytes: u64,
}

impl ProgressTracker {
    pub fn new(total: u64, settings: &TransferSettings) -> Self {
        Self {
            total,
            transferred: 0,
            last_percent: 0,
            bytes_at_last_update: 0,
            step_percent: settings.progress_step_percent,
            step_bytes: settings.progress_step_bytes,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = self.transferred as u128 * 100 / self.total as u128;
        pct.min(100) as u8
    }

    /// Record `n` more bytes. Returns the percentage to report, if any.
    pub fn advance(&mut self, n: u64) -> Option<u8> {
        self.transferred += n;
        let percent = self.percent();

        let step_reached = percent >= self.last_percent.saturating_add(self.step_percent);
        let bytes_reached = self.transferred - self.bytes_at_last_update >= self.step_bytes;

        if step_reached || bytes_reached {
            self.last_percent = percent;
            self.bytes_at_last_update = self.transferred;
            Some(percent)
        } else {
            None
        }
    }

    /// Final update after a successful transfer; guarantees a closing 100.
    pub fn finish(&mut self) -> Option<u8> {
        if self.last_percent == 100 {
            return None;
        }
        self.last_percent = 100;
        self.bytes_at_last_update = self.transferred;
        Some(100)
    }
}
