use serde::Serialize;

use crate::domain::DownloadStatus;

pub const TOP_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCount {
    pub message: String,
    pub count: u64,
}

/// Aggregate of the tracker's full history, independent of event order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerReport {
    pub tracker: String,
    pub total: u64,
    pub pending: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub top_failed: Vec<ErrorCount>,
    pub top_skipped: Vec<ErrorCount>,
}

impl TrackerReport {
    pub fn empty(tracker: String) -> Self {
        Self {
            tracker,
            total: 0,
            pending: 0,
            downloaded: 0,
            failed: 0,
            skipped: 0,
            top_failed: Vec::new(),
            top_skipped: Vec::new(),
        }
    }

    pub fn set_count(&mut self, status: DownloadStatus, count: u64) {
        let slot = match status {
            DownloadStatus::Pending => &mut self.pending,
            DownloadStatus::Downloaded => &mut self.downloaded,
            DownloadStatus::Failed => &mut self.failed,
            DownloadStatus::Skipped => &mut self.skipped,
        };
        *slot = count;
        self.total = self.pending + self.downloaded + self.failed + self.skipped;
    }

    pub fn count(&self, status: DownloadStatus) -> u64 {
        match status {
            DownloadStatus::Pending => self.pending,
            DownloadStatus::Downloaded => self.downloaded,
            DownloadStatus::Failed => self.failed,
            DownloadStatus::Skipped => self.skipped,
        }
    }

    /// Share of `status` in percent; zero when nothing was recorded.
    pub fn percent(&self, status: DownloadStatus) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(status) as f64 / self.total as f64 * 100.0
    }
}

/// Per-status tally of the outcomes recorded during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunCounts {
    pub fn record(&mut self, status: DownloadStatus) {
        match status {
            DownloadStatus::Downloaded => self.downloaded += 1,
            DownloadStatus::Failed => self.failed += 1,
            DownloadStatus::Skipped => self.skipped += 1,
            DownloadStatus::Pending => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.downloaded + self.failed + self.skipped
    }
}
