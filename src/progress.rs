use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::app::{ProgressEvent, ProgressSink};
use crate::report::RunCounts;

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, eta {eta}) {msg}";

/// Progress bar on stderr, one tick per recorded outcome.
pub struct BarProgress {
    bar: ProgressBar,
    tally: Mutex<RunCounts>,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self {
            bar,
            tally: Mutex::new(RunCounts::default()),
        }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { candidates, .. } => {
                self.bar.set_length(candidates as u64);
                self.bar.set_position(0);
            }
            ProgressEvent::Recorded { status, .. } => {
                if let Ok(mut tally) = self.tally.lock() {
                    tally.record(status);
                    self.bar.set_message(format!(
                        "ok {} / failed {} / skipped {}",
                        tally.downloaded, tally.failed, tally.skipped
                    ));
                }
                self.bar.inc(1);
            }
            ProgressEvent::Finished => self.bar.finish_and_clear(),
        }
    }
}

/// Sink for runs without a progress display.
pub struct QuietProgress;

impl ProgressSink for QuietProgress {
    fn event(&self, _event: ProgressEvent) {}
}
