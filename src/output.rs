use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, RunSummary};
use crate::domain::DownloadStatus;
use crate::report::{ErrorCount, TrackerReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(result: &TrackerReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn render_report(report: &TrackerReport) -> String {
    let rule = "=".repeat(70);
    let mut out = String::new();
    out.push_str(&format!("\n{rule}\n"));
    out.push_str(&format!("{CYAN}DOWNLOAD FINISHED: SUMMARY{RESET}\n"));
    out.push_str(&format!("{rule}\n"));
    out.push_str(&format!("Total processed: {}\n", report.total));
    out.push_str(&status_line(report, DownloadStatus::Downloaded, "Downloaded:", GREEN));
    out.push_str(&status_line(report, DownloadStatus::Failed, "Failed:    ", RED));
    out.push_str(&status_line(report, DownloadStatus::Skipped, "Skipped:   ", YELLOW));
    if report.pending > 0 {
        out.push_str(&status_line(report, DownloadStatus::Pending, "Pending:   ", CYAN));
    }
    push_errors(&mut out, "Top failure reasons:", &report.top_failed);
    push_errors(&mut out, "Top skip reasons:", &report.top_skipped);
    out.push_str(&format!("\nTracker: {}\n", report.tracker));
    out.push_str(&rule);
    out.push('\n');
    out
}

pub fn render_run(summary: &RunSummary) -> String {
    let mut out = format!(
        "Items to download: {} (this run: {} downloaded, {} failed, {} skipped)\n",
        summary.candidates,
        summary.recorded.downloaded,
        summary.recorded.failed,
        summary.recorded.skipped,
    );
    out.push_str(&render_report(&summary.report));
    out
}

fn status_line(report: &TrackerReport, status: DownloadStatus, label: &str, color: &str) -> String {
    format!(
        "{color}{label} {} ({:.1}%){RESET}\n",
        report.count(status),
        report.percent(status)
    )
}

fn push_errors(out: &mut String, title: &str, errors: &[ErrorCount]) {
    if errors.is_empty() {
        return;
    }
    out.push_str(&format!("\n{title}\n"));
    for entry in errors {
        out.push_str(&format!("  - {} -> {}\n", entry.message, entry.count));
    }
}
