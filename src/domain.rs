use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Classification tag of an image reference as stored by the ingestion step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum VariantKind {
    Preview,
    Dup,
    Thumbnail,
    Other(String),
}

impl VariantKind {
    pub fn as_str(&self) -> &str {
        match self {
            VariantKind::Preview => "preview",
            VariantKind::Dup => "dup",
            VariantKind::Thumbnail => "thumbnail",
            VariantKind::Other(value) => value,
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantKind {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "preview" => VariantKind::Preview,
            "dup" => VariantKind::Dup,
            "thumbnail" | "thumb" => VariantKind::Thumbnail,
            _ => VariantKind::Other(trimmed.to_string()),
        })
    }
}

impl From<String> for VariantKind {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<VariantKind> for String {
    fn from(value: VariantKind) -> Self {
        value.as_str().to_string()
    }
}

/// One candidate download read from the source store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub item_id: i64,
    pub parent_id: String,
    pub variant_kind: VariantKind,
    pub primary_url: Option<String>,
    pub fallback_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl WorkItem {
    /// True when at least one URL column is populated. Whether it normalizes
    /// is decided later by the worker.
    pub fn has_url(&self) -> bool {
        self.primary_url.is_some() || self.fallback_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloaded,
    Failed,
    Skipped,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 4] = [
        DownloadStatus::Pending,
        DownloadStatus::Downloaded,
        DownloadStatus::Failed,
        DownloadStatus::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Skipped => "skipped",
        }
    }

}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DownloadStatus::Pending),
            "downloaded" => Ok(DownloadStatus::Downloaded),
            "failed" => Ok(DownloadStatus::Failed),
            "skipped" => Ok(DownloadStatus::Skipped),
            other => Err(HarvestError::Tracker(format!("unknown status `{other}`"))),
        }
    }
}

/// Persisted outcome of one attempted download, keyed by `item_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerRecord {
    pub item_id: i64,
    pub status: DownloadStatus,
    pub resolved_url: Option<String>,
    pub local_path: Option<String>,
    pub error_message: Option<String>,
    pub byte_size: Option<u64>,
    pub recorded_at: String,
}

impl TrackerRecord {
    pub fn downloaded(item_id: i64, url: String, local_path: String, byte_size: u64) -> Self {
        Self {
            item_id,
            status: DownloadStatus::Downloaded,
            resolved_url: Some(url),
            local_path: Some(local_path),
            error_message: None,
            byte_size: Some(byte_size),
            recorded_at: now_timestamp(),
        }
    }

    pub fn failed(item_id: i64, message: impl Into<String>) -> Self {
        Self::terminal_error(item_id, DownloadStatus::Failed, message.into())
    }

    pub fn skipped(item_id: i64, message: impl Into<String>) -> Self {
        Self::terminal_error(item_id, DownloadStatus::Skipped, message.into())
    }

    fn terminal_error(item_id: i64, status: DownloadStatus, message: String) -> Self {
        Self {
            item_id,
            status,
            resolved_url: None,
            local_path: None,
            error_message: Some(message),
            byte_size: None,
            recorded_at: now_timestamp(),
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
