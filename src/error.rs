use std::io;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("source database not found: {0}")]
    #[diagnostic(help("pass --database or pick a preset that points at an existing file"))]
    SourceMissing(Utf8PathBuf),

    #[error("failed to read source database {path}: {message}")]
    SourceRead { path: Utf8PathBuf, message: String },

    #[error("tracker database error: {0}")]
    Tracker(String),

    #[error("destination directory is not writable: {path}: {message}")]
    Destination { path: Utf8PathBuf, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown source preset: {0}")]
    #[diagnostic(help("built-in presets are `yandex` and `vk`; more can be added under `sources` in image-harvest.json"))]
    UnknownPreset(String),

    #[error("HTTP client setup failed: {0}")]
    HttpSetup(String),
}

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SETUP: u8 = 2;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Process status for a failed command. Every `HarvestError` means the run
/// could not be set up or lost its tracker; anything else is a plain failure.
pub fn exit_code(report: &miette::Report) -> u8 {
    match report.downcast_ref::<HarvestError>() {
        Some(_) => EXIT_SETUP,
        None => EXIT_FAILURE,
    }
}

impl From<rusqlite::Error> for HarvestError {
    fn from(err: rusqlite::Error) -> Self {
        HarvestError::Tracker(err.to_string())
    }
}

/// Failure of a single download attempt. The `Display` form is what ends up
/// in the tracker's `error_message` column.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("Connection/timeout error")]
    Connection,

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("OS error: {0:?}")]
    Os(io::ErrorKind),

    #[error("Unexpected: {0}")]
    Unexpected(String),
}

const UNEXPECTED_MAX_CHARS: usize = 100;

impl FetchError {
    pub fn unexpected(message: impl AsRef<str>) -> Self {
        FetchError::Unexpected(message.as_ref().chars().take(UNEXPECTED_MAX_CHARS).collect())
    }
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Os(err.kind())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return FetchError::Connection;
        }
        if let Some(status) = err.status() {
            return FetchError::Status(status.as_u16());
        }
        let kind = if err.is_body() {
            "body"
        } else if err.is_decode() {
            "decode"
        } else if err.is_redirect() {
            "redirect"
        } else if err.is_request() {
            "request"
        } else if err.is_builder() {
            "builder"
        } else {
            return FetchError::unexpected(err.to_string());
        };
        FetchError::Client(kind.to_string())
    }
}
