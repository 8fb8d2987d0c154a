use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::app::DEFAULT_CONCURRENCY;
use crate::error::HarvestError;
use crate::http::{DEFAULT_USER_AGENT, HttpOptions};
use crate::worker::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "image-harvest.json";
pub const TRACKER_FILE_NAME: &str = "tracker.db";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub prefer_origin: Option<bool>,
    #[serde(default)]
    pub progress: Option<bool>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub default_retry_after_secs: Option<u64>,
    #[serde(default)]
    pub pacing_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// A named source database and where its images go.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceEntry {
    pub name: String,
    pub database: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    #[serde(default)]
    pub tracker: Option<Utf8PathBuf>,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub preset: Option<String>,
    pub database: Option<Utf8PathBuf>,
    pub destination: Option<Utf8PathBuf>,
    pub tracker: Option<Utf8PathBuf>,
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    pub prefer_origin: bool,
    pub no_progress: bool,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub database: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub tracker: Utf8PathBuf,
    pub concurrency: usize,
    pub prefer_origin: bool,
    pub progress: bool,
    pub retry: RetryPolicy,
    pub http: HttpOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file: the explicit path when given (it must exist),
    /// else `image-harvest.json` in the current directory, else the one in
    /// the user config directory. No file at all means defaults.
    pub fn load(path: Option<&Utf8Path>) -> Result<Config, HarvestError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::discover() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;
        tracing::debug!(config = %config_path, "loaded config");
        Ok(config)
    }

    fn discover() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE_NAME);
        if local.as_std_path().is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "image-harvest")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_FILE_NAME)).ok())
            .filter(|path| path.as_std_path().is_file())
    }

    pub fn resolve(config: &Config, overrides: &RunOverrides) -> Result<RunSettings, HarvestError> {
        let located = locate(config, overrides)?;
        let database = located.database.ok_or_else(|| {
            HarvestError::InvalidConfig(
                "no source selected: name a preset or pass --database".to_string(),
            )
        })?;
        let destination = located
            .destination
            .unwrap_or_else(|| destination_for_database(&database));
        let tracker = located
            .tracker
            .unwrap_or_else(|| destination.join(TRACKER_FILE_NAME));

        let concurrency = overrides
            .concurrency
            .or(config.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            retries: overrides.retries.or(config.retries).unwrap_or(defaults.retries),
            backoff: config
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            default_retry_after: config
                .default_retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_retry_after),
            pacing: config
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pacing),
        };

        let http_defaults = HttpOptions::default();
        let http = HttpOptions {
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            request_timeout: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(http_defaults.request_timeout),
            connect_timeout: config
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(http_defaults.connect_timeout),
            max_idle_per_host: concurrency,
        };
        if http.request_timeout.is_zero() || http.connect_timeout.is_zero() {
            return Err(HarvestError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(RunSettings {
            database,
            destination,
            tracker,
            concurrency,
            prefer_origin: overrides.prefer_origin || config.prefer_origin.unwrap_or(false),
            progress: !overrides.no_progress && config.progress.unwrap_or(true),
            retry,
            http,
        })
    }

    /// Tracker location for commands that only read the tracker.
    pub fn resolve_tracker(
        config: &Config,
        overrides: &RunOverrides,
    ) -> Result<Utf8PathBuf, HarvestError> {
        let located = locate(config, overrides)?;
        if let Some(tracker) = located.tracker {
            return Ok(tracker);
        }
        located
            .destination
            .or_else(|| located.database.as_deref().map(destination_for_database))
            .map(|destination| destination.join(TRACKER_FILE_NAME))
            .ok_or_else(|| {
                HarvestError::InvalidConfig(
                    "no tracker selected: name a preset or pass --dest or --tracker".to_string(),
                )
            })
    }
}

/// Presets matching the two databases the scraper produces.
pub fn builtin_sources() -> Vec<SourceEntry> {
    vec![
        SourceEntry {
            name: "yandex".to_string(),
            database: Utf8PathBuf::from("yandex_images.db"),
            destination: Utf8PathBuf::from("yandex_images"),
            tracker: None,
        },
        SourceEntry {
            name: "vk".to_string(),
            database: Utf8PathBuf::from("vk_images.db"),
            destination: Utf8PathBuf::from("vk_images"),
            tracker: None,
        },
    ]
}

struct Located {
    database: Option<Utf8PathBuf>,
    destination: Option<Utf8PathBuf>,
    tracker: Option<Utf8PathBuf>,
}

fn locate(config: &Config, overrides: &RunOverrides) -> Result<Located, HarvestError> {
    let preset = match overrides.preset.as_deref() {
        Some(name) => Some(find_preset(config, name)?),
        None => None,
    };
    let database = overrides
        .database
        .clone()
        .or_else(|| preset.as_ref().map(|entry| entry.database.clone()));
    let destination = overrides
        .destination
        .clone()
        .or_else(|| preset.as_ref().map(|entry| entry.destination.clone()));
    let tracker = overrides
        .tracker
        .clone()
        .or_else(|| preset.as_ref().and_then(|entry| entry.tracker.clone()));

    if database.as_ref().is_some_and(|path| path.as_str().is_empty())
        || destination.as_ref().is_some_and(|path| path.as_str().is_empty())
    {
        return Err(HarvestError::InvalidConfig("paths must not be empty".to_string()));
    }
    Ok(Located {
        database,
        destination,
        tracker,
    })
}

fn find_preset(config: &Config, name: &str) -> Result<SourceEntry, HarvestError> {
    config
        .sources
        .iter()
        .find(|entry| entry.name == name)
        .cloned()
        .or_else(|| builtin_sources().into_iter().find(|entry| entry.name == name))
        .ok_or_else(|| HarvestError::UnknownPreset(name.to_string()))
}

/// `shots/yandex_images.db` → `shots/yandex_images`.
fn destination_for_database(database: &Utf8Path) -> Utf8PathBuf {
    let stem = database.file_stem().unwrap_or("images");
    match database.parent() {
        Some(parent) => parent.join(stem),
        None => Utf8PathBuf::from(stem),
    }
}
