//! Configuration handling for fsindex.
//!
//! Values come from the built-in defaults, then an optional TOML file, then
//! environment variables.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use fsindex_modules::{ModuleKind, ModuleSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// What to index and how to publish it
    #[serde(default)]
    pub index: IndexConfig,

    /// Meilisearch connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Reconciliation walk
    #[serde(default)]
    pub scan: ScanConfig,

    /// Enrichment loop
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Live watcher
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Enrichment modules
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory tree to index
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Host name used in document URLs
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Glob patterns, relative to the root, that are never indexed
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/data")
}

fn default_domain() -> String {
    "localhost".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            domain: default_domain(),
            exclude: Vec::new(),
        }
    }
}

/// Search backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Page size for fetches and chunk size for writes
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,

    /// Give up waiting on an index task after this long
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "http://meilisearch:7700".to_string()
}

fn default_index_name() -> String {
    "files".to_string()
}

fn default_batch_size() -> usize {
    10_000
}

fn default_task_poll_interval_ms() -> u64 {
    500
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_key: None,
            index_name: default_index_name(),
            batch_size: default_batch_size(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Files stat'ed and sniffed concurrently
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
}

fn default_scan_workers() -> usize {
    32
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_scan_workers(),
        }
    }
}

/// Enrichment loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_sleep_between_cycles_secs")]
    pub sleep_between_cycles_secs: u64,

    /// Wall-clock budget of one module per cycle
    #[serde(default = "default_time_per_module_secs")]
    pub time_per_module_secs: u64,
}

fn default_sleep_between_cycles_secs() -> u64 {
    300
}

fn default_time_per_module_secs() -> u64 {
    900
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sleep_between_cycles_secs: default_sleep_between_cycles_secs(),
            time_per_module_secs: default_time_per_module_secs(),
        }
    }
}

/// Live watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Debounce duration for file events (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Per-module configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModulesConfig {
    #[serde(default)]
    pub tika: TikaConfig,

    #[serde(default)]
    pub whisper: WhisperConfig,
}

/// Apache Tika content extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tika_url")]
    pub url: String,

    #[serde(default = "default_tika_workers")]
    pub max_workers: usize,

    /// Per-request timeout
    #[serde(default = "default_tika_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tika_url() -> String {
    "http://tika:9998".to_string()
}

fn default_tika_workers() -> usize {
    4
}

fn default_tika_timeout_secs() -> u64 {
    300
}

impl Default for TikaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_tika_url(),
            max_workers: default_tika_workers(),
            timeout_secs: default_tika_timeout_secs(),
        }
    }
}

/// Speech-to-text transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_whisper_url")]
    pub url: String,

    #[serde(default = "default_whisper_workers")]
    pub max_workers: usize,

    /// Per-request timeout
    #[serde(default = "default_whisper_timeout_secs")]
    pub timeout_secs: u64,

    /// Model name sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_whisper_url() -> String {
    "http://whisper:8000".to_string()
}

fn default_whisper_workers() -> usize {
    1
}

fn default_whisper_timeout_secs() -> u64 {
    3600
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_whisper_url(),
            max_workers: default_whisper_workers(),
            timeout_secs: default_whisper_timeout_secs(),
            model: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load from `path` (or the default config file) and the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Override fields from environment variables looked up with `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(root) = var("DIRECTORY_TO_INDEX") {
            self.index.root = PathBuf::from(root);
        }
        if let Some(domain) = var("DOMAIN") {
            self.index.domain = domain;
        }
        if let Some(host) = var("MEILISEARCH_HOST") {
            self.backend.host = host;
        }
        if let Some(key) = var("MEILISEARCH_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(name) = var("INDEX_NAME") {
            self.backend.index_name = name;
        }
        if let Some(size) = var("BATCH_SIZE") {
            self.backend.batch_size = parse_var("BATCH_SIZE", &size)?;
        }
        if let Some(workers) = var("MAX_WORKERS") {
            self.scan.workers = parse_var("MAX_WORKERS", &workers)?;
        }
        if let Some(secs) = var("SLEEP_BETWEEN_MODULE_RUNS") {
            self.schedule.sleep_between_cycles_secs = parse_var("SLEEP_BETWEEN_MODULE_RUNS", &secs)?;
        }
        for key in ["ALLOW_TIME_PER_MODULE", "ALLOWED_TIME_PER_MODULE"] {
            if let Some(secs) = var(key) {
                self.schedule.time_per_module_secs = parse_var(key, &secs)?;
            }
        }
        if let Some(url) = var("TIKA_URL") {
            self.modules.tika.url = url;
        }
        if let Some(url) = var("WHISPER_URL") {
            self.modules.whisper.url = url;
        }
        Ok(())
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.index.domain.trim().is_empty() {
            bail!("index.domain must not be empty");
        }
        if self.backend.index_name.trim().is_empty() {
            bail!("backend.index_name must not be empty");
        }
        if self.backend.batch_size == 0 {
            bail!("backend.batch_size must be at least 1");
        }
        if self.scan.workers == 0 {
            bail!("scan.workers must be at least 1");
        }
        if self.schedule.time_per_module_secs == 0 {
            bail!("schedule.time_per_module_secs must be at least 1");
        }
        if self.modules.tika.max_workers == 0 || self.modules.whisper.max_workers == 0 {
            bail!("modules.*.max_workers must be at least 1");
        }
        Ok(())
    }

    /// Settings for `kind`, or `None` when the module is disabled.
    pub fn module_settings(&self, kind: ModuleKind) -> Option<ModuleSettings> {
        match kind {
            ModuleKind::Tika => {
                let tika = &self.modules.tika;
                tika.enabled.then(|| ModuleSettings {
                    url: tika.url.clone(),
                    max_workers: tika.max_workers,
                    request_timeout: Duration::from_secs(tika.timeout_secs),
                    model: None,
                })
            }
            ModuleKind::Whisper => {
                let whisper = &self.modules.whisper;
                whisper.enabled.then(|| ModuleSettings {
                    url: whisper.url.clone(),
                    max_workers: whisper.max_workers,
                    request_timeout: Duration::from_secs(whisper.timeout_secs),
                    model: whisper.model.clone(),
                })
            }
        }
    }

    /// Default config file location.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// A commented sample config file.
    pub fn sample_toml() -> &'static str {
        r#"# fsindex configuration
# Environment variables (DIRECTORY_TO_INDEX, MEILISEARCH_HOST, ...) override
# the values in this file.

[index]
root = "/data"
domain = "localhost"
# Paths relative to root that are never indexed
exclude = ["**/.git/**", "**/*.part"]

[backend]
host = "http://meilisearch:7700"
# api_key = "masterKey"
index_name = "files"
batch_size = 10000
task_poll_interval_ms = 500
task_timeout_secs = 600
request_timeout_secs = 60

[scan]
workers = 32

[schedule]
sleep_between_cycles_secs = 300
time_per_module_secs = 900

[watcher]
enabled = true
debounce_ms = 500

[modules.tika]
enabled = true
url = "http://tika:9998"
max_workers = 4
timeout_secs = 300

[modules.whisper]
enabled = true
url = "http://whisper:8000"
max_workers = 1
timeout_secs = 3600
# model = "whisper-1"

[logging]
level = "info"
# file = "/var/log/fsindex.log"
"#
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {key}: {value:?}"))
}

/// Get the XDG config directory for fsindex.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FSINDEX_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "fsindex").map(|dirs| dirs.config_dir().to_path_buf())
}
