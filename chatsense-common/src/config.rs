//! Bootstrap configuration loading
//!
//! Settings come from a single TOML file. Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is not an error: the service logs a warning and
//! starts with compiled defaults. A file that exists but does not parse is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "CHATSENSE_CONFIG";
/// Environment variable overriding the log output path
pub const ENV_OUTPUT_PATH: &str = "CHATSENSE_OUTPUT";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "CHATSENSE_LOG_LEVEL";
/// Environment variable overriding the classification worker count
pub const ENV_WORKERS: &str = "CHATSENSE_WORKERS";

/// Automation accounts whose messages are never classified
pub const DEFAULT_DENY_AUTHORS: &[&str] = &["fossabot", "nightbot", "streamelements", "potatbotat"];

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub filter: FilterSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub sink: SinkSettings,

    /// Replay source (chat capture file); absent means no source configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplaySettings>,

    #[serde(default)]
    pub http: HttpSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Event filter rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Author accounts to ignore (case-insensitive)
    #[serde(default = "default_deny_authors")]
    pub deny_authors: Vec<String>,

    /// Messages starting with any of these are commands
    #[serde(default = "default_command_prefixes")]
    pub command_prefixes: Vec<String>,

    /// Messages containing any of these (case-insensitive) are links
    #[serde(default = "default_link_markers")]
    pub link_markers: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            deny_authors: default_deny_authors(),
            command_prefixes: default_command_prefixes(),
            link_markers: default_link_markers(),
        }
    }
}

/// What the intake queue does when it is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room
    #[default]
    DropOldest,
    /// Reject the incoming event
    DropNewest,
}

/// Pipeline sizing and failure-handling knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Classification workers; keep at 1 unless the classifier is reentrant
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Release results in admission order even with several workers
    #[serde(default = "default_true")]
    pub preserve_order: bool,

    /// Per-call classifier timeout (none = unbounded)
    ///
    /// A timed-out event is logged as `Error` right away, but its worker takes
    /// no new event until the abandoned call returns.
    #[serde(default)]
    pub classify_timeout_ms: Option<u64>,

    /// Attempts per log write before the record is counted as lost
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Bound on the graceful drain at shutdown before workers are aborted
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            intake_capacity: default_intake_capacity(),
            overflow: OverflowPolicy::default(),
            workers: default_workers(),
            preserve_order: true,
            classify_timeout_ms: None,
            max_write_attempts: default_max_write_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl PipelineSettings {
    pub fn classify_timeout(&self) -> Option<Duration> {
        self.classify_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Session lifecycle timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Fail-fast bound on a join
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Pause after unsubscribing before the drain wait starts
    #[serde(default = "default_leave_settle_ms")]
    pub leave_settle_ms: u64,

    /// Bound on the drain wait (0 = wait indefinitely)
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            join_timeout_ms: default_join_timeout_ms(),
            leave_settle_ms: default_leave_settle_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl SessionSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn leave_settle(&self) -> Duration {
        Duration::from_millis(self.leave_settle_ms)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_ms > 0).then(|| Duration::from_millis(self.drain_timeout_ms))
    }
}

/// Durable log backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// One CSV row per result
    #[default]
    Csv,
    /// Append-only SQLite table
    Sqlite,
}

/// Durable log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(default)]
    pub kind: SinkKind,

    #[serde(default = "default_sink_path")]
    pub path: PathBuf,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: default_sink_path(),
        }
    }
}

/// Chat capture replay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// CSV capture with `channel,text` or `channel,author,text` rows
    pub path: PathBuf,

    /// Delay between replayed messages
    #[serde(default = "default_replay_interval_ms")]
    pub interval_ms: u64,

    /// Start over when the capture is exhausted
    #[serde(default)]
    pub repeat: bool,
}

/// HTTP control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_http_bind(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_deny_authors() -> Vec<String> {
    DEFAULT_DENY_AUTHORS.iter().map(|s| s.to_string()).collect()
}

fn default_command_prefixes() -> Vec<String> {
    vec!["!".to_string()]
}

fn default_link_markers() -> Vec<String> {
    vec!["http".to_string()]
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_write_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_join_timeout_ms() -> u64 {
    1500
}

fn default_leave_settle_ms() -> u64 {
    300
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_sink_path() -> PathBuf {
    PathBuf::from("chat_sentiment.csv")
}

fn default_replay_interval_ms() -> u64 {
    250
}

fn default_http_bind() -> String {
    "127.0.0.1:5780".to_string()
}

impl TomlConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(Error::Config("pipeline.workers must be at least 1".to_string()));
        }
        if self.pipeline.intake_capacity == 0 {
            return Err(Error::Config(
                "pipeline.intake_capacity must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_write_attempts == 0 {
            return Err(Error::Config(
                "pipeline.max_write_attempts must be at least 1".to_string(),
            ));
        }
        if self.session.join_timeout_ms == 0 {
            return Err(Error::Config(
                "session.join_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.sink.path.as_os_str().is_empty() {
            return Err(Error::Config("sink.path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(ENV_OUTPUT_PATH) {
            if !path.trim().is_empty() {
                self.sink.path = PathBuf::from(path);
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level.trim().to_string();
            }
        }
        if let Ok(workers) = std::env::var(ENV_WORKERS) {
            self.pipeline.workers = workers.trim().parse().map_err(|_| {
                Error::Config(format!("{} is not a worker count: {}", ENV_WORKERS, workers))
            })?;
        }
        Ok(())
    }
}

/// Default config file location for the platform
///
/// `<config dir>/chatsense/config.toml`, e.g. `~/.config/chatsense/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chatsense").join("config.toml"))
}

/// Pick the config file to read: CLI argument, then environment, then platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file if present, otherwise fall back to compiled defaults
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file location available, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(path)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write config atomically (temp file + rename)
///
/// On Unix the file is created with mode 0600.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.workers, 1);
        assert!(config.pipeline.preserve_order);
        assert_eq!(config.pipeline.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.session.join_timeout(), Duration::from_millis(1500));
        assert_eq!(config.filter.command_prefixes, vec!["!".to_string()]);
        assert!(config.filter.deny_authors.contains(&"nightbot".to_string()));
        assert!(config.replay.is_none());
        assert!(!config.http.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            workers = 2
            overflow = "drop_newest"

            [sink]
            kind = "sqlite"
            path = "/tmp/chatsense.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.pipeline.intake_capacity, 1024);
        assert_eq!(config.sink.kind, SinkKind::Sqlite);
        assert_eq!(config.session.leave_settle_ms, 300);
    }

    #[test]
    fn test_drain_timeout_zero_means_unbounded() {
        let settings = SessionSettings {
            drain_timeout_ms: 0,
            ..SessionSettings::default()
        };
        assert!(settings.drain_timeout().is_none());
        assert_eq!(
            SessionSettings::default().drain_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = TomlConfig::default();
        config.pipeline.workers = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_write_attempts() {
        let mut config = TomlConfig::default();
        config.pipeline.max_write_attempts = 0;
        assert!(config.validate().is_err());
    }
}
