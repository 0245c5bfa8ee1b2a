use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `notify.webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "SOURCEWATCH_WEBHOOK_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub source: SourceConfig,
    pub git: GitConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_env")]
    pub env: String,
    /// Only objects whose name starts with this prefix are tracked.
    #[serde(default)]
    pub object_prefix: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Local directory that receives a deployable script per object.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            env: default_env(),
            object_prefix: String::new(),
            lookback_days: default_lookback_days(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_project() -> String {
    "DB".to_string()
}
fn default_env() -> String {
    "DEV".to_string()
}
fn default_lookback_days() -> u32 {
    3
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("code")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: u32,
    #[serde(default = "default_notification_hour")]
    pub notification_hour: u32,
    #[serde(default = "default_summary_window_hours")]
    pub summary_window_hours: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_hours: default_scan_interval_hours(),
            notification_hour: default_notification_hour(),
            summary_window_hours: default_summary_window_hours(),
        }
    }
}

fn default_scan_interval_hours() -> u32 {
    3
}
fn default_notification_hour() -> u32 {
    10
}
fn default_summary_window_hours() -> u32 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Root of the DDL export tree (`<schema>/<KIND>/<name>.sql`).
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.sql".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    pub repo_path: PathBuf,
    /// Empty means the repository has no remote.
    #[serde(default)]
    pub remote_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_push")]
    pub push: bool,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_author_name() -> String {
    "sourcewatch".to_string()
}
fn default_author_email() -> String {
    "sourcewatch@localhost".to_string()
}
fn default_push() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_send_when_empty")]
    pub send_when_empty: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            send_when_empty: default_send_when_empty(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_send_when_empty() -> bool {
    true
}

impl NotifyConfig {
    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.trim().is_empty()
    }
}

impl GitConfig {
    pub fn has_remote(&self) -> bool {
        !self.remote_url.trim().is_empty()
    }

    /// Link to the remote's change history, used in summaries.
    pub fn history_link(&self) -> Option<String> {
        if self.has_remote() {
            Some(format!("{}?_a=history", self.remote_url.trim_end_matches('/')))
        } else {
            None
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(url) = std::env::var(WEBHOOK_URL_ENV) {
        if !url.trim().is_empty() {
            config.notify.webhook_url = url;
        }
    }

    Ok(config)
}

/// Parse and validate config text. No environment overrides are applied.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let schedule = &config.schedule;
    if !(1..=24).contains(&schedule.scan_interval_hours) {
        bail!("schedule.scan_interval_hours must be in [1, 24]");
    }
    if schedule.notification_hour > 23 {
        bail!("schedule.notification_hour must be in [0, 23]");
    }
    if schedule.summary_window_hours < 1 {
        bail!("schedule.summary_window_hours must be >= 1");
    }

    if config.tracker.lookback_days < 1 {
        bail!("tracker.lookback_days must be >= 1");
    }
    if config.tracker.project.trim().is_empty() {
        bail!("tracker.project must not be empty");
    }

    if config.source.include_globs.is_empty() {
        bail!("source.include_globs must contain at least one pattern");
    }

    if config.git.branch.trim().is_empty() {
        bail!("git.branch must not be empty");
    }
    if config.git.push && !config.git.has_remote() {
        tracing::debug!("git.push is set but no remote_url is configured; pushes are skipped");
    }

    if config.notify.max_retries > 10 {
        bail!("notify.max_retries must be <= 10");
    }

    Ok(())
}
