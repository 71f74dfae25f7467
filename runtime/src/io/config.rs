//! Runtime configuration stored under `.anyon/runtime.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::config_issues::ConfigErrorReporter;
use crate::core::notifications::TaskNotificationSink;
use crate::core::startup::BinaryPathInputs;

/// Default location relative to the workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".anyon/runtime.toml";

/// Consent timeouts beyond this are flagged as a warning.
const LONG_CONSENT_TIMEOUT_SECS: u64 = 600;

/// Runtime configuration (TOML).
///
/// Missing fields default to the values the agent loop ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds to wait for a consent decision before auto-declining.
    pub consent_timeout_secs: u64,

    /// Share of the model context window spent on conversation history.
    pub context_window_ratio: f64,

    pub start: StartConfig,

    pub notifications: NotificationConfig,
}

/// Agent subprocess launch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StartConfig {
    /// Total launch attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// A child that exits within this window failed to start.
    pub startup_grace_ms: u64,
    /// Explicit binary path; wins over every other source.
    pub binary_path: Option<String>,
    /// Binary shipped with the packaged app.
    pub bundled_path: Option<String>,
    /// Packaged builds never fall back to `PATH`.
    pub packaged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events kept by the task notification sink.
    pub capacity: usize,
    /// Running background tasks idle this long are reported stale.
    pub stale_after_secs: u64,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_ms: 2_000,
            startup_grace_ms: 1_500,
            binary_path: None,
            bundled_path: None,
            packaged: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            stale_after_secs: 180,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            consent_timeout_secs: 60,
            context_window_ratio: 0.7,
            start: StartConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Collect every validation issue instead of stopping at the first.
    pub fn validate(&self) -> ConfigErrorReporter {
        let mut report = ConfigErrorReporter::new();

        if self.consent_timeout_secs == 0 {
            report.error("consent_timeout_secs", "must be > 0");
        } else if self.consent_timeout_secs > LONG_CONSENT_TIMEOUT_SECS {
            report.warning(
                "consent_timeout_secs",
                format!(
                    "{}s keeps tool calls blocked for a long time",
                    self.consent_timeout_secs
                ),
            );
        }
        if !(self.context_window_ratio > 0.0 && self.context_window_ratio <= 1.0) {
            report.error("context_window_ratio", "must be within (0, 1]");
        }

        if self.start.max_attempts == 0 {
            report.error("start.max_attempts", "must be > 0");
        }
        if self.start.startup_grace_ms == 0 {
            report.error("start.startup_grace_ms", "must be > 0");
        }
        for (path, value) in [
            ("start.binary_path", &self.start.binary_path),
            ("start.bundled_path", &self.start.bundled_path),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                report.error(path, "must not be empty when set");
            }
        }
        if self.start.packaged
            && self.start.binary_path.is_none()
            && self.start.bundled_path.is_none()
        {
            report.warning(
                "start.bundled_path",
                "packaged build without a bundled or explicit binary relies on OPENCODE_PATH",
            );
        }

        if self.notifications.capacity == 0 {
            report.error("notifications.capacity", "must be > 0");
        }
        if self.notifications.stale_after_secs == 0 {
            report.error("notifications.stale_after_secs", "must be > 0");
        }

        report
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.start.startup_grace_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.notifications.stale_after_secs)
    }

    pub fn notification_sink(&self) -> TaskNotificationSink {
        TaskNotificationSink::new(self.notifications.capacity)
    }

    /// Binary path inputs before the environment is consulted.
    pub fn binary_inputs(&self) -> BinaryPathInputs {
        BinaryPathInputs {
            options_path: self.start.binary_path.clone(),
            env_path: None,
            bundled_path: self.start.bundled_path.clone(),
            is_packaged: self.start.packaged,
        }
    }
}

/// Resolve the config path, defaulting to [`DEFAULT_CONFIG_PATH`] under `root`.
pub fn config_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH))
}

/// Parse config without validating it. A missing file yields defaults.
pub fn read_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        return Ok(RuntimeConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RuntimeConfig::default()`. Validation
/// errors fail the load; warnings are logged.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let cfg = read_config(path)?;
    ensure_valid(&cfg, path)?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RuntimeConfig) -> Result<()> {
    ensure_valid(cfg, path)?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn ensure_valid(cfg: &RuntimeConfig, path: &Path) -> Result<()> {
    let report = cfg.validate();
    for issue in report.warnings() {
        warn!(path = %path.display(), issue = %issue, "config warning");
    }
    if report.has_errors() {
        return Err(anyhow!(
            "invalid config {}:\n{}",
            path.display(),
            report.format()
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
