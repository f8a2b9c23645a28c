//! Application configuration.
//!
//! # Responsibility
//! - Load settings from a TOML file with per-field defaults.
//! - Apply `LEADWATCH_*` environment overrides on top of the file.
//! - Validate durations and notifier settings before wiring.
//!
//! # Invariants
//! - Every duration is strictly positive after `validate()`.

use crate::notify::HttpNotifierSettings;
use crate::scheduler::SweepJob;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;
const HOUR_SECS: u64 = 60 * 60;

pub const ENV_DATABASE_PATH: &str = "LEADWATCH_DATABASE_PATH";
pub const ENV_CRM_WEBHOOK_URL: &str = "LEADWATCH_CRM_WEBHOOK_URL";
pub const ENV_CRM_API_KEY: &str = "LEADWATCH_CRM_API_KEY";
pub const ENV_RETENTION_DAYS: &str = "LEADWATCH_RETENTION_DAYS";
pub const ENV_LOG_LEVEL: &str = "LEADWATCH_LOG_LEVEL";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

/// Top-level configuration, usually from `leadwatch.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub crm: CrmConfig,
    pub lifecycle: LifecycleConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("leads.db"),
        }
    }
}

/// Outbound CRM webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    pub webhook_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

/// Lifecycle thresholds, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Stage-one residency after which the CRM is notified.
    pub retention_threshold_secs: u64,
    /// Age after which notified leads are deleted.
    pub notified_retention_secs: u64,
    /// Time since leaving stage one after which leads are deleted.
    pub moved_retention_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retention_threshold_secs: 7 * DAY_SECS,
            notified_retention_secs: 30 * DAY_SECS,
            moved_retention_secs: 30 * DAY_SECS,
        }
    }
}

impl LifecycleConfig {
    pub fn retention_threshold(&self) -> Duration {
        Duration::from_secs(self.retention_threshold_secs)
    }

    pub fn notified_retention(&self) -> Duration {
        Duration::from_secs(self.notified_retention_secs)
    }

    pub fn moved_retention(&self) -> Duration {
        Duration::from_secs(self.moved_retention_secs)
    }
}

/// Sweep cadences, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub notify_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            notify_interval_secs: 6 * HOUR_SECS,
            cleanup_interval_secs: DAY_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Falls back to the build-mode default when unset.
    pub level: Option<String>,
    /// Absolute directory for rotating log files; stderr when unset.
    pub dir: Option<String>,
}

impl AppConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Loads the file when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `LEADWATCH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_CRM_WEBHOOK_URL) {
            self.crm.webhook_url = Some(url);
        }
        if let Some(key) = lookup(ENV_CRM_API_KEY) {
            self.crm.api_key = Some(key);
        }
        if let Some(days) = lookup(ENV_RETENTION_DAYS) {
            let days = days.trim().parse::<u64>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{ENV_RETENTION_DAYS} must be a whole number, got `{days}`"
                ))
            })?;
            self.lifecycle.retention_threshold_secs = days.saturating_mul(DAY_SECS);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = Some(level);
        }
        Ok(())
    }

    /// Rejects zero durations and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            (
                "lifecycle.retention_threshold_secs",
                self.lifecycle.retention_threshold_secs,
            ),
            (
                "lifecycle.notified_retention_secs",
                self.lifecycle.notified_retention_secs,
            ),
            (
                "lifecycle.moved_retention_secs",
                self.lifecycle.moved_retention_secs,
            ),
            (
                "schedule.notify_interval_secs",
                self.schedule.notify_interval_secs,
            ),
            (
                "schedule.cleanup_interval_secs",
                self.schedule.cleanup_interval_secs,
            ),
            ("crm.timeout_secs", self.crm.timeout_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Builds notifier settings; fails when no webhook URL is configured.
    pub fn notifier_settings(&self) -> Result<HttpNotifierSettings, ConfigError> {
        let webhook_url = self
            .crm
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "crm.webhook_url is required (or set {ENV_CRM_WEBHOOK_URL})"
                ))
            })?;
        Ok(HttpNotifierSettings {
            webhook_url: webhook_url.to_string(),
            api_key: self
                .crm
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            timeout: Duration::from_secs(self.crm.timeout_secs),
        })
    }

    /// The two periodic sweep jobs with their cadences and thresholds.
    pub fn sweep_jobs(&self) -> [SweepJob; 2] {
        [
            SweepJob::Notify {
                every: Duration::from_secs(self.schedule.notify_interval_secs),
                retention_threshold: self.lifecycle.retention_threshold(),
            },
            SweepJob::Cleanup {
                every: Duration::from_secs(self.schedule.cleanup_interval_secs),
                notified_retention: self.lifecycle.notified_retention(),
                moved_retention: self.lifecycle.moved_retention(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError, ENV_CRM_WEBHOOK_URL, ENV_RETENTION_DAYS};
    use crate::scheduler::SweepJob;
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn defaults_follow_weekly_threshold_and_monthly_cleanup() {
        let config = AppConfig::default();
        assert_eq!(
            config.lifecycle.retention_threshold(),
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(
            config.lifecycle.notified_retention(),
            Duration::from_secs(30 * 86_400)
        );
        assert_eq!(config.schedule.notify_interval_secs, 6 * 3_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let config = AppConfig::from_toml_str(
            r#"
            [crm]
            webhook_url = "https://crm.example.com/hook"

            [lifecycle]
            retention_threshold_secs = 120
            "#,
            Path::new("leadwatch.toml"),
        )
        .unwrap();

        assert_eq!(config.lifecycle.retention_threshold_secs, 120);
        assert_eq!(config.lifecycle.moved_retention_secs, 30 * 86_400);
        assert_eq!(config.crm.timeout_secs, 10);
        let settings = config.notifier_settings().unwrap();
        assert_eq!(settings.webhook_url, "https://crm.example.com/hook");
        assert_eq!(settings.api_key, None);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[lifecycle\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_CRM_WEBHOOK_URL, "https://env.example.com"),
            (ENV_RETENTION_DAYS, "3"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.crm.webhook_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.lifecycle.retention_threshold_secs, 3 * 86_400);
    }

    #[test]
    fn invalid_retention_days_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_RETENTION_DAYS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut config = AppConfig::default();
        config.schedule.cleanup_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_secs"));
    }

    #[test]
    fn notifier_settings_require_webhook_url() {
        let config = AppConfig::default();
        assert!(matches!(
            config.notifier_settings(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn sweep_jobs_carry_their_own_thresholds() {
        let config = AppConfig::default();
        let [notify, cleanup] = config.sweep_jobs();
        assert!(matches!(
            notify,
            SweepJob::Notify { every, .. } if every == Duration::from_secs(6 * 3_600)
        ));
        assert!(matches!(
            cleanup,
            SweepJob::Cleanup { moved_retention, .. }
                if moved_retention == Duration::from_secs(30 * 86_400)
        ));
    }
}
