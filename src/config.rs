//! Configuration loaded from `fieldvisit.toml`.
//!
//! [`FieldConfig`] holds every tunable. Missing keys fall back to defaults,
//! and `FIELDVISIT_DATA_DIR` / `FIELDVISIT_USER_AGENT` take precedence over
//! the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::location::{AcquisitionMode, AcquisitionSettings};

pub const CONFIG_FILE: &str = "fieldvisit.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    /// Directory holding the JSON record files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Browser user-agent used to pick the device profile. Empty means unknown.
    #[serde(default)]
    pub user_agent: String,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub freshness_secs: u64,
    /// Clamped to 1..=3 when used.
    pub max_attempts: u32,
    pub accuracy_threshold_m: f64,
    pub timeout_step_secs: u64,
    pub timeout_cap_secs: u64,
    pub final_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub escalation_delay_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 60,
            max_attempts: 3,
            accuracy_threshold_m: 10.0,
            timeout_step_secs: 10,
            timeout_cap_secs: 60,
            final_timeout_secs: 45,
            retry_delay_ms: 2000,
            escalation_delay_ms: 3000,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub dedup_window_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How transitions acquire their position.
    pub position_mode: AcquisitionMode,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            position_mode: AcquisitionMode::Fast,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".fieldvisit")
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user_agent: String::new(),
            location: LocationConfig::default(),
            notifications: NotificationConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl FieldConfig {
    /// Loads `fieldvisit.toml` from the current directory.
    /// Uses defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_path(Path::new(CONFIG_FILE))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`, or return defaults when it is absent.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Environment variables take precedence over the file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FIELDVISIT_DATA_DIR")
            && !dir.is_empty()
        {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(ua) = var("FIELDVISIT_USER_AGENT")
            && !ua.is_empty()
        {
            self.user_agent = ua;
        }
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        let loc = &self.location;
        AcquisitionSettings {
            freshness: Duration::from_secs(loc.freshness_secs),
            max_attempts: loc.max_attempts,
            accuracy_threshold: loc.accuracy_threshold_m,
            timeout_step: Duration::from_secs(loc.timeout_step_secs),
            timeout_cap: Duration::from_secs(loc.timeout_cap_secs),
            final_timeout: Duration::from_secs(loc.final_timeout_secs),
            retry_delay: Duration::from_millis(loc.retry_delay_ms),
            escalation_delay: Duration::from_millis(loc.escalation_delay_ms),
            poll_interval: Duration::from_millis(loc.poll_interval_ms),
        }
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.notifications.dedup_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = FieldConfig::default();
        assert_eq!(config.data_dir, PathBuf::from(".fieldvisit"));
        assert!(config.user_agent.is_empty());
        assert_eq!(config.lifecycle.position_mode, AcquisitionMode::Fast);
        assert_eq!(config.dedup_window(), Duration::from_secs(60));
    }

    #[test]
    fn default_settings_match_acquirer_defaults() {
        assert_eq!(
            FieldConfig::default().acquisition_settings(),
            AcquisitionSettings::default()
        );
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            data_dir = "/var/lib/fieldvisit"

            [location]
            accuracy_threshold_m = 15.0
            retry_delay_ms = 500

            [lifecycle]
            position_mode = "precise"
        "#;
        let config: FieldConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/fieldvisit"));
        assert_eq!(config.lifecycle.position_mode, AcquisitionMode::Precise);

        let settings = config.acquisition_settings();
        assert_eq!(settings.accuracy_threshold, 15.0);
        assert_eq!(settings.retry_delay, Duration::from_millis(500));
        assert_eq!(settings.freshness, Duration::from_secs(60));
        assert_eq!(config.notifications.dedup_window_secs, 60);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FieldConfig::from_path(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.location.max_attempts, 3);
    }

    #[test]
    fn file_is_read_and_bad_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        std::fs::write(&path, "user_agent = \"Mozilla/5.0 (iPhone)\"\n").unwrap();
        let config = FieldConfig::from_path(&path).unwrap();
        assert_eq!(config.user_agent, "Mozilla/5.0 (iPhone)");

        std::fs::write(&path, "data_dir = [").unwrap();
        let err = FieldConfig::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = FieldConfig::default();
        config.apply_env(|key| match key {
            "FIELDVISIT_DATA_DIR" => Some("/tmp/visits".into()),
            "FIELDVISIT_USER_AGENT" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.data_dir, PathBuf::from("/tmp/visits"));
        assert!(config.user_agent.is_empty());
    }
}
