use crate::resilience::config::{CacheConfig, CacheSettings, LogLevel, MonitoringConfig, ResilienceConfig};
use crate::resilience::retry::RetryConfig;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the settings file location
pub const CONFIG_PATH_ENV: &str = "ALARAF_CONFIG";

/// On-disk settings. Every field is optional; durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub retry: RetrySettings,
    pub cache: CacheFileSettings,
    pub monitoring: MonitoringSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            base_delay_ms: millis(retry.base_delay),
            max_delay_ms: millis(retry.max_delay),
            backoff_multiplier: retry.backoff_multiplier,
            jitter: retry.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntrySettings {
    pub max_size: usize,
    pub ttl_ms: u64,
}

impl From<&CacheConfig> for CacheEntrySettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_size: config.max_size,
            ttl_ms: millis(config.default_ttl),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheFileSettings {
    pub api_responses: CacheEntrySettings,
    pub calculations: CacheEntrySettings,
    pub ui_state: CacheEntrySettings,
}

impl Default for CacheFileSettings {
    fn default() -> Self {
        let defaults = CacheSettings::default();
        Self {
            api_responses: (&defaults.api_responses).into(),
            calculations: (&defaults.calculations).into(),
            ui_state: (&defaults.ui_state).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub max_metrics: usize,
    pub max_errors: usize,
    pub retention_ms: u64,
    pub performance_window_ms: u64,
    pub error_window_ms: u64,
    pub slow_operation_ms: u64,
    pub log_level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_webhook: Option<String>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        let monitoring = MonitoringConfig::default();
        Self {
            max_metrics: monitoring.max_metrics,
            max_errors: monitoring.max_errors,
            retention_ms: millis(monitoring.retention),
            performance_window_ms: millis(monitoring.performance_window),
            error_window_ms: millis(monitoring.error_window),
            slow_operation_ms: millis(monitoring.slow_operation_threshold),
            log_level: monitoring.log_level,
            critical_webhook: monitoring.critical_webhook,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSettings {
    /// Write process logs here instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Settings {
    /// `$ALARAF_CONFIG` when set, otherwise `alaraf/config.toml` under the
    /// user config directory
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if cfg!(target_os = "linux") {
            // Use XDG config directory on Linux
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join("alaraf")
        } else {
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".alaraf")
        };

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Read settings from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading settings from: {:?}", path);

        if !path.exists() {
            info!("Settings file {:?} doesn't exist, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
                info!("Created config directory: {:?}", dir);
            }
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings to TOML")
    }

    pub fn into_resilience_config(self) -> ResilienceConfig {
        let retry = RetryConfig::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_backoff_multiplier(self.retry.backoff_multiplier)
            .with_jitter(self.retry.jitter);

        let cache_config = |name: &str, entry: &CacheEntrySettings| {
            CacheConfig::new(name, entry.max_size, Duration::from_millis(entry.ttl_ms))
        };
        let defaults = CacheSettings::default();
        let cache = CacheSettings {
            api_responses: cache_config(&defaults.api_responses.name, &self.cache.api_responses),
            calculations: cache_config(&defaults.calculations.name, &self.cache.calculations),
            ui_state: cache_config(&defaults.ui_state.name, &self.cache.ui_state),
        };

        let monitoring = MonitoringConfig {
            max_metrics: self.monitoring.max_metrics,
            max_errors: self.monitoring.max_errors,
            retention: Duration::from_millis(self.monitoring.retention_ms),
            performance_window: Duration::from_millis(self.monitoring.performance_window_ms),
            error_window: Duration::from_millis(self.monitoring.error_window_ms),
            slow_operation_threshold: Duration::from_millis(self.monitoring.slow_operation_ms),
            log_level: self.monitoring.log_level,
            critical_webhook: self.monitoring.critical_webhook,
        };

        ResilienceConfig {
            retry,
            cache,
            monitoring,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
