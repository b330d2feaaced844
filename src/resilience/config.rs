//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, the named caches
//! and operation monitoring, with sane defaults.

use super::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global resilience configuration
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub cache: CacheSettings,
    pub monitoring: MonitoringConfig,
}

/// Capacity and default TTL for one named cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub name: String,
    pub max_size: usize,
    pub default_ttl: Duration,
}

/// The three cache instances the application runs with
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// LLM chat completions keyed by model and prompt
    pub api_responses: CacheConfig,
    /// Numerology results keyed by their inputs
    pub calculations: CacheConfig,
    /// Short-lived UI values
    pub ui_state: CacheConfig,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Most recent performance samples retained
    pub max_metrics: usize,
    /// Most recent error log entries retained
    pub max_errors: usize,
    /// Entries older than this are dropped by the retention sweep
    pub retention: Duration,
    /// Trailing window used for performance figures in reports
    pub performance_window: Duration,
    /// Trailing window used for error figures in reports
    pub error_window: Duration,
    /// Operations slower than this are logged as warnings
    pub slow_operation_threshold: Duration,
    pub log_level: LogLevel,
    /// Endpoint receiving critical error notifications
    pub critical_webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Whether an event at `level` passes this threshold
    pub fn allows(self, level: LogLevel) -> bool {
        level <= self
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache: CacheSettings::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, max_size: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_size,
            default_ttl,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            api_responses: CacheConfig::new("api", 50, Duration::from_secs(30 * 60)),
            calculations: CacheConfig::new("calculations", 200, Duration::from_secs(60 * 60)),
            ui_state: CacheConfig::new("ui", 100, Duration::from_secs(5 * 60)),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_metrics: 1000,
            max_errors: 500,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            performance_window: Duration::from_secs(60 * 60),
            error_window: Duration::from_secs(24 * 60 * 60),
            slow_operation_threshold: Duration::from_millis(3000),
            log_level: LogLevel::Info,
            critical_webhook: None,
        }
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Fewer retries and quieter logs for production
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            cache: CacheSettings::default(),
            monitoring: MonitoringConfig {
                log_level: LogLevel::Warn,
                ..MonitoringConfig::default()
            },
        }
    }

    /// More retries, short-lived caches and verbose logs for local work
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            cache: CacheSettings {
                api_responses: CacheConfig::new("api", 50, Duration::from_secs(60)),
                calculations: CacheConfig::new("calculations", 200, Duration::from_secs(60)),
                ui_state: CacheConfig::new("ui", 100, Duration::from_secs(60)),
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..MonitoringConfig::default()
            },
        }
    }

    /// Single attempt, no caching, errors-only logging (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::default()
                .with_max_attempts(1)
                .with_base_delay(Duration::ZERO)
                .with_max_delay(Duration::ZERO)
                .with_jitter(false),
            cache: CacheSettings {
                api_responses: CacheConfig::new("api", 0, Duration::ZERO),
                calculations: CacheConfig::new("calculations", 0, Duration::ZERO),
                ui_state: CacheConfig::new("ui", 0, Duration::ZERO),
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Error,
                ..MonitoringConfig::default()
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set max attempts (first try included)
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts.max(1);
        self
    }

    /// Toggle jitter on backoff delays
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.retry.jitter = enabled;
        self
    }

    /// Configure all cache instances
    pub fn cache_settings(mut self, cache: CacheSettings) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn api_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.config.cache.api_responses.max_size = max_size;
        self.config.cache.api_responses.default_ttl = ttl;
        self
    }

    pub fn calculation_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.config.cache.calculations.max_size = max_size;
        self.config.cache.calculations.default_ttl = ttl;
        self
    }

    pub fn ui_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.config.cache.ui_state.max_size = max_size;
        self.config.cache.ui_state.default_ttl = ttl;
        self
    }

    /// Configure monitoring
    pub fn monitoring_config(mut self, monitoring: MonitoringConfig) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    /// Set logging level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.monitoring.log_level = level;
        self
    }

    /// Send critical errors to a webhook
    pub fn critical_webhook(mut self, url: impl Into<String>) -> Self {
        self.config.monitoring.critical_webhook = Some(url.into());
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
