//! Resilience layer between the web app and its LLM backend
//!
//! Provides retry with backoff and circuit breaking, the named TTL/LRU
//! caches, and operation monitoring with health reports.

pub mod cache;
pub mod cache_keys;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod retry;

pub use cache::{CacheRegistry, CacheSnapshot, CacheStats, CacheStore, ExportedEntry, KeyUsage};
pub use cache_keys::{api_response_key, calculation_key, jafr_key};
pub use circuit_breaker::{CircuitBreakerRegistry, CircuitPermit, CircuitPhase, CircuitSnapshot};
pub use config::{CacheConfig, CacheSettings, LogLevel, MonitoringConfig, ResilienceConfig, ResilienceConfigBuilder};
pub use error::{AppError, ErrorKind, ErrorReporter, NotificationStyle, ServiceError, classify};
pub use logging::EventLogger;
pub use monitor::{
    CriticalNotifier, EnvironmentInfo, ErrorLogEntry, ErrorStats, LogNotifier, MonitorReport, OperationBreakdown,
    OperationMonitor, OperationTimer, PerformanceMetric, PerformanceStats, Severity, WebhookNotifier,
};
pub use retry::{RetryAttempt, RetryCondition, RetryConfig, RetryExecutor, RetryOutcome};
