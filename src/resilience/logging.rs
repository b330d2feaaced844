//! Structured event logging for retries, circuits, caches and the monitor
//!
//! Every event is rendered as a single JSON object through the `log` facade
//! so it can be grepped or shipped as-is.

use super::config::LogLevel;
use super::error::ServiceError;
use crate::clock::{SharedClock, system_clock};
use serde_json::{Value, json};
use std::time::Duration;
use log::{debug, error, info, trace, warn};

/// Emits structured resilience events filtered by a level threshold
#[derive(Debug, Clone)]
pub struct EventLogger {
    level: LogLevel,
    clock: SharedClock,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl EventLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            clock: system_clock(),
        }
    }

    /// Stamp events with `clock` instead of the system time
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// A retryable failure, about to wait `delay` before the next attempt
    pub fn log_retry(&self, operation: &str, attempt: u32, max_attempts: u32, error: &ServiceError, delay: Duration) {
        if !self.level.allows(LogLevel::Warn) {
            return;
        }

        let log_data = self.event("retry_attempt", json!({
            "operation": operation,
            "attempt": attempt,
            "max_attempts": max_attempts,
            "error": error.message(),
            "delay_ms": delay.as_millis(),
        }));

        warn!("Retry Attempt: {}", log_data);
    }

    /// The retry loop gave up, either on a permanent error or out of attempts
    pub fn log_give_up(&self, operation: &str, attempts: u32, retryable: bool, error: &ServiceError) {
        if !self.level.allows(LogLevel::Warn) {
            return;
        }

        let log_data = self.event("retry_exhausted", json!({
            "operation": operation,
            "attempts": attempts,
            "retryable": retryable,
            "error": error.message(),
        }));

        warn!("Operation Failed Permanently: {}", log_data);
    }

    pub fn log_recovered(&self, operation: &str, attempts: u32) {
        if !self.level.allows(LogLevel::Info) {
            return;
        }

        let log_data = self.event("retry_recovered", json!({
            "operation": operation,
            "attempts": attempts,
        }));

        info!("Operation Recovered: {}", log_data);
    }

    /// A circuit moved between phases
    pub fn log_circuit_transition(&self, circuit: &str, from: &str, to: &str, consecutive_failures: u32) {
        if !self.level.allows(LogLevel::Warn) {
            return;
        }

        let log_data = self.event("circuit_transition", json!({
            "circuit": circuit,
            "from": from,
            "to": to,
            "consecutive_failures": consecutive_failures,
        }));

        warn!("Circuit Transition: {}", log_data);
    }

    /// A call was refused without touching the wrapped operation
    pub fn log_circuit_rejection(&self, circuit: &str, remaining_cooldown: Duration) {
        if !self.level.allows(LogLevel::Debug) {
            return;
        }

        let log_data = self.event("circuit_rejected", json!({
            "circuit": circuit,
            "remaining_cooldown_ms": remaining_cooldown.as_millis(),
        }));

        debug!("Circuit Rejected Call: {}", log_data);
    }

    pub fn log_cache_eviction(&self, cache: &str, key: &str) {
        if !self.level.allows(LogLevel::Debug) {
            return;
        }

        let log_data = self.event("cache_eviction", json!({
            "cache": cache,
            "key": key,
        }));

        debug!("Cache Eviction: {}", log_data);
    }

    pub fn log_cache_sweep(&self, cache: &str, removed: usize, remaining: usize) {
        if removed == 0 || !self.level.allows(LogLevel::Debug) {
            return;
        }

        let log_data = self.event("cache_sweep", json!({
            "cache": cache,
            "removed": removed,
            "remaining": remaining,
        }));

        debug!("Cache Sweep: {}", log_data);
    }

    pub fn log_retention_sweep(&self, metrics_removed: usize, errors_removed: usize) {
        if !self.level.allows(LogLevel::Trace) {
            return;
        }

        let log_data = self.event("monitor_retention_sweep", json!({
            "metrics_removed": metrics_removed,
            "errors_removed": errors_removed,
        }));

        trace!("Monitor Retention Sweep: {}", log_data);
    }

    /// Log performance warning for slow operations
    pub fn log_slow_operation(&self, operation: &str, duration: Duration, threshold: Duration) {
        if !self.level.allows(LogLevel::Warn) {
            return;
        }

        let log_data = self.event("performance_warning", json!({
            "operation": operation,
            "duration_ms": duration.as_millis(),
            "threshold_ms": threshold.as_millis(),
        }));

        warn!("Slow Operation Detected: {}", log_data);
    }

    pub fn log_critical(&self, message: &str, context: &str) {
        let log_data = self.event("critical_error", json!({
            "message": message,
            "context": context,
        }));

        error!("Critical Error: {}", log_data);
    }

    pub(crate) fn event(&self, name: &str, fields: Value) -> Value {
        let mut log_data = json!({
            "event": name,
            "timestamp": self.clock.now().to_rfc3339(),
        });

        if let (Some(target), Value::Object(fields)) = (log_data.as_object_mut(), fields) {
            target.extend(fields);
        }

        log_data
    }
}
