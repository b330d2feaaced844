//! Operation timing and error log with derived statistics
//!
//! Keeps two bounded, append-only logs: performance samples (one per timed
//! operation) and error entries (one per logged error). Statistics are
//! computed on demand over a trailing time window, so a report is a pure
//! function of the recorded samples and the current time.

use super::config::MonitoringConfig;
use super::logging::EventLogger;
use crate::clock::{SharedClock, elapsed_between, system_clock};
use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often entries older than the retention period are dropped
pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

const SLOWEST_SAMPLE_COUNT: usize = 10;
const RECENT_ERROR_COUNT: usize = 20;
const HOURLY_BUCKETS: usize = 24;

const TARGET_SUCCESS_RATE: f64 = 95.0;
const RESPONSE_TIME_BUDGET_MS: f64 = 2000.0;
const SLOW_RESPONSE_MS: f64 = 3000.0;
const ERROR_VOLUME_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// One timed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: DateTime<Utc>,
    pub operation_name: String,
    #[serde(rename = "duration_ms", with = "duration_millis")]
    pub duration: Duration,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

/// Where an error was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub app_version: String,
    pub os: String,
    pub arch: String,
}

impl EnvironmentInfo {
    pub fn current() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// One logged error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub context: String,
    pub severity: Severity,
    pub environment: EnvironmentInfo,
}

/// Figures for one operation name inside a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationBreakdown {
    pub count: usize,
    pub average_duration_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_operations: usize,
    /// Percentage of successful operations; 100 when the window is empty
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    /// Longest samples, slowest first
    pub slowest: Vec<PerformanceMetric>,
    pub by_operation: BTreeMap<String, OperationBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_context: BTreeMap<String, usize>,
    /// Counts per hour; index 23 is the last hour, index 0 is 23 hours ago
    pub hourly: Vec<usize>,
    /// Latest errors in the order they were logged
    pub recent: Vec<ErrorLogEntry>,
}

impl ErrorStats {
    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub generated_at: DateTime<Utc>,
    pub performance: PerformanceStats,
    pub errors: ErrorStats,
    /// 0 (unhealthy) to 100 (healthy)
    pub health_score: f64,
    pub recommendations: Vec<String>,
}

/// Out-of-band delivery of critical errors
pub trait CriticalNotifier: Send + Sync {
    fn notify(&self, entry: &ErrorLogEntry) -> anyhow::Result<()>;
}

/// Writes critical errors to the process log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl CriticalNotifier for LogNotifier {
    fn notify(&self, entry: &ErrorLogEntry) -> anyhow::Result<()> {
        error!(
            "CRITICAL [{}] {} (v{} on {}/{})",
            entry.context, entry.message, entry.environment.app_version, entry.environment.os, entry.environment.arch
        );
        Ok(())
    }
}

/// Posts critical errors as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl CriticalNotifier for WebhookNotifier {
    fn notify(&self, entry: &ErrorLogEntry) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("No tokio runtime available for webhook delivery")?;
        let payload = serde_json::to_value(entry).context("Failed to serialize error entry")?;
        let request = self.client.post(&self.url).json(&payload);
        let url = self.url.clone();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Delivered critical error notification to {}", url);
                }
                Ok(response) => {
                    warn!("Critical error webhook {} answered {}", url, response.status());
                }
                Err(e) => {
                    warn!("Critical error webhook {} unreachable: {}", url, e);
                }
            }
        });

        Ok(())
    }
}

#[derive(Debug)]
struct MonitorInner {
    metrics: VecDeque<PerformanceMetric>,
    errors: VecDeque<ErrorLogEntry>,
}

impl MonitorInner {
    /// Drop entries older than `retention`, returning (metrics, errors) removed
    fn purge_older_than(&mut self, now: DateTime<Utc>, retention: Duration) -> (usize, usize) {
        let metrics_before = self.metrics.len();
        self.metrics
            .retain(|metric| elapsed_between(metric.timestamp, now) <= retention);
        let errors_before = self.errors.len();
        self.errors
            .retain(|entry| elapsed_between(entry.timestamp, now) <= retention);

        (metrics_before - self.metrics.len(), errors_before - self.errors.len())
    }
}

/// Records operation timings and errors and derives health statistics
#[derive(Clone)]
pub struct OperationMonitor {
    inner: Arc<Mutex<MonitorInner>>,
    config: MonitoringConfig,
    clock: SharedClock,
    logger: EventLogger,
    notifier: Arc<dyn CriticalNotifier>,
    environment: EnvironmentInfo,
}

impl fmt::Debug for OperationMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OperationMonitor")
            .field("metrics", &inner.metrics.len())
            .field("errors", &inner.errors.len())
            .field("config", &self.config)
            .finish()
    }
}

impl OperationMonitor {
    pub fn new(config: MonitoringConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: MonitoringConfig, clock: SharedClock) -> Self {
        let notifier: Arc<dyn CriticalNotifier> = match &config.critical_webhook {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        };

        Self {
            inner: Arc::new(Mutex::new(MonitorInner {
                metrics: VecDeque::with_capacity(config.max_metrics),
                errors: VecDeque::with_capacity(config.max_errors),
            })),
            logger: EventLogger::new(config.log_level).with_clock(clock.clone()),
            config,
            clock,
            notifier,
            environment: EnvironmentInfo::current(),
        }
    }

    /// Replace the critical error notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn CriticalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Start timing `name`. Call [`OperationTimer::finish`] on every exit path;
    /// a timer dropped unfinished records nothing.
    pub fn start_operation(&self, name: &str) -> OperationTimer {
        OperationTimer {
            monitor: self.clone(),
            name: name.to_string(),
            started_at: self.clock.now(),
        }
    }

    /// Record an operation timed elsewhere, stamped with the current time
    pub fn record_duration(
        &self,
        name: &str,
        duration: Duration,
        success: bool,
        error: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        self.record_metric(PerformanceMetric {
            timestamp: self.clock.now(),
            operation_name: name.to_string(),
            duration,
            success,
            error: error.map(str::to_string),
            metadata,
        });
    }

    fn record_metric(&self, metric: PerformanceMetric) {
        if metric.duration > self.config.slow_operation_threshold {
            self.logger.log_slow_operation(
                &metric.operation_name,
                metric.duration,
                self.config.slow_operation_threshold,
            );
        }

        let mut inner = self.lock();
        if self.config.max_metrics == 0 {
            return;
        }
        while inner.metrics.len() >= self.config.max_metrics {
            inner.metrics.pop_front();
        }
        inner.metrics.push_back(metric);
    }

    /// Append an error entry. Critical errors are also sent to the notifier;
    /// a failing notifier is logged and otherwise ignored.
    pub fn log_error(&self, message: &str, context: &str, severity: Severity) {
        let entry = ErrorLogEntry {
            timestamp: self.clock.now(),
            message: message.to_string(),
            context: context.to_string(),
            severity,
            environment: self.environment.clone(),
        };

        {
            let mut inner = self.lock();
            if self.config.max_errors > 0 {
                while inner.errors.len() >= self.config.max_errors {
                    inner.errors.pop_front();
                }
                inner.errors.push_back(entry.clone());
            }
        }

        if severity == Severity::Critical {
            self.logger.log_critical(message, context);
            self.notify_critical(&entry);
        }
    }

    fn notify_critical(&self, entry: &ErrorLogEntry) {
        match catch_unwind(AssertUnwindSafe(|| self.notifier.notify(entry))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to send critical error notification: {:#}", e),
            Err(_) => error!("Critical error notifier panicked"),
        }
    }

    /// Performance figures over samples recorded within the last `window`
    pub fn performance_stats(&self, window: Duration) -> PerformanceStats {
        let now = self.clock.now();
        let inner = self.lock();
        let samples: Vec<&PerformanceMetric> = inner
            .metrics
            .iter()
            .filter(|metric| elapsed_between(metric.timestamp, now) <= window)
            .collect();

        let total_operations = samples.len();
        let successes = samples.iter().filter(|metric| metric.success).count();
        let success_rate = percentage(successes, total_operations);
        let average_response_time_ms = if total_operations == 0 {
            0.0
        } else {
            samples.iter().map(|metric| millis(metric.duration)).sum::<f64>() / total_operations as f64
        };

        let mut slowest: Vec<PerformanceMetric> = samples.iter().map(|metric| (*metric).clone()).collect();
        slowest.sort_by(|a, b| b.duration.cmp(&a.duration));
        slowest.truncate(SLOWEST_SAMPLE_COUNT);

        let mut by_operation: BTreeMap<String, OperationBreakdown> = BTreeMap::new();
        let mut successes_by_operation: HashMap<&str, usize> = HashMap::new();
        for metric in &samples {
            let breakdown = by_operation
                .entry(metric.operation_name.clone())
                .or_insert(OperationBreakdown {
                    count: 0,
                    average_duration_ms: 0.0,
                    success_rate: 0.0,
                });
            breakdown.count += 1;
            breakdown.average_duration_ms +=
                (millis(metric.duration) - breakdown.average_duration_ms) / breakdown.count as f64;

            let succeeded = successes_by_operation.entry(metric.operation_name.as_str()).or_insert(0);
            if metric.success {
                *succeeded += 1;
            }
            breakdown.success_rate = percentage(*succeeded, breakdown.count);
        }

        PerformanceStats {
            total_operations,
            success_rate,
            average_response_time_ms,
            slowest,
            by_operation,
        }
    }

    /// Error figures over entries logged within the last `window`
    pub fn error_stats(&self, window: Duration) -> ErrorStats {
        let now = self.clock.now();
        let inner = self.lock();
        let entries: Vec<&ErrorLogEntry> = inner
            .errors
            .iter()
            .filter(|entry| elapsed_between(entry.timestamp, now) <= window)
            .collect();

        let mut by_severity = BTreeMap::new();
        let mut by_context = BTreeMap::new();
        let mut hourly = vec![0; HOURLY_BUCKETS];

        for entry in &entries {
            *by_severity.entry(entry.severity).or_insert(0) += 1;
            *by_context.entry(entry.context.clone()).or_insert(0) += 1;

            let hours_ago = (elapsed_between(entry.timestamp, now).as_secs() / 3600) as usize;
            if hours_ago < HOURLY_BUCKETS {
                hourly[HOURLY_BUCKETS - 1 - hours_ago] += 1;
            }
        }

        let skip = entries.len().saturating_sub(RECENT_ERROR_COUNT);
        let recent = entries.iter().skip(skip).map(|entry| (*entry).clone()).collect();

        ErrorStats {
            total_errors: entries.len(),
            by_severity,
            by_context,
            hourly,
            recent,
        }
    }

    /// Combined statistics, health score and recommendations over the
    /// configured report windows
    pub fn generate_report(&self) -> MonitorReport {
        let performance = self.performance_stats(self.config.performance_window);
        let errors = self.error_stats(self.config.error_window);
        let health_score = health_score(&performance, &errors);
        let recommendations = recommendations(&performance, &errors);

        MonitorReport {
            generated_at: self.clock.now(),
            performance,
            errors,
            health_score,
            recommendations,
        }
    }

    /// Drop samples and errors older than the retention period
    pub fn purge_expired(&self) -> (usize, usize) {
        let removed = self.lock().purge_older_than(self.clock.now(), self.config.retention);
        self.logger.log_retention_sweep(removed.0, removed.1);
        removed
    }

    /// Spawn the hourly retention sweep on the current tokio runtime.
    ///
    /// Ends on the first tick after the last clone of the monitor is dropped.
    pub fn start_retention_sweep(&self) -> JoinHandle<()> {
        self.start_retention_sweep_every(RETENTION_SWEEP_INTERVAL)
    }

    pub(crate) fn start_retention_sweep_every(&self, every: Duration) -> JoinHandle<()> {
        let logs = Arc::downgrade(&self.inner);
        let clock = self.clock.clone();
        let logger = self.logger.clone();
        let retention = self.config.retention;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(logs) = logs.upgrade() else {
                    break;
                };
                let removed = logs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .purge_older_than(clock.now(), retention);
                logger.log_retention_sweep(removed.0, removed.1);
            }
        })
    }

    pub fn metric_count(&self) -> usize {
        self.lock().metrics.len()
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    /// All retained samples in recording order
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.lock().metrics.iter().cloned().collect()
    }

    /// All retained errors in logging order
    pub fn errors(&self) -> Vec<ErrorLogEntry> {
        self.lock().errors.iter().cloned().collect()
    }

    /// Forget every sample and error
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.metrics.clear();
        inner.errors.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer returned by [`OperationMonitor::start_operation`]
#[must_use = "call finish() to record the operation"]
pub struct OperationTimer {
    monitor: OperationMonitor,
    name: String,
    started_at: DateTime<Utc>,
}

impl OperationTimer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the operation with its duration since the timer started
    pub fn finish(self, success: bool, error: Option<&str>, metadata: Option<HashMap<String, Value>>) {
        let now = self.monitor.clock.now();
        self.monitor.record_metric(PerformanceMetric {
            timestamp: now,
            operation_name: self.name,
            duration: elapsed_between(self.started_at, now),
            success,
            error: error.map(str::to_string),
            metadata,
        });
    }

    pub fn succeed(self) {
        self.finish(true, None, None);
    }

    pub fn fail(self, error: &str) {
        self.finish(false, Some(error), None);
    }
}

/// Health score in `[0, 100]` derived from success rate, latency and
/// error severity
pub fn health_score(performance: &PerformanceStats, errors: &ErrorStats) -> f64 {
    let mut score = 100.0;
    score -= 2.0 * (TARGET_SUCCESS_RATE - performance.success_rate).max(0.0);
    score -= ((performance.average_response_time_ms - RESPONSE_TIME_BUDGET_MS) / 100.0).max(0.0);
    score -= 10.0 * errors.count(Severity::Critical) as f64;
    score -= 5.0 * errors.count(Severity::High) as f64;
    score.clamp(0.0, 100.0)
}

/// Independent threshold checks; any subset may apply
pub fn recommendations(performance: &PerformanceStats, errors: &ErrorStats) -> Vec<String> {
    let mut recommendations = Vec::new();

    if performance.success_rate < TARGET_SUCCESS_RATE {
        recommendations.push(format!(
            "Success rate is {:.1}%, below the {:.0}% target; review failing operations and retry settings",
            performance.success_rate, TARGET_SUCCESS_RATE
        ));
    }
    if performance.average_response_time_ms > SLOW_RESPONSE_MS {
        recommendations.push(format!(
            "Average response time is {:.0}ms; consider caching more responses or shortening prompts",
            performance.average_response_time_ms
        ));
    }
    if errors.total_errors > ERROR_VOLUME_LIMIT {
        recommendations.push(format!(
            "{} errors logged in the report window; investigate the most frequent contexts",
            errors.total_errors
        ));
    }
    let critical = errors.count(Severity::Critical);
    if critical > 0 {
        recommendations.push(format!("{} critical errors need immediate attention", critical));
    }

    recommendations
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);
    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn monitor() -> (OperationMonitor, MockClock) {
        let clock = MockClock::fixed();
        let monitor = OperationMonitor::with_clock(MonitoringConfig::default(), Arc::new(clock.clone()));
        (monitor, clock)
    }

    fn timed(monitor: &OperationMonitor, clock: &MockClock, name: &str, ms: i64, success: bool) {
        let timer = monitor.start_operation(name);
        clock.advance(ChronoDuration::milliseconds(ms));
        timer.finish(success, (!success).then_some("failed"), None);
    }

    struct CountingNotifier(AtomicUsize);

    impl CriticalNotifier for CountingNotifier {
        fn notify(&self, _entry: &ErrorLogEntry) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingNotifier;

    impl CriticalNotifier for FailingNotifier {
        fn notify(&self, _entry: &ErrorLogEntry) -> anyhow::Result<()> {
            anyhow::bail!("notification endpoint down")
        }
    }

    struct PanickingNotifier;

    impl CriticalNotifier for PanickingNotifier {
        fn notify(&self, _entry: &ErrorLogEntry) -> anyhow::Result<()> {
            panic!("notifier bug")
        }
    }

    #[test]
    fn test_timer_records_duration() {
        let (monitor, clock) = monitor();
        timed(&monitor, &clock, "chat", 250, true);

        let metrics = monitor.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].operation_name, "chat");
        assert_eq!(metrics[0].duration, Duration::from_millis(250));
        assert!(metrics[0].success);
        assert_eq!(metrics[0].error, None);
    }

    #[test]
    fn test_unfinished_timer_records_nothing() {
        let (monitor, _) = monitor();
        drop(monitor.start_operation("chat"));
        assert_eq!(monitor.metric_count(), 0);
    }

    #[test]
    fn test_performance_stats() {
        let (monitor, clock) = monitor();
        timed(&monitor, &clock, "chat", 100, true);
        timed(&monitor, &clock, "chat", 300, false);
        timed(&monitor, &clock, "abjad", 50, true);
        timed(&monitor, &clock, "chat", 200, true);

        let stats = monitor.performance_stats(HOUR);
        assert_eq!(stats.total_operations, 4);
        assert_eq!(stats.success_rate, 75.0);
        assert!((stats.average_response_time_ms - 162.5).abs() < 1e-9);
        assert_eq!(stats.slowest[0].duration, Duration::from_millis(300));
        assert_eq!(stats.slowest.last().unwrap().duration, Duration::from_millis(50));

        let chat = &stats.by_operation["chat"];
        assert_eq!(chat.count, 3);
        assert!((chat.average_duration_ms - 200.0).abs() < 1e-9);
        assert!((chat.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.by_operation["abjad"].success_rate, 100.0);
    }

    #[test]
    fn test_running_average_is_order_independent() {
        let durations = [700, 20, 350, 90, 1200, 5];
        let (forward, forward_clock) = monitor();
        let (backward, backward_clock) = monitor();

        for ms in durations {
            forward.record_duration("op", Duration::from_millis(ms), true, None, None);
        }
        for ms in durations.iter().rev() {
            backward.record_duration("op", Duration::from_millis(*ms), true, None, None);
        }
        forward_clock.advance(ChronoDuration::seconds(1));
        backward_clock.advance(ChronoDuration::seconds(1));

        let mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
        let a = forward.performance_stats(HOUR).by_operation["op"].average_duration_ms;
        let b = backward.performance_stats(HOUR).by_operation["op"].average_duration_ms;
        assert!((a - mean).abs() < 1e-9);
        assert!((b - mean).abs() < 1e-9);
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let (monitor, clock) = monitor();
        monitor.record_duration("old", Duration::from_millis(10), false, Some("boom"), None);
        clock.advance(ChronoDuration::minutes(90));
        monitor.record_duration("new", Duration::from_millis(10), true, None, None);

        let stats = monitor.performance_stats(HOUR);
        assert_eq!(stats.total_operations, 1);
        assert!(stats.by_operation.contains_key("new"));
        assert!(!stats.by_operation.contains_key("old"));
    }

    #[test]
    fn test_empty_window() {
        let (monitor, _) = monitor();
        let stats = monitor.performance_stats(HOUR);
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.average_response_time_ms, 0.0);
        assert_eq!(monitor.generate_report().health_score, 100.0);
    }

    #[test]
    fn test_metric_ring_buffer() {
        let clock = MockClock::fixed();
        let config = MonitoringConfig {
            max_metrics: 3,
            ..MonitoringConfig::default()
        };
        let monitor = OperationMonitor::with_clock(config, Arc::new(clock.clone()));
        for i in 0..5 {
            monitor.record_duration(&format!("op{}", i), Duration::from_millis(1), true, None, None);
        }

        let names: Vec<String> = monitor.metrics().into_iter().map(|m| m.operation_name).collect();
        assert_eq!(names, vec!["op2", "op3", "op4"]);
    }

    #[test]
    fn test_error_ring_buffer_keeps_newest() {
        let (monitor, _) = monitor();
        for i in 0..510 {
            monitor.log_error(&format!("error {}", i), "chat", Severity::Low);
        }
        let errors = monitor.errors();
        assert_eq!(errors.len(), 500);
        assert_eq!(errors[0].message, "error 10");
        assert_eq!(errors[499].message, "error 509");
    }

    #[test]
    fn test_error_stats() {
        let (monitor, clock) = monitor();
        monitor.log_error("old", "chat", Severity::High);
        clock.advance(ChronoDuration::minutes(150));
        monitor.log_error("a", "chat", Severity::Medium);
        clock.advance(ChronoDuration::minutes(30));
        monitor.log_error("b", "jafr", Severity::Low);
        monitor.log_error("c", "chat", Severity::Medium);

        let stats = monitor.error_stats(DAY);
        assert_eq!(stats.total_errors, 4);
        assert_eq!(stats.count(Severity::Medium), 2);
        assert_eq!(stats.count(Severity::Critical), 0);
        assert_eq!(stats.by_context["chat"], 3);
        assert_eq!(stats.by_context["jafr"], 1);
        assert_eq!(stats.hourly.len(), 24);
        // "a" is 30 minutes old, "old" exactly three hours
        assert_eq!(stats.hourly[23], 3);
        assert_eq!(stats.hourly[22], 0);
        assert_eq!(stats.hourly[21], 0);
        assert_eq!(stats.hourly[20], 1);
        assert_eq!(stats.hourly.iter().sum::<usize>(), 4);
        assert_eq!(stats.recent.last().unwrap().message, "c");
    }

    #[test]
    fn test_recent_errors_capped_at_twenty() {
        let (monitor, _) = monitor();
        for i in 0..30 {
            monitor.log_error(&format!("e{}", i), "ui", Severity::Low);
        }
        let stats = monitor.error_stats(DAY);
        assert_eq!(stats.recent.len(), 20);
        assert_eq!(stats.recent[0].message, "e10");
        assert_eq!(stats.recent[19].message, "e29");
    }

    #[test]
    fn test_critical_errors_are_notified() {
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let (monitor, _) = monitor();
        let monitor = monitor.with_notifier(notifier.clone());

        monitor.log_error("slow", "chat", Severity::High);
        monitor.log_error("exploded", "chat", Severity::Critical);

        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.error_count(), 2);
    }

    #[test]
    fn test_notifier_failures_are_swallowed() {
        let (monitor, _) = monitor();
        let failing = monitor.clone().with_notifier(Arc::new(FailingNotifier));
        failing.log_error("exploded", "chat", Severity::Critical);

        let panicking = monitor.with_notifier(Arc::new(PanickingNotifier));
        panicking.log_error("exploded again", "chat", Severity::Critical);

        assert_eq!(panicking.error_count(), 2);
    }

    #[test]
    fn test_webhook_without_runtime_is_swallowed() {
        let config = MonitoringConfig {
            critical_webhook: Some("http://127.0.0.1:9/hook".into()),
            ..MonitoringConfig::default()
        };
        let monitor = OperationMonitor::new(config);
        monitor.log_error("exploded", "chat", Severity::Critical);
        assert_eq!(monitor.error_count(), 1);
    }

    #[test]
    fn test_health_score_formula() {
        let (monitor, clock) = monitor();
        // 3 of 4 succeed (75%), mean 2500ms
        timed(&monitor, &clock, "chat", 2500, true);
        timed(&monitor, &clock, "chat", 2500, true);
        timed(&monitor, &clock, "chat", 2500, true);
        timed(&monitor, &clock, "chat", 2500, false);
        monitor.log_error("bad gateway", "chat", Severity::High);

        let report = monitor.generate_report();
        // 100 - 2*(95-75) - (2500-2000)/100 - 5*1 = 50
        assert!((report.health_score - 50.0).abs() < 1e-9);
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("Success rate"));
    }

    #[test]
    fn test_health_score_clamps_at_zero() {
        let (monitor, _) = monitor();
        for _ in 0..12 {
            monitor.log_error("down", "chat", Severity::Critical);
        }
        let report = monitor.generate_report();
        assert_eq!(report.health_score, 0.0);
        assert!(report.recommendations.iter().any(|r| r.contains("critical")));
    }

    #[test]
    fn test_all_recommendations_fire_together() {
        let (monitor, clock) = monitor();
        timed(&monitor, &clock, "chat", 4000, false);
        for _ in 0..51 {
            monitor.log_error("x", "chat", Severity::Low);
        }
        monitor.log_error("y", "chat", Severity::Critical);

        let report = monitor.generate_report();
        assert_eq!(report.recommendations.len(), 4);
    }

    #[test]
    fn test_report_is_deterministic() {
        let build = || {
            let (monitor, clock) = monitor();
            timed(&monitor, &clock, "chat", 120, true);
            timed(&monitor, &clock, "abjad", 40, false);
            monitor.log_error("oops", "abjad", Severity::High);
            clock.advance(ChronoDuration::minutes(5));
            monitor.generate_report()
        };

        assert_eq!(build(), build());
    }

    #[test]
    fn test_purge_expired_drops_week_old_entries() {
        let (monitor, clock) = monitor();
        monitor.record_duration("old", Duration::from_millis(5), true, None, None);
        monitor.log_error("old", "chat", Severity::Low);
        clock.advance(ChronoDuration::days(6));
        monitor.record_duration("recent", Duration::from_millis(5), true, None, None);
        clock.advance(ChronoDuration::days(1) + ChronoDuration::seconds(1));

        assert_eq!(monitor.purge_expired(), (1, 1));
        assert_eq!(monitor.metric_count(), 1);
        assert_eq!(monitor.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_sweep_runs_periodically() {
        let (monitor, clock) = monitor();
        monitor.log_error("old", "chat", Severity::Low);
        let handle = monitor.start_retention_sweep_every(Duration::from_millis(50));

        clock.advance(ChronoDuration::days(8));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(monitor.error_count(), 0);
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_sweep_ends_once_monitor_is_dropped() {
        let (monitor, _clock) = monitor();
        let handle = monitor.start_retention_sweep_every(Duration::from_millis(50));

        drop(monitor);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(handle.is_finished());
    }
}
