//! Retry policies with exponential backoff
//!
//! Wraps LLM API calls and calculations, retrying classified transient
//! failures with capped exponential backoff and optional jitter. Circuit
//! breaking and read-through caching layer on top of the same loop.

use super::cache::CacheStore;
use super::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot};
use super::error::ServiceError;
use super::logging::EventLogger;
use super::monitor::OperationMonitor;
use crate::clock::{SharedClock, system_clock};
use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Message keywords that mark an error as transient under the default condition
const DEFAULT_TRANSIENT_KEYWORDS: [&str; 6] = [
    "timeout",
    "network",
    "connection",
    "rate limit",
    "server error",
    "service unavailable",
];

const API_NETWORK_KEYWORDS: [&str; 3] = ["network", "timeout", "connection"];

const CALCULATION_KEYWORDS: [&str; 4] = ["timeout", "memory", "resource", "temporary"];

/// Fraction of the delay jitter may add or remove
const JITTER_RATIO: f64 = 0.1;

/// Decides whether a failure is worth another attempt
#[derive(Clone)]
pub struct RetryCondition(Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>);

impl RetryCondition {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ServiceError) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Transient status codes, network/timeout failures, or a transient-sounding message
    pub fn transient() -> Self {
        Self::new(|error| match error {
            ServiceError::Network(_) | ServiceError::Timeout(_) => true,
            ServiceError::CircuitOpen { .. } => false,
            _ => error.has_transient_status() || error.message_contains_any(&DEFAULT_TRANSIENT_KEYWORDS),
        })
    }

    /// Transient status codes only, plus network failures when asked for
    pub fn api(retry_on_network: bool) -> Self {
        Self::new(move |error| {
            if error.has_transient_status() {
                return true;
            }
            retry_on_network
                && match error {
                    ServiceError::Network(_) | ServiceError::Timeout(_) => true,
                    ServiceError::CircuitOpen { .. } => false,
                    _ => error.message_contains_any(&API_NETWORK_KEYWORDS),
                }
        })
    }

    /// Resource exhaustion and timeouts during local computation
    pub fn calculation() -> Self {
        Self::new(|error| match error {
            ServiceError::Timeout(_) => true,
            ServiceError::CircuitOpen { .. } => false,
            _ => error.message_contains_any(&CALCULATION_KEYWORDS),
        })
    }

    /// Never retry
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    pub fn should_retry(&self, error: &ServiceError) -> bool {
        (self.0)(error)
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::transient()
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryCondition(..)")
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries including the first one, at least 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Perturb each delay by up to ±10%
    pub jitter: bool,
    pub retry_condition: RetryCondition,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            retry_condition: RetryCondition::transient(),
        }
    }
}

impl RetryConfig {
    /// Conservative config for production
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            ..Self::default()
        }
    }

    /// Aggressive config for development/testing
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.5,
            ..Self::default()
        }
    }

    /// Profile for chat-completion requests
    pub fn api_call(max_attempts: Option<u32>, retry_on_network: bool) -> Self {
        Self {
            max_attempts: max_attempts.unwrap_or(3).max(1),
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(15000),
            backoff_multiplier: 1.5,
            jitter: true,
            retry_condition: RetryCondition::api(retry_on_network),
        }
    }

    /// Profile for numerology computations
    pub fn calculation(max_attempts: Option<u32>, fast: bool) -> Self {
        Self {
            max_attempts: max_attempts.unwrap_or(2).max(1),
            base_delay: Duration::from_millis(if fast { 500 } else { 1000 }),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 1.2,
            jitter: false,
            retry_condition: RetryCondition::calculation(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_condition = condition;
        self
    }

    /// Unperturbed delay after failed attempt `attempt` (1-based):
    /// `min(base_delay * multiplier^(attempt - 1), max_delay)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = (self.base_delay.as_millis() as f64) * self.backoff_multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Backoff delay with jitter applied when enabled
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if !self.jitter {
            return delay;
        }

        let delay_ms = delay.as_millis() as f64;
        let offset = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO) * delay_ms;
        Duration::from_millis((delay_ms + offset).max(0.0) as u64)
    }
}

/// One failed try inside a retry sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub error: ServiceError,
    /// Wait scheduled after this attempt; zero when no retry followed
    #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
    pub delay: Duration,
}

/// Result of a retry sequence
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ServiceError>,
    /// Failed attempts in order
    pub attempts: Vec<RetryAttempt>,
    #[serde(rename = "total_elapsed_ms", serialize_with = "serialize_millis")]
    pub total_elapsed: Duration,
    /// Served from a cache without running the operation
    pub cached: bool,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ServiceError> {
        self.result.as_ref().err()
    }

    /// Number of times the operation was invoked
    pub fn tries(&self) -> usize {
        match self.result {
            Ok(_) if self.cached => 0,
            Ok(_) => self.attempts.len() + 1,
            Err(_) => self.attempts.len(),
        }
    }

    pub fn into_result(self) -> Result<T, ServiceError> {
        self.result
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Runs operations under a retry policy, with optional circuit breaking,
/// read-through caching and monitoring of every attempt
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    circuits: CircuitBreakerRegistry,
    monitor: Option<OperationMonitor>,
    logger: EventLogger,
    clock: SharedClock,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(system_clock(), EventLogger::default())
    }
}

impl RetryExecutor {
    pub fn new(clock: SharedClock, logger: EventLogger) -> Self {
        Self {
            circuits: CircuitBreakerRegistry::new(clock.clone(), logger.clone()),
            monitor: None,
            logger: logger.with_clock(clock.clone()),
            clock,
        }
    }

    /// Record every attempt in `monitor`
    pub fn with_monitor(mut self, monitor: OperationMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn circuits(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    pub fn circuit_state(&self, circuit_key: &str) -> Option<CircuitSnapshot> {
        self.circuits.state(circuit_key)
    }

    pub fn reset_circuit(&self, circuit_key: &str) -> bool {
        self.circuits.reset(circuit_key)
    }

    pub fn circuit_keys(&self) -> Vec<String> {
        self.circuits.keys()
    }

    /// Execute `operation` under `config`
    pub async fn execute<F, Fut, T>(&self, operation: F, config: &RetryConfig) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.execute_named("operation", operation, config).await
    }

    /// Execute `operation` under `config`, labelling logs and metrics with `name`
    pub async fn execute_named<F, Fut, T>(&self, name: &str, mut operation: F, config: &RetryConfig) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let max_attempts = config.max_attempts.max(1);
        let mut attempts: Vec<RetryAttempt> = Vec::new();
        let mut attempt = 1;

        loop {
            debug!("Executing {} (attempt {}/{})", name, attempt, max_attempts);
            let timer = self.monitor.as_ref().map(|monitor| monitor.start_operation(name));

            match operation().await {
                Ok(value) => {
                    if let Some(timer) = timer {
                        timer.finish(true, None, None);
                    }
                    if attempt > 1 {
                        self.logger.log_recovered(name, attempt);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_elapsed: started.elapsed(),
                        cached: false,
                    };
                }
                Err(error) => {
                    if let Some(timer) = timer {
                        timer.finish(false, Some(error.message().as_str()), None);
                    }

                    attempts.push(RetryAttempt {
                        attempt,
                        timestamp: self.clock.now(),
                        error: error.clone(),
                        delay: Duration::ZERO,
                    });

                    let retryable = config.retry_condition.should_retry(&error);
                    if !retryable || attempt >= max_attempts {
                        self.logger.log_give_up(name, attempt, retryable, &error);
                        return RetryOutcome {
                            result: Err(error),
                            attempts,
                            total_elapsed: started.elapsed(),
                            cached: false,
                        };
                    }

                    let delay = config.calculate_delay(attempt);
                    if let Some(record) = attempts.last_mut() {
                        record.delay = delay;
                    }

                    self.logger.log_retry(name, attempt, max_attempts, &error, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute with the chat-completion profile
    pub async fn execute_api_call<F, Fut, T>(
        &self,
        name: &str,
        operation: F,
        max_attempts: Option<u32>,
        retry_on_network: bool,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let config = RetryConfig::api_call(max_attempts, retry_on_network);
        self.execute_named(name, operation, &config).await
    }

    /// Execute with the calculation profile
    pub async fn execute_calculation<F, Fut, T>(
        &self,
        name: &str,
        operation: F,
        max_attempts: Option<u32>,
        fast: bool,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let config = RetryConfig::calculation(max_attempts, fast);
        self.execute_named(name, operation, &config).await
    }

    /// Execute through the circuit named `circuit_key`.
    ///
    /// Returns [`ServiceError::CircuitOpen`] without invoking `operation` when
    /// the circuit refuses the call; otherwise the retry outcome, whose
    /// overall success or failure is fed back into the circuit.
    pub async fn execute_with_circuit_breaker<F, Fut, T>(
        &self,
        operation: F,
        circuit_key: &str,
        config: &RetryConfig,
    ) -> Result<RetryOutcome<T>, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let permit = self.circuits.try_acquire(circuit_key)?;
        if permit.is_probe() {
            debug!("Circuit {} half-open, sending probe", circuit_key);
        }

        let outcome = self.execute_named(circuit_key, operation, config).await;
        if outcome.is_success() {
            permit.succeed();
        } else {
            permit.fail();
        }

        Ok(outcome)
    }

    /// Serve `key` from `cache` when present, otherwise execute and store a
    /// successful result.
    pub async fn execute_cached<F, Fut, T>(
        &self,
        name: &str,
        cache: &CacheStore<T>,
        key: &str,
        operation: F,
        config: &RetryConfig,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
        T: Clone + Serialize,
    {
        if let Some(value) = cache.get(key) {
            debug!("Cache hit for {} in {}", key, cache.name());
            return RetryOutcome {
                result: Ok(value),
                attempts: Vec::new(),
                total_elapsed: Duration::ZERO,
                cached: true,
            };
        }

        let outcome = self.execute_named(name, operation, config).await;
        if let Ok(value) = &outcome.result {
            cache.set(key, value.clone(), None);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::resilience::config::{CacheConfig, MonitoringConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_attempts: u32, base_ms: u64) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(base_ms))
            .with_jitter(false)
    }

    #[test]
    fn test_default_condition() {
        let condition = RetryCondition::transient();

        for status in [408, 429, 500, 502, 503, 504] {
            assert!(condition.should_retry(&ServiceError::http(status, "x")));
        }
        assert!(!condition.should_retry(&ServiceError::http(400, "Bad Request")));
        assert!(!condition.should_retry(&ServiceError::http(401, "Unauthorized")));
        assert!(condition.should_retry(&ServiceError::other("Connection reset by peer")));
        assert!(condition.should_retry(&ServiceError::other("RATE LIMIT exceeded")));
        assert!(condition.should_retry(&ServiceError::Network("dns".into())));
        assert!(!condition.should_retry(&ServiceError::Validation("empty name".into())));
        assert!(!condition.should_retry(&ServiceError::CircuitOpen { circuit: "k".into() }));
    }

    #[test]
    fn test_api_condition() {
        let strict = RetryCondition::api(false);
        assert!(strict.should_retry(&ServiceError::http(429, "Too Many Requests")));
        assert!(!strict.should_retry(&ServiceError::Network("refused".into())));
        assert!(!strict.should_retry(&ServiceError::other("connection dropped")));

        let lenient = RetryCondition::api(true);
        assert!(lenient.should_retry(&ServiceError::Network("refused".into())));
        assert!(lenient.should_retry(&ServiceError::other("connection dropped")));
        assert!(!lenient.should_retry(&ServiceError::other("rate limit")));
    }

    #[test]
    fn test_calculation_condition() {
        let condition = RetryCondition::calculation();
        assert!(condition.should_retry(&ServiceError::Calculation("out of memory".into())));
        assert!(condition.should_retry(&ServiceError::other("temporary glitch")));
        assert!(!condition.should_retry(&ServiceError::http(503, "unavailable")));
    }

    #[test]
    fn test_profiles() {
        let api = RetryConfig::api_call(None, false);
        assert_eq!(api.max_attempts, 3);
        assert_eq!(api.base_delay, Duration::from_millis(2000));
        assert_eq!(api.max_delay, Duration::from_millis(15000));
        assert_eq!(api.backoff_multiplier, 1.5);
        assert!(api.jitter);

        let calc = RetryConfig::calculation(Some(4), true);
        assert_eq!(calc.max_attempts, 4);
        assert_eq!(calc.base_delay, Duration::from_millis(500));
        assert!(!calc.jitter);
        assert_eq!(RetryConfig::calculation(None, false).base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_unperturbed_delays_follow_capped_exponential() {
        let profiles = [
            no_jitter(10, 100),
            RetryConfig::api_call(Some(10), false).with_jitter(false),
            RetryConfig::calculation(Some(10), true),
            RetryConfig::aggressive().with_jitter(false),
        ];

        for config in profiles {
            let delays: Vec<Duration> = (1..=12).map(|attempt| config.calculate_delay(attempt)).collect();
            assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", delays);

            for (i, delay) in delays.iter().enumerate() {
                let expected_ms = (config.base_delay.as_millis() as f64
                    * config.backoff_multiplier.powi(i as i32))
                .min(config.max_delay.as_millis() as f64);
                assert_eq!(delay.as_millis() as u64, expected_ms as u64, "attempt {}", i + 1);
            }
        }
    }

    #[test]
    fn test_huge_attempt_numbers_saturate_at_cap() {
        let config = RetryConfig::api_call(None, false);
        assert_eq!(config.backoff_delay(u32::MAX), config.max_delay);
        assert_eq!(RetryConfig::calculation(None, false).backoff_delay(1), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let config = RetryConfig::default().with_base_delay(Duration::from_millis(1000));
        for _ in 0..200 {
            let delay = config.calculate_delay(1).as_millis();
            assert!((900..=1100).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_on_third_attempt() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute(
                || {
                    let count = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if count < 2 {
                            Err(ServiceError::http(503, "Service Unavailable"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                &no_jitter(3, 100),
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&"ok"));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].attempt, 1);
        assert_eq!(outcome.attempts[0].delay, Duration::from_millis(100));
        assert_eq!(outcome.attempts[1].attempt, 2);
        assert_eq!(outcome.attempts[1].delay, Duration::from_millis(200));
        assert!(outcome.total_elapsed >= Duration::from_millis(300));
        assert_eq!(outcome.tries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_all_attempts() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ServiceError::Timeout("upstream".into())) }
                },
                &no_jitter(4, 10),
            )
            .await;

        assert!(!outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.attempts.last().unwrap().delay, Duration::ZERO);
        assert!(matches!(outcome.error(), Some(ServiceError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ServiceError::http(400, "Bad Request")) }
                },
                &no_jitter(5, 10),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].delay, Duration::ZERO);
        assert_eq!(outcome.total_elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_call_profile() {
        let executor = RetryExecutor::default();

        let calls = AtomicU32::new(0);
        let network: RetryOutcome<()> = executor
            .execute_api_call(
                "chat",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ServiceError::Network("connection refused".into())) }
                },
                None,
                false,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(network.error(), Some(ServiceError::Network(_))));

        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let unavailable = executor
            .execute_api_call(
                "chat",
                || {
                    let count = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if count == 0 {
                            Err(ServiceError::http(503, "Service Unavailable"))
                        } else {
                            Ok("reply")
                        }
                    }
                },
                None,
                false,
            )
            .await;
        assert!(unavailable.is_success());
        assert_eq!(unavailable.tries(), 2);
        let delay = unavailable.attempts[0].delay.as_millis();
        assert!((1800..=2200).contains(&delay), "delay {} not around 2000ms", delay);
        assert!(started.elapsed() >= Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calculation_profile() {
        let executor = RetryExecutor::default();

        let calls = AtomicU32::new(0);
        let temporary = executor
            .execute_calculation(
                "abjad",
                || {
                    let count = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if count == 0 {
                            Err(ServiceError::Calculation("temporary table lock".into()))
                        } else {
                            Ok(786)
                        }
                    }
                },
                None,
                true,
            )
            .await;
        assert_eq!(temporary.value(), Some(&786));
        assert_eq!(temporary.attempts.len(), 1);
        assert_eq!(temporary.attempts[0].delay, Duration::from_millis(500));

        let calls = AtomicU32::new(0);
        let unavailable: RetryOutcome<u32> = executor
            .execute_calculation(
                "abjad",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ServiceError::http(503, "Service Unavailable")) }
                },
                Some(3),
                true,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(unavailable.attempts[0].delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_recorded_in_monitor() {
        let monitor = OperationMonitor::new(MonitoringConfig::default());
        let executor = RetryExecutor::default().with_monitor(monitor.clone());
        let calls = AtomicU32::new(0);

        let _ = executor
            .execute_named(
                "chat",
                || {
                    let count = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if count == 0 {
                            Err(ServiceError::http(502, "Bad Gateway"))
                        } else {
                            Ok(1)
                        }
                    }
                },
                &no_jitter(3, 10),
            )
            .await;

        let stats = monitor.performance_stats(Duration::from_secs(60));
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.by_operation["chat"].count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_and_probes() {
        let clock = MockClock::fixed();
        let executor = RetryExecutor::new(Arc::new(clock.clone()), EventLogger::default());
        let config = no_jitter(1, 10);
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let outcome: RetryOutcome<()> = executor
                .execute_with_circuit_breaker(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err(ServiceError::http(500, "Internal Server Error")) }
                    },
                    "llm",
                    &config,
                )
                .await
                .unwrap();
            assert!(!outcome.is_success());
        }

        let rejected = executor
            .execute_with_circuit_breaker(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                "llm",
                &config,
            )
            .await;
        assert!(matches!(rejected, Err(ServiceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        clock.advance(chrono::Duration::seconds(60));
        let probe = executor
            .execute_with_circuit_breaker(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                "llm",
                &config,
            )
            .await
            .unwrap();
        assert!(probe.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            executor.circuits().state("llm").unwrap().phase,
            crate::resilience::circuit_breaker::CircuitPhase::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cached_reads_through() {
        let executor = RetryExecutor::default();
        let cache: CacheStore<String> =
            CacheStore::new(CacheConfig::new("api", 10, Duration::from_secs(60)));
        let calls = AtomicU32::new(0);
        let config = no_jitter(2, 10);

        let operation = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("reply".to_string()) }
        };

        let first = executor.execute_cached("chat", &cache, "k", operation, &config).await;
        assert!(!first.cached);
        assert_eq!(first.tries(), 1);

        let second = executor
            .execute_cached(
                "chat",
                &cache,
                "k",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok("other".to_string()) }
                },
                &config,
            )
            .await;
        assert!(second.cached);
        assert_eq!(second.value().map(String::as_str), Some("reply"));
        assert_eq!(second.tries(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
