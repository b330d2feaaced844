use crate::config::Settings;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::resilience::config::ResilienceConfig;
use crate::resilience::error::{ErrorReporter, ServiceError};
use crate::resilience::logging::EventLogger;
use crate::resilience::monitor::{MonitorReport, OperationMonitor};
use crate::resilience::retry::{RetryAttempt, RetryConfig, RetryExecutor, RetryOutcome};
use anyhow::{Context, Result};
use clap::Args;
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of invocations that fail before the operation starts succeeding
    #[arg(short, long, default_value_t = 2)]
    pub failures: u32,
    /// HTTP status of each failure; 0 simulates a network error
    #[arg(short, long, default_value_t = 503)]
    pub status: u16,
    /// Total tries per run, overriding the settings file
    #[arg(short, long)]
    pub attempts: Option<u32>,
    /// Base backoff delay in milliseconds, overriding the settings file
    #[arg(long)]
    pub base_delay_ms: Option<u64>,
    /// Disable jitter on backoff delays
    #[arg(long)]
    pub no_jitter: bool,
    /// Route every run through the named circuit breaker
    #[arg(long)]
    pub circuit: Option<String>,
    /// How many times to run the operation
    #[arg(short, long, default_value_t = 1)]
    pub runs: u32,
}

/// One run of the simulated operation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: u32,
    pub success: bool,
    /// Invocations of the operation during this run
    pub tries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
    pub attempts: Vec<RetryAttempt>,
    pub total_elapsed_ms: u64,
    /// Refused by an open circuit without invoking the operation
    pub rejected_by_circuit: bool,
}

impl RunSummary {
    fn from_outcome(run: u32, outcome: RetryOutcome<String>) -> Self {
        Self {
            run,
            success: outcome.is_success(),
            tries: outcome.tries(),
            error: outcome.error().cloned(),
            total_elapsed_ms: outcome.total_elapsed.as_millis() as u64,
            attempts: outcome.attempts,
            rejected_by_circuit: false,
        }
    }

    fn rejected(run: u32, error: ServiceError) -> Self {
        Self {
            run,
            success: false,
            tries: 0,
            error: Some(error),
            attempts: Vec::new(),
            total_elapsed_ms: 0,
            rejected_by_circuit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub runs: Vec<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitSnapshot>,
    pub report: MonitorReport,
}

/// Handle `alaraf simulate`
pub async fn simulate_command(args: SimulateArgs, path: Option<PathBuf>) -> Result<()> {
    let settings = match path {
        Some(path) => Settings::load_from(&path)?,
        None => Settings::load()?,
    };

    let report = run_simulation(&args, settings.into_resilience_config()).await;
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize simulation report")?;
    println!("{}", json);
    Ok(())
}

/// Drive the simulated operation through a monitored executor
pub async fn run_simulation(args: &SimulateArgs, config: ResilienceConfig) -> SimulationReport {
    let monitor = OperationMonitor::new(config.monitoring.clone());
    let logger = EventLogger::new(config.monitoring.log_level);
    let executor = RetryExecutor::new(crate::clock::system_clock(), logger).with_monitor(monitor.clone());
    let reporter = ErrorReporter::new(monitor.clone());
    let retry = retry_config(args, config.retry);

    let invocations = Arc::new(AtomicU32::new(0));
    let failures = args.failures;
    let status = args.status;

    info!(
        "Simulating {} run(s), {} failure(s) with status {}",
        args.runs, failures, status
    );

    let mut runs = Vec::new();
    for run in 1..=args.runs.max(1) {
        let operation = || {
            let invocations = Arc::clone(&invocations);
            async move {
                let n = invocations.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(simulated_failure(status))
                } else {
                    Ok(format!("response #{}", n + 1))
                }
            }
        };

        let summary = match &args.circuit {
            Some(key) => match executor.execute_with_circuit_breaker(operation, key, &retry).await {
                Ok(outcome) => RunSummary::from_outcome(run, outcome),
                Err(rejection) => RunSummary::rejected(run, rejection),
            },
            None => RunSummary::from_outcome(run, executor.execute_named("simulate", operation, &retry).await),
        };

        if let Some(error) = &summary.error {
            reporter.report(error, "simulate");
        }
        runs.push(summary);
    }

    SimulationReport {
        runs,
        circuit: args.circuit.as_deref().and_then(|key| executor.circuit_state(key)),
        report: monitor.generate_report(),
    }
}

fn retry_config(args: &SimulateArgs, base: RetryConfig) -> RetryConfig {
    let mut retry = base;
    if let Some(attempts) = args.attempts {
        retry = retry.with_max_attempts(attempts);
    }
    if let Some(delay) = args.base_delay_ms {
        retry = retry.with_base_delay(Duration::from_millis(delay));
    }
    if args.no_jitter {
        retry = retry.with_jitter(false);
    }
    retry
}

fn simulated_failure(status: u16) -> ServiceError {
    if status == 0 {
        ServiceError::Network("connection reset by peer".to_string())
    } else {
        ServiceError::http(status, "simulated upstream failure")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SimulateArgs {
        SimulateArgs {
            failures: 2,
            status: 503,
            attempts: Some(3),
            base_delay_ms: Some(10),
            no_jitter: true,
            circuit: None,
            runs: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let report = run_simulation(&args(), ResilienceConfig::default()).await;

        assert_eq!(report.runs.len(), 1);
        let run = &report.runs[0];
        assert!(run.success);
        assert_eq!(run.tries, 3);
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[0].delay, Duration::from_millis(10));
        assert_eq!(run.attempts[1].delay, Duration::from_millis(20));
        assert_eq!(report.report.performance.total_operations, 3);
        assert_eq!(report.report.errors.total_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_status_fails_fast() {
        let args = SimulateArgs { status: 400, ..args() };
        let report = run_simulation(&args, ResilienceConfig::default()).await;

        let run = &report.runs[0];
        assert!(!run.success);
        assert_eq!(run.tries, 1);
        assert_eq!(run.error.as_ref().and_then(ServiceError::status), Some(400));
        assert_eq!(report.report.errors.total_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_and_rejects() {
        let args = SimulateArgs {
            failures: 100,
            attempts: Some(1),
            circuit: Some("llm".into()),
            runs: 7,
            ..args()
        };
        let report = run_simulation(&args, ResilienceConfig::default()).await;

        let rejected: Vec<bool> = report.runs.iter().map(|run| run.rejected_by_circuit).collect();
        assert_eq!(rejected, vec![false, false, false, false, false, true, true]);
        assert_eq!(report.runs[6].tries, 0);
        assert!(report.runs[6].error.as_ref().is_some_and(ServiceError::is_circuit_open));

        let circuit = report.circuit.unwrap();
        assert_eq!(circuit.consecutive_failures, 5);
    }
}
