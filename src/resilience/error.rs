//! Boundary error type and error classification
//!
//! Wrapped operations (LLM API calls, calculations) fail with a
//! [`ServiceError`]. Retry conditions and the application error reporter
//! match on its variants instead of probing arbitrary fields.

use super::monitor::{OperationMonitor, Severity};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// HTTP status codes treated as transient by every retry profile.
pub const TRANSIENT_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Failure reported by a wrapped operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ServiceError {
    /// The remote service answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {0}")]
    Network(String),
    /// The operation did not complete in time
    #[error("timeout: {0}")]
    Timeout(String),
    /// Input rejected before reaching the service
    #[error("validation error: {0}")]
    Validation(String),
    /// Local numerology computation failed
    #[error("calculation error: {0}")]
    Calculation(String),
    /// Presentation-layer failure
    #[error("ui error: {0}")]
    Ui(String),
    /// Anything else
    #[error("{0}")]
    Other(String),
    /// Raised locally when a circuit breaker rejects the call
    #[error("circuit breaker is open for '{circuit}'")]
    CircuitOpen { circuit: String },
}

impl ServiceError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        ServiceError::Other(message.into())
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Full human-readable message, including the variant prefix
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the status is in [`TRANSIENT_STATUS_CODES`]
    pub fn has_transient_status(&self) -> bool {
        self.status()
            .is_some_and(|status| TRANSIENT_STATUS_CODES.contains(&status))
    }

    /// Case-insensitive check of the message against a keyword list
    pub fn message_contains_any(&self, keywords: &[&str]) -> bool {
        let message = self.message().to_lowercase();
        keywords.iter().any(|keyword| message.contains(keyword))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ServiceError::CircuitOpen { .. })
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ServiceError::Timeout(error.to_string())
        } else if let Some(status) = error.status() {
            ServiceError::http(status.as_u16(), error.to_string())
        } else if error.is_connect() || error.is_request() {
            ServiceError::Network(error.to_string())
        } else {
            ServiceError::Other(error.to_string())
        }
    }
}

/// Category an error falls into for user-facing reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Api,
    Network,
    Validation,
    Calculation,
    Ui,
    Unknown,
}

impl ErrorKind {
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Validation => Severity::Low,
            ErrorKind::Ui => Severity::Medium,
            ErrorKind::Network => Severity::Medium,
            ErrorKind::Api => Severity::High,
            ErrorKind::Calculation => Severity::High,
            ErrorKind::Unknown => Severity::Critical,
        }
    }

    /// Fixed message shown to the user, in the app's display language
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Api => "حدث خطأ في الاتصال بالخدمة. يرجى المحاولة مرة أخرى.",
            ErrorKind::Network => "تعذر الاتصال بالشبكة. تحقق من اتصالك بالإنترنت.",
            ErrorKind::Validation => "البيانات المدخلة غير صحيحة. يرجى مراجعتها.",
            ErrorKind::Calculation => "حدث خطأ أثناء الحساب. يرجى المحاولة مرة أخرى.",
            ErrorKind::Ui => "حدث خطأ في الواجهة. يرجى تحديث الصفحة.",
            ErrorKind::Unknown => "حدث خطأ غير متوقع. يرجى المحاولة لاحقاً.",
        }
    }

    /// Whether retrying the same action may succeed
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Api | ErrorKind::Network | ErrorKind::Calculation
        )
    }

    /// Whether the user can fix the problem themselves
    pub fn actionable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Validation | ErrorKind::Ui
        )
    }

    pub fn notification_style(self) -> NotificationStyle {
        match self {
            ErrorKind::Unknown => NotificationStyle::Blocking,
            _ => NotificationStyle::Toast,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Api => "api",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Calculation => "calculation",
            ErrorKind::Ui => "ui",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How the UI layer should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStyle {
    /// Non-blocking notification
    Toast,
    /// Interruptive dialog, reserved for unknown failures
    Blocking,
}

/// A classified error ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Technical message, logged but not shown
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    pub actionable: bool,
    pub context: String,
}

impl AppError {
    pub fn notification_style(&self) -> NotificationStyle {
        self.kind.notification_style()
    }
}

/// Map a boundary error to its category
pub fn classify(error: &ServiceError) -> ErrorKind {
    match error {
        ServiceError::Http { .. } | ServiceError::CircuitOpen { .. } => ErrorKind::Api,
        ServiceError::Network(_) | ServiceError::Timeout(_) => ErrorKind::Network,
        ServiceError::Validation(_) => ErrorKind::Validation,
        ServiceError::Calculation(_) => ErrorKind::Calculation,
        ServiceError::Ui(_) => ErrorKind::Ui,
        ServiceError::Other(_) => {
            if error.message_contains_any(&["network", "fetch", "connection", "timeout"]) {
                ErrorKind::Network
            } else {
                ErrorKind::Unknown
            }
        }
    }
}

/// Classifies errors and records them in the monitor's error log
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    monitor: OperationMonitor,
}

impl ErrorReporter {
    pub fn new(monitor: OperationMonitor) -> Self {
        Self { monitor }
    }

    /// Classify `error`, log it under `context` and return the display form
    pub fn report(&self, error: &ServiceError, context: &str) -> AppError {
        let kind = classify(error);
        let app_error = AppError {
            kind,
            severity: kind.severity(),
            message: error.message(),
            user_message: kind.user_message().to_string(),
            retryable: kind.retryable(),
            actionable: kind.actionable(),
            context: context.to_string(),
        };

        debug!("Classified error in {} as {} ({:?})", context, kind, app_error.severity);
        self.monitor
            .log_error(&app_error.message, context, app_error.severity);

        app_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::config::MonitoringConfig;

    #[test]
    fn test_status_and_message_accessors() {
        let error = ServiceError::http(503, "Service Unavailable");
        assert_eq!(error.status(), Some(503));
        assert!(error.has_transient_status());
        assert!(error.message_contains_any(&["service unavailable"]));

        let error = ServiceError::Validation("name is empty".into());
        assert_eq!(error.status(), None);
        assert!(!error.has_transient_status());
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&ServiceError::http(500, "boom")), ErrorKind::Api);
        assert_eq!(classify(&ServiceError::Network("reset".into())), ErrorKind::Network);
        assert_eq!(classify(&ServiceError::Timeout("slow".into())), ErrorKind::Network);
        assert_eq!(classify(&ServiceError::Validation("bad".into())), ErrorKind::Validation);
        assert_eq!(classify(&ServiceError::Calculation("overflow".into())), ErrorKind::Calculation);
        assert_eq!(classify(&ServiceError::Ui("render".into())), ErrorKind::Ui);
        assert_eq!(classify(&ServiceError::other("Failed to fetch")), ErrorKind::Network);
        assert_eq!(classify(&ServiceError::other("something odd")), ErrorKind::Unknown);
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ErrorKind::Validation.severity(), Severity::Low);
        assert_eq!(ErrorKind::Ui.severity(), Severity::Medium);
        assert_eq!(ErrorKind::Network.severity(), Severity::Medium);
        assert_eq!(ErrorKind::Api.severity(), Severity::High);
        assert_eq!(ErrorKind::Calculation.severity(), Severity::High);
        assert_eq!(ErrorKind::Unknown.severity(), Severity::Critical);
    }

    #[test]
    fn test_only_unknown_blocks() {
        for kind in [
            ErrorKind::Api,
            ErrorKind::Network,
            ErrorKind::Validation,
            ErrorKind::Calculation,
            ErrorKind::Ui,
        ] {
            assert_eq!(kind.notification_style(), NotificationStyle::Toast);
        }
        assert_eq!(ErrorKind::Unknown.notification_style(), NotificationStyle::Blocking);
    }

    #[test]
    fn test_reporter_writes_to_monitor() {
        let monitor = OperationMonitor::new(MonitoringConfig::default());
        let reporter = ErrorReporter::new(monitor.clone());

        let app_error = reporter.report(&ServiceError::http(502, "Bad Gateway"), "chat");

        assert_eq!(app_error.kind, ErrorKind::Api);
        assert!(app_error.retryable);
        assert!(!app_error.actionable);
        assert_eq!(app_error.user_message, ErrorKind::Api.user_message());
        assert_eq!(monitor.error_count(), 1);

        let stats = monitor.error_stats(std::time::Duration::from_secs(3600));
        assert_eq!(stats.by_context.get("chat"), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::High), Some(&1));
    }
}
