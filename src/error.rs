//! Error handling for the Metronome scheduler.
//!
//! This module provides:
//! - A crate-wide [`Result`] alias
//! - Machine-readable [`ErrorCode`]s for programmatic handling
//! - User-friendly messages vs detailed internal messages
//! - The cron [`CronParseError`] type carrying the offending position
//!
//! Façade operations fail eagerly with a [`SchedulerError`]; the scheduler
//! thread catches failures, reports them through the scheduler-listener
//! channel, and keeps looping. Job execution failures are NOT represented
//! here — they are values of `jobs::JobExecutionError` and never propagate
//! out of a worker thread.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by embedding applications for
/// programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Scheduling state errors (1000-1099)
    JobNotFound,
    TriggerNotFound,
    CalendarNotFound,
    JobAlreadyExists,
    TriggerAlreadyExists,
    CalendarAlreadyExists,
    CalendarInUse,
    TriggerWillNeverFire,

    // Lifecycle errors (1100-1199)
    NotInitialized,
    SchedulerShutdown,
    SchedulerInternal,
    SchedulerAlreadyExists,

    // Parse errors (2000-2099)
    CronParseFailed,
    InvalidConfiguration,

    // Validation errors (2100-2199)
    ValidationError,

    // Execution errors (3000-3099)
    JobFactoryFailed,
    ThreadPoolRejected,

    // Serialization errors (9000-9099)
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::TriggerNotFound => 1001,
            Self::CalendarNotFound => 1002,
            Self::JobAlreadyExists => 1003,
            Self::TriggerAlreadyExists => 1004,
            Self::CalendarAlreadyExists => 1005,
            Self::CalendarInUse => 1006,
            Self::TriggerWillNeverFire => 1007,

            Self::NotInitialized => 1100,
            Self::SchedulerShutdown => 1101,
            Self::SchedulerInternal => 1102,
            Self::SchedulerAlreadyExists => 1103,

            Self::CronParseFailed => 2000,
            Self::InvalidConfiguration => 2001,

            Self::ValidationError => 2100,

            Self::JobFactoryFailed => 3000,
            Self::ThreadPoolRejected => 3001,

            Self::SerializationError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "state",
            1100..=1199 => "lifecycle",
            2000..=2099 => "parse",
            2100..=2199 => "validation",
            3000..=3099 => "execution",
            _ => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cron Parse Error
// ═══════════════════════════════════════════════════════════════════════════════

/// A malformed cron expression, with the character position of the offending
/// token. Only raised at construction time, never at fire time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression '{expression}' near position {position}: {message}")]
pub struct CronParseError {
    /// The full expression that failed to parse
    pub expression: String,
    /// Character offset of the offending token within the expression
    pub position: usize,
    /// What went wrong
    pub message: String,
}

impl CronParseError {
    pub fn new(
        expression: impl Into<String>,
        position: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            expression: expression.into(),
            position,
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler Error
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for scheduler operations.
#[derive(Debug, Clone, Error)]
pub struct SchedulerError {
    /// Machine-readable code
    code: ErrorCode,
    /// User-facing message
    message: Cow<'static, str>,
    /// Internal detail, not meant for end users
    internal: Option<String>,
}

impl SchedulerError {
    /// Create a new error with a code and user message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// Create a new error with an additional internal detail message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            internal: Some(internal.into()),
        }
    }

    /// A scheduler operation was attempted before `initialize`/`start`.
    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::NotInitialized, "scheduler is not initialized")
    }

    /// A scheduler operation was attempted after `shutdown`.
    pub fn shutdown() -> Self {
        Self::new(
            ErrorCode::SchedulerShutdown,
            "scheduler has been shutdown",
        )
    }

    /// A job/trigger/calendar with the same key already exists.
    pub fn already_exists(code: ErrorCode, what: impl fmt::Display) -> Self {
        Self::new(code, format!("'{}' already exists", what))
    }

    /// A referenced job/trigger/calendar does not exist.
    pub fn not_found(code: ErrorCode, what: impl fmt::Display) -> Self {
        Self::new(code, format!("'{}' not found", what))
    }

    /// A trigger or configuration value failed validation.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// A configuration key carried an unusable value.
    pub fn configuration(key: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidConfiguration,
            format!("configuration key '{}': {}", key, detail),
        )
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.message
    }

    /// Get the internal detail message, if any.
    pub fn internal_message(&self) -> Option<&str> {
        self.internal.as_deref()
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(internal) = &self.internal {
            write!(f, " ({})", internal)?;
        }
        Ok(())
    }
}

impl From<CronParseError> for SchedulerError {
    fn from(err: CronParseError) -> Self {
        Self::with_internal(
            ErrorCode::CronParseFailed,
            "cron expression could not be parsed",
            err.to_string(),
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "serialization failed",
            err.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
