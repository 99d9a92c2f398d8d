use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error type for petcare
///
/// Errors are cloneable and serializable so the sync core can keep the last
/// failure inside a [`crate::SyncState`] snapshot and hand it to consumers.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct PetcareError {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable error message, safe to show to end users
    pub message: String,
    /// Optional context for additional details (upstream error text, ids)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Severity level
    pub severity: ErrorSeverity,
    /// Error category used to decide how the failure is surfaced
    pub category: ErrorCategory,
}

impl PetcareError {
    /// Create a new error builder with the specified error code
    pub fn new(code: ErrorCode) -> PetcareErrorBuilder {
        PetcareErrorBuilder {
            code,
            message: String::new(),
            context: None,
            severity: ErrorSeverity::Error,
            category: code.default_category(),
        }
    }

    /// True for the store's "record not found" signal
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::ProfileNotFound
    }

    /// True for failures of a consumer action (bad credentials, duplicate email)
    pub fn is_action_failure(&self) -> bool {
        self.category == ErrorCategory::Action
    }

    /// True for failures while resolving session or profile state
    pub fn is_resolution_failure(&self) -> bool {
        self.category == ErrorCategory::Resolution
    }

    /// Re-tag this error as a resolution failure, keeping code and message
    pub fn into_resolution_failure(mut self) -> Self {
        self.category = ErrorCategory::Resolution;
        self
    }

    /// Re-tag this error as a failed consumer action
    pub fn into_action_failure(mut self) -> Self {
        self.category = ErrorCategory::Action;
        self
    }
}

/// Builder for creating PetcareError instances
pub struct PetcareErrorBuilder {
    code: ErrorCode,
    message: String,
    context: Option<String>,
    severity: ErrorSeverity,
    category: ErrorCategory,
}

impl PetcareErrorBuilder {
    /// Set the error message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the error context
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the error severity
    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the error category
    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// Build the final PetcareError
    pub fn build(self) -> PetcareError {
        PetcareError {
            code: self.code,
            message: self.message,
            context: self.context,
            severity: self.severity,
            category: self.category,
        }
    }
}

/// Error codes for different types of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Identity provider errors
    InvalidCredentials,
    UserAlreadyExists,
    AuthRequestFailed,
    SessionExpired,

    // Profile store errors
    ProfileNotFound,
    StoreRequestFailed,

    // Transport errors
    Timeout,
    ResponseInvalid,

    // Configuration errors
    ConfigInvalid,

    // Lifecycle errors
    AlreadyStarted,
    NotRunning,

    Internal,
}

impl ErrorCode {
    fn default_category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidCredentials | ErrorCode::UserAlreadyExists => ErrorCategory::Action,
            ErrorCode::AuthRequestFailed
            | ErrorCode::SessionExpired
            | ErrorCode::StoreRequestFailed
            | ErrorCode::Timeout
            | ErrorCode::ResponseInvalid => ErrorCategory::Network,
            ErrorCode::ProfileNotFound => ErrorCategory::Resolution,
            ErrorCode::ConfigInvalid => ErrorCategory::Configuration,
            ErrorCode::AlreadyStarted | ErrorCode::NotRunning | ErrorCode::Internal => {
                ErrorCategory::Internal
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code_str = match self {
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::UserAlreadyExists => "USER_ALREADY_EXISTS",
            ErrorCode::AuthRequestFailed => "AUTH_REQUEST_FAILED",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::ProfileNotFound => "PROFILE_NOT_FOUND",
            ErrorCode::StoreRequestFailed => "STORE_REQUEST_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ResponseInvalid => "RESPONSE_INVALID",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::AlreadyStarted => "ALREADY_STARTED",
            ErrorCode::NotRunning => "NOT_RUNNING",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", code_str)
    }
}

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Warning that doesn't prevent operation
    Warning,
    /// Error that affects functionality but allows continued operation
    Error,
    /// Severe error that prevents further operation
    Critical,
}

/// Error category, decides how a failure is surfaced to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A consumer action failed; the mirrored state is untouched and the user may retry
    Action,
    /// Resolving session or profile failed; the mirrored data is cleared
    Resolution,
    /// Transport-level failure talking to the provider or store
    Network,
    /// Invalid or missing configuration
    Configuration,
    /// Programming or lifecycle errors
    Internal,
}

/// Type alias for petcare results
pub type PetcareResult<T> = Result<T, PetcareError>;

impl From<serde_json::Error> for PetcareError {
    fn from(err: serde_json::Error) -> Self {
        response_invalid("JSON payload", err)
    }
}

// Helper functions to create standard errors

/// Bad email/password combination
pub fn invalid_credentials() -> PetcareError {
    PetcareError::new(ErrorCode::InvalidCredentials)
        .message("Invalid login credentials")
        .severity(ErrorSeverity::Warning)
        .build()
}

/// Sign-up with an email that is already registered
pub fn user_already_exists(email: &str) -> PetcareError {
    PetcareError::new(ErrorCode::UserAlreadyExists)
        .message("User already registered")
        .context(email)
        .severity(ErrorSeverity::Warning)
        .build()
}

/// Identity provider request failed for a reason other than credentials
pub fn auth_request_failed(operation: &str, err: impl fmt::Display) -> PetcareError {
    PetcareError::new(ErrorCode::AuthRequestFailed)
        .message(format!("Authentication request '{}' failed", operation))
        .context(err.to_string())
        .build()
}

/// The held session expired and could not be refreshed
pub fn session_expired() -> PetcareError {
    PetcareError::new(ErrorCode::SessionExpired)
        .message("Session expired, please sign in again")
        .severity(ErrorSeverity::Warning)
        .build()
}

/// The profile store has no record for the identity
pub fn profile_not_found(identity_id: &str) -> PetcareError {
    PetcareError::new(ErrorCode::ProfileNotFound)
        .message("Profile not found")
        .context(identity_id)
        .severity(ErrorSeverity::Warning)
        .build()
}

/// Profile store request failed
pub fn store_request_failed(operation: &str, err: impl fmt::Display) -> PetcareError {
    PetcareError::new(ErrorCode::StoreRequestFailed)
        .message(format!("Profile store operation '{}' failed", operation))
        .context(err.to_string())
        .build()
}

/// A provider or store call did not complete in time
pub fn timeout(operation: &str, after: Duration) -> PetcareError {
    PetcareError::new(ErrorCode::Timeout)
        .message(format!("Operation '{}' timed out", operation))
        .context(format!("no response after {:?}", after))
        .build()
}

/// A backend response could not be interpreted
pub fn response_invalid(what: &str, err: impl fmt::Display) -> PetcareError {
    PetcareError::new(ErrorCode::ResponseInvalid)
        .message(format!("Invalid response: {}", what))
        .context(err.to_string())
        .build()
}

/// Create a config invalid error
pub fn config_invalid(key: &str, reason: &str) -> PetcareError {
    PetcareError::new(ErrorCode::ConfigInvalid)
        .message(format!("Invalid configuration for '{}'", key))
        .context(reason)
        .severity(ErrorSeverity::Critical)
        .build()
}

/// The sync core was started twice
pub fn already_started() -> PetcareError {
    PetcareError::new(ErrorCode::AlreadyStarted)
        .message("Identity sync has already been started")
        .build()
}

/// The sync core is not running (never started, or torn down)
pub fn not_running() -> PetcareError {
    PetcareError::new(ErrorCode::NotRunning)
        .message("Identity sync is not running")
        .build()
}

/// Create an internal error
pub fn internal(message: impl Into<String>) -> PetcareError {
    PetcareError::new(ErrorCode::Internal)
        .message(message)
        .severity(ErrorSeverity::Critical)
        .build()
}
