//! Unified error handling.
//!
//! A `thiserror`-based model with:
//!   * Typed variants for common failure domains
//!   * A categorization layer (`ErrorCategory`) for analytics & reporting
//!   * Helper constructors
//!   * `From` conversions for common lower-level errors
//!   * An HTTP status mapping so API handlers can bubble errors with `?`
//!
//! Design goals:
//!   * Keep end-user messages clear & actionable
//!   * Avoid leaking internal implementation details in response bodies
//!   * Enable structured output to classify errors deterministically
//!
//! Categories are intentionally coarse to support metrics dashboards:
//!   - Input: User / data validation issues
//!   - Network: Transient or remote-service problems (scanner, queue, probe)
//!   - Parse: Syntax / data-format decoding issues
//!   - Internal: Logic bugs, storage failures, unexpected states

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// High-level classification for metrics / structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Network,
    Parse,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Network => "network",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Primary application error type.
#[derive(Error, Debug)]
pub enum TwistwatchError {
    // ------------------------ Input / Validation ----------------------------
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("User '{user_id}' not found")]
    UserNotFound { user_id: String },

    #[error("Domain '{domain}' not found")]
    DomainNotFound { domain: String },

    #[error("Domain '{domain}' is already registered")]
    DomainExists { domain: String },

    #[error("Schedule '{schedule_id}' not found")]
    ScheduleNotFound { schedule_id: String },

    #[error("No permutations stored for domain '{domain}'")]
    NoPermutations { domain: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ---------------------------- Scanner -----------------------------------
    #[error("Scanner '{binary}' exited with {status}: {stderr}")]
    ScannerFailed {
        binary: String,
        status: String,
        stderr: String,
    },

    #[error("Scanner produced unparsable output: {reason}")]
    ScannerOutput { reason: String },

    #[error("Scanner timed out after {seconds}s for '{domain}'")]
    ScannerTimeout { domain: String, seconds: u64 },

    #[error("Failed to launch scanner '{binary}': {source}")]
    ScannerSpawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    // --------------------------- Message queue ------------------------------
    #[error("Queue {operation} failed: {reason}")]
    Queue { operation: String, reason: String },

    #[error("Message queue is not configured")]
    QueueDisabled,

    // ----------------------------- Storage ----------------------------------
    #[error("Database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    // ---------------------------- Internal ----------------------------------
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TwistwatchError {
    /// Categorize the error for structured output / metrics.
    pub fn category(&self) -> ErrorCategory {
        use TwistwatchError::*;
        match self {
            InvalidDomain { .. }
            | MissingField { .. }
            | InvalidRequest { .. }
            | UserNotFound { .. }
            | DomainNotFound { .. }
            | DomainExists { .. }
            | ScheduleNotFound { .. }
            | NoPermutations { .. }
            | Configuration { .. } => ErrorCategory::Input,

            ScannerOutput { .. } => ErrorCategory::Parse,

            ScannerFailed { .. }
            | ScannerTimeout { .. }
            | ScannerSpawn { .. }
            | Queue { .. }
            | QueueDisabled => ErrorCategory::Network,

            Database { .. } | Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// HTTP status the API layer should answer with for this error.
    pub fn http_status(&self) -> StatusCode {
        use TwistwatchError::*;
        match self {
            InvalidDomain { .. } | MissingField { .. } | InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            UserNotFound { .. }
            | DomainNotFound { .. }
            | ScheduleNotFound { .. }
            | NoPermutations { .. } => StatusCode::NOT_FOUND,
            DomainExists { .. } => StatusCode::CONFLICT,
            ScannerFailed { .. } | ScannerOutput { .. } | ScannerSpawn { .. } | Queue { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ScannerTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            QueueDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Configuration { .. } | Database { .. } | Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    // ---------------------------- Constructors -----------------------------

    pub fn invalid_domain(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        Self::UserNotFound {
            user_id: user_id.into(),
        }
    }

    pub fn domain_not_found(domain: impl Into<String>) -> Self {
        Self::DomainNotFound {
            domain: domain.into(),
        }
    }

    pub fn scanner_output(reason: impl Into<String>) -> Self {
        Self::ScannerOutput {
            reason: reason.into(),
        }
    }

    pub fn queue(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Queue {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn db(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Public result alias.
pub type Result<T> = std::result::Result<T, TwistwatchError>;

impl From<serde_json::Error> for TwistwatchError {
    fn from(e: serde_json::Error) -> Self {
        TwistwatchError::ScannerOutput {
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for TwistwatchError {
    fn from(e: reqwest::Error) -> Self {
        TwistwatchError::Queue {
            operation: "transport".into(),
            reason: e.to_string(),
        }
    }
}

impl IntoResponse for TwistwatchError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = Json(json!({
            "error": self.to_string(),
            "category": self.category().to_string(),
        }));
        (status, body).into_response()
    }
}

/// Extension trait for enriching sqlx results with operation context.
pub trait DbResultExt<T> {
    fn with_operation(self, operation: impl Into<String>) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_operation(self, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| TwistwatchError::db(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            TwistwatchError::invalid_domain("x", "empty").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            TwistwatchError::queue("publish", "refused").category(),
            ErrorCategory::Network
        );
        assert_eq!(
            TwistwatchError::scanner_output("bad json").category(),
            ErrorCategory::Parse
        );
        assert_eq!(
            TwistwatchError::internal("boom").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            TwistwatchError::domain_not_found("x.com").http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TwistwatchError::missing_field("domain_name").http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TwistwatchError::ScannerTimeout {
                domain: "x.com".into(),
                seconds: 120
            }
            .http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            TwistwatchError::QueueDisabled.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn display_snippets() {
        let e = TwistwatchError::invalid_domain("ex ample.com", "whitespace in label");
        let s = e.to_string();
        assert!(s.contains("ex ample.com"));
        assert!(s.contains("whitespace"));
        let i = TwistwatchError::internal("boom");
        assert!(i.to_string().contains("Internal error"));
    }

    #[test]
    fn db_context() {
        let res: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        let mapped = res.with_operation("select permutation");
        match mapped.err().unwrap() {
            TwistwatchError::Database { operation, .. } => {
                assert_eq!(operation, "select permutation");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
