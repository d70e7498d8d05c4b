//! Error handling for Appguard Core.
//!
//! - One crate error type carrying an [`ErrorCode`], a client-safe message and
//!   an optional internal message and source
//! - HTTP status mapping for the boundary layer
//! - Severity-driven logging and an `appguard_errors_total` counter
//!
//! Authorization outcomes are errors too: a [`Denial`](crate::rbac::Denial)
//! becomes an `AppguardError` whose response body is
//! `{"error": <reason phrase>, "message": <message>}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

pub type Result<T> = std::result::Result<T, AppguardError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Storage
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    ResourceNotFound,
    DeserializationError,

    // Authorization
    Unauthorized,
    Forbidden,
    MembershipLookupFailed,
    ConfigurationInconsistency,

    // Definitions and input
    InvalidDefinition,
    InvalidInput,

    // Startup
    ConfigurationError,
    InvalidConfiguration,

    InternalError,
}

impl ErrorCode {
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::ResourceNotFound => StatusCode::NOT_FOUND,
            Self::InvalidDefinition | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            // A failed lookup never reveals more than a plain refusal.
            Self::Forbidden | Self::MembershipLookupFailed | Self::ConfigurationInconsistency => {
                StatusCode::FORBIDDEN
            }
            Self::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Only storage failures are worth retrying. Authorization never is.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseConnectionFailed | Self::DatabaseQueryFailed)
    }

    pub const fn category(&self) -> &'static str {
        match self {
            Self::DatabaseError
            | Self::DatabaseConnectionFailed
            | Self::DatabaseQueryFailed
            | Self::ResourceNotFound
            | Self::DeserializationError => "storage",
            Self::Unauthorized
            | Self::Forbidden
            | Self::MembershipLookupFailed
            | Self::ConfigurationInconsistency => "authorization",
            Self::InvalidDefinition | Self::InvalidInput => "definition",
            Self::ConfigurationError | Self::InvalidConfiguration => "configuration",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How loudly an error is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected refusals and bad input.
    Low,
    /// Inconsistent definitions.
    Medium,
    /// Failed dependencies and storage.
    High,
}

impl ErrorSeverity {
    pub const fn from_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthorized
            | ErrorCode::Forbidden
            | ErrorCode::ResourceNotFound
            | ErrorCode::InvalidInput => Self::Low,
            ErrorCode::ConfigurationInconsistency | ErrorCode::InvalidDefinition => Self::Medium,
            ErrorCode::MembershipLookupFailed
            | ErrorCode::DatabaseError
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub struct AppguardError {
    code: ErrorCode,
    /// Safe to show to clients.
    user_message: Cow<'static, str>,
    /// Logged only.
    internal_message: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for AppguardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl AppguardError {
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        counter!(
            "appguard_errors_total",
            "code" => code.to_string(),
            "category" => code.category(),
        )
        .increment(1);

        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        }
    }

    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    pub fn not_found(entity_type: &str, entity_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
    }

    pub fn invalid_definition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidDefinition, message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(self.code)
    }

    /// Log at the level matching [`severity`](Self::severity).
    pub fn log(&self) {
        let code = self.code.to_string();
        let status = self.http_status().as_u16();
        match self.severity() {
            ErrorSeverity::High => error!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                source = ?self.source,
                "Request failed"
            ),
            ErrorSeverity::Medium => warn!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                "Request refused"
            ),
            ErrorSeverity::Low => debug!(
                error_code = %code,
                http_status = status,
                user_message = %self.user_message,
                "Request refused"
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body returned to clients.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Canonical reason phrase of the status, e.g. `"Forbidden"`.
    pub error: String,
    pub message: String,
}

impl From<&AppguardError> for ErrorResponse {
    fn from(error: &AppguardError) -> Self {
        Self {
            error: error
                .http_status()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
            message: error.user_message.to_string(),
        }
    }
}

impl IntoResponse for AppguardError {
    fn into_response(self) -> Response {
        self.log();
        (self.http_status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AppguardError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_message) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::ResourceNotFound, "The requested record was not found"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            sqlx::Error::Database(_) => (ErrorCode::DatabaseQueryFailed, "A database error occurred"),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorCode::DeserializationError, "Stored data is invalid")
            }
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };
        Self::with_internal(code, user_message, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for AppguardError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::DeserializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for AppguardError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_message) = match &error {
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };
        Self::with_internal(code, user_message, error.to_string())
    }
}
