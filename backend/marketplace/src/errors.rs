//! Application-wide error types.
//!
//! Storage failures are classified on the way in: pool exhaustion becomes
//! [`MediationError::Timeout`], lost connections and `SQLITE_BUSY` become
//! [`MediationError::Unavailable`]. Everything else from `sqlx` stays a
//! generic database error and is reported to clients as an internal error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use contact_mediation::types::UnknownVariant;
use contact_mediation::{DenialReason, MediationError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Where a buyer is sent to buy more credits.
pub const TOP_UP_PATH: &str = "/plans";

/// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error(transparent)]
    Domain(#[from] MediationError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("missing or unknown caller identity")]
    Unauthenticated,
}

pub type Result<T> = std::result::Result<T, MarketError>;

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        let transient = match &e {
            sqlx::Error::PoolTimedOut => Some(MediationError::Timeout),
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed | sqlx::Error::Io(_) => {
                Some(MediationError::Unavailable(e.to_string()))
            }
            sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
                Some(MediationError::Unavailable(db.message().to_string()))
            }
            _ => None,
        };
        match transient {
            Some(domain) => MarketError::Domain(domain),
            None => MarketError::Database(e),
        }
    }
}

impl From<UnknownVariant> for MarketError {
    fn from(e: UnknownVariant) -> Self {
        MarketError::Corrupt(e.to_string())
    }
}

fn is_busy_code(code: Option<&str>) -> bool {
    // Extended result codes keep the primary code in the low byte.
    match code.and_then(|c| c.parse::<i32>().ok()) {
        Some(n) => matches!(n & 0xff, SQLITE_BUSY | SQLITE_LOCKED),
        None => false,
    }
}

/// `true` when `e` is a UNIQUE constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `true` when `e` is a FOREIGN KEY constraint violation.
pub fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

impl MarketError {
    pub fn status(&self) -> StatusCode {
        match self {
            MarketError::Domain(e) => match e {
                MediationError::NotFound(_) => StatusCode::NOT_FOUND,
                MediationError::Forbidden | MediationError::NotAuthorized(_) => {
                    StatusCode::FORBIDDEN
                }
                MediationError::InvalidTransition { .. }
                | MediationError::InvalidModeration { .. }
                | MediationError::DuplicateActiveRequest
                | MediationError::Conflict(_) => StatusCode::CONFLICT,
                MediationError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                MediationError::RetryLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                MediationError::Validation(_) => StatusCode::BAD_REQUEST,
                MediationError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                MediationError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            MarketError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MarketError::Database(_)
            | MarketError::Migrate(_)
            | MarketError::Config(_)
            | MarketError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn domain(&self) -> Option<&MediationError> {
        match self {
            MarketError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_up_path: Option<&'static str>,
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            MarketError::Domain(e) => {
                let mut body = ErrorResponse {
                    error: e.code(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                    reason: None,
                    balance: None,
                    top_up_path: None,
                };
                match e {
                    MediationError::NotAuthorized(reason) => body.reason = Some(*reason),
                    MediationError::InsufficientCredits { balance, .. } => {
                        body.message =
                            "Not enough credits to unlock this contact. Buy a plan to top up your balance."
                                .to_string();
                        body.balance = Some(*balance);
                        body.top_up_path = Some(TOP_UP_PATH);
                    }
                    _ => {}
                }
                body
            }
            MarketError::Unauthenticated => ErrorResponse {
                error: "unauthenticated",
                message: self.to_string(),
                retryable: false,
                reason: None,
                balance: None,
                top_up_path: None,
            },
            other => {
                error!(error = %other, "Internal error");
                ErrorResponse {
                    error: "internal",
                    message: "An internal error occurred".to_string(),
                    retryable: false,
                    reason: None,
                    balance: None,
                    top_up_path: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
