//! Error taxonomy shared by every contact-mediation operation.

use thiserror::Error;

use crate::lifecycle::ContactAction;
use crate::types::{ContactStatus, DenialReason, ModerationStatus};

/// Every way a mediation operation can fail.
///
/// All variants are terminal for the operation that raised them. Only
/// [`MediationError::Timeout`] and [`MediationError::Unavailable`] are safe
/// for a caller to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediationError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("caller is not allowed to perform this operation")]
    Forbidden,

    #[error("cannot {action} a request that is {from}")]
    InvalidTransition {
        from: ContactStatus,
        action: ContactAction,
    },

    #[error("cannot move a listing from {from} to {to}")]
    InvalidModeration {
        from: ModerationStatus,
        to: ModerationStatus,
    },

    #[error("an active contact request already exists for this listing")]
    DuplicateActiveRequest,

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("contact details not authorized ({0})")]
    NotAuthorized(DenialReason),

    #[error("request was already reopened {limit} times")]
    RetryLimitExceeded { limit: u32 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl MediationError {
    /// Whether a caller may safely retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }

    /// Stable machine-readable code, used as the `error` field of API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::InvalidTransition { .. } | Self::InvalidModeration { .. } => {
                "invalid_transition"
            }
            Self::DuplicateActiveRequest => "duplicate_active_request",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Conflict(_) => "conflict",
            Self::NotAuthorized(_) => "not_authorized",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::Validation(_) => "validation",
            Self::Timeout => "timeout",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, MediationError>;
