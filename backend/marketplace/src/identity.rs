//! Acting-account extraction.
//!
//! The identity provider in front of the API has already authenticated the
//! caller. It forwards either the account id (`x-account-id`) or its own
//! subject (`x-identity`), which is resolved to an account here.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use contact_mediation::{AccountId, MediationError};

use crate::api::AppState;
use crate::errors::MarketError;

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const IDENTITY_HEADER: &str = "x-identity";
pub const PAYMENT_TOKEN_HEADER: &str = "x-payment-token";

/// The authenticated account making the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub AccountId);

/// Like [`Actor`] but for routes that also serve anonymous callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeActor(pub Option<AccountId>);

/// Marker for calls made by the payment collaborator.
#[derive(Debug, Clone, Copy)]
pub struct PaymentCollaborator;

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<AccountId>, MarketError> {
    if let Some(raw) = header(parts, ACCOUNT_ID_HEADER) {
        return raw
            .parse::<AccountId>()
            .map(Some)
            .map_err(|_| MarketError::Unauthenticated);
    }
    if let Some(identity) = header(parts, IDENTITY_HEADER) {
        return match state.market.resolve_identity(identity).await? {
            Some(id) => Ok(Some(id)),
            None => Err(MarketError::Unauthenticated),
        };
    }
    Ok(None)
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = MarketError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state)
            .await?
            .map(Actor)
            .ok_or(MarketError::Unauthenticated)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeActor {
    type Rejection = MarketError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(MaybeActor)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for PaymentCollaborator {
    type Rejection = MarketError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Without a configured token the credit endpoints are closed.
        let Some(expected) = state.payment_token.as_deref() else {
            return Err(MediationError::Forbidden.into());
        };
        match header(parts, PAYMENT_TOKEN_HEADER) {
            Some(presented) if presented == expected => Ok(PaymentCollaborator),
            _ => Err(MarketError::Unauthenticated),
        }
    }
}
