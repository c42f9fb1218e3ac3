//! Contact disclosure gateway.
//!
//! The only read path that returns a stored WhatsApp number. Authorisation
//! is recomputed from the request table on every call.

use contact_mediation::channel::{buyer_greeting, normalize_whatsapp};
use contact_mediation::{
    Account, AccountId, ChannelHandle, ContactStatus, DenialReason, ListingId, MediationError,
};
use reqwest::Url;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db;
use crate::errors::{MarketError, Result};
use crate::listings;

const WHATSAPP_BASE: &str = "https://wa.me";

/// Reveal the producer's channel to `requester` if an accepted request exists
/// for exactly `(requester, producer_id, listing_id)`.
///
/// With `revoke_on_suspension`, a suspended producer or requester loses
/// access that was previously granted.
pub async fn get_contact_channel(
    pool: &SqlitePool,
    requester: AccountId,
    producer_id: AccountId,
    listing_id: ListingId,
    revoke_on_suspension: bool,
) -> Result<ChannelHandle> {
    let statuses: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT status FROM contact_requests
        WHERE  buyer_id = ?1 AND producer_id = ?2 AND listing_id = ?3
        ORDER  BY id DESC
        "#,
    )
    .bind(requester)
    .bind(producer_id)
    .bind(listing_id)
    .fetch_all(pool)
    .await?;
    let statuses = statuses
        .into_iter()
        .map(|(status,)| status.parse::<ContactStatus>())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !statuses.contains(&ContactStatus::Accepted) {
        let reason = match statuses.first() {
            None => DenialReason::NoRequest,
            Some(ContactStatus::Rejected) => DenialReason::Rejected,
            Some(_) => DenialReason::Pending,
        };
        debug!(requester, producer_id, listing_id, reason = %reason, "Disclosure refused");
        return Err(MediationError::NotAuthorized(reason).into());
    }

    let (Some(producer), Some(buyer), Some(listing)) = (
        db::fetch_account(pool, producer_id).await?,
        db::fetch_account(pool, requester).await?,
        db::fetch_listing(pool, listing_id).await?,
    ) else {
        return Err(MediationError::NotAuthorized(DenialReason::NoRequest).into());
    };
    if revoke_on_suspension && (producer.suspended || buyer.suspended) {
        debug!(requester, producer_id, listing_id, "Disclosure revoked by suspension");
        return Err(MediationError::NotAuthorized(DenialReason::Suspended).into());
    }

    let handle = handle_for(&producer, buyer_greeting(&producer.first_name, &listing.name))?;
    // Advisory counter; it never decides a disclosure.
    if let Err(e) = listings::record_contact_click(pool, listing_id).await {
        warn!(listing_id, error = %e, "Could not count contact click");
    }

    info!(requester, producer_id, listing_id, "Producer contact disclosed");
    Ok(handle)
}

/// Build the outward-facing handle for `account` with a prefilled message.
pub fn handle_for(account: &Account, message_template: String) -> Result<ChannelHandle> {
    let whatsapp = normalize_whatsapp(&account.whatsapp)?;
    let base = format!("{WHATSAPP_BASE}/{}", whatsapp.trim_start_matches('+'));
    let deep_link = Url::parse_with_params(&base, &[("text", message_template.as_str())])
        .map_err(|e| MarketError::Corrupt(format!("whatsapp link for account {}: {e}", account.id)))?;

    Ok(ChannelHandle {
        account_id: account.id,
        display_name: account.display_name(),
        whatsapp,
        deep_link: deep_link.into(),
        message_template,
    })
}
