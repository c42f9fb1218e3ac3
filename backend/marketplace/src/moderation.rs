//! Admin moderation of listings and accounts.
//!
//! Independent of the credit flow. Every operation takes the acting account
//! and refuses non-admins with `Forbidden`, except listing visibility which
//! the owning producer may also toggle.

use contact_mediation::{
    Account, AccountId, Listing, ListingId, MediationError, ModerationDecision, ModerationOutcome,
};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{self, AccountRow, ListingRow, ACCOUNT_COLUMNS, LISTING_COLUMNS};
use crate::errors::Result;

pub async fn require_admin(pool: &SqlitePool, actor: AccountId) -> Result<Account> {
    match db::fetch_account(pool, actor).await? {
        Some(account) if account.is_admin() && !account.suspended => Ok(account),
        _ => Err(MediationError::Forbidden.into()),
    }
}

/// Approve or reject a pending listing. Repeating the standing decision
/// returns the listing unchanged.
pub async fn set_listing_moderation(
    pool: &SqlitePool,
    admin: AccountId,
    listing_id: ListingId,
    decision: ModerationDecision,
) -> Result<Listing> {
    require_admin(pool, admin).await?;
    let listing = db::fetch_listing(pool, listing_id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    let ModerationOutcome::Changed(to) = listing.moderation_status.decide(decision)? else {
        return Ok(listing);
    };

    let sql = format!(
        r#"
        UPDATE listings
        SET    moderation_status = ?1, updated_at = ?2
        WHERE  id = ?3 AND moderation_status = 'pending'
        RETURNING {LISTING_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(to.as_str())
        .bind(db::now())
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        // Another admin decided first; judge this decision against theirs.
        let current = db::fetch_listing(pool, listing_id)
            .await?
            .ok_or(MediationError::NotFound("listing"))?;
        current.moderation_status.decide(decision)?;
        return Ok(current);
    };

    let listing = Listing::try_from(row)?;
    info!(listing_id, admin, status = %listing.moderation_status, "Listing moderated");
    Ok(listing)
}

/// Hide or show a listing without touching its moderation decision.
pub async fn set_listing_visibility(
    pool: &SqlitePool,
    actor: AccountId,
    listing_id: ListingId,
    hidden: bool,
) -> Result<Listing> {
    let listing = db::fetch_listing(pool, listing_id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    if listing.producer_id != actor {
        require_admin(pool, actor).await?;
    }

    let sql = format!(
        "UPDATE listings SET hidden = ?1, updated_at = ?2 WHERE id = ?3 RETURNING {LISTING_COLUMNS}"
    );
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(hidden)
        .bind(db::now())
        .bind(listing_id)
        .fetch_optional(pool)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;

    info!(listing_id, actor, hidden, "Listing visibility changed");
    Listing::try_from(row)
}

pub async fn suspend_account(pool: &SqlitePool, admin: AccountId, account: AccountId) -> Result<Account> {
    require_admin(pool, admin).await?;
    if admin == account {
        return Err(MediationError::Validation("admins cannot suspend themselves".into()).into());
    }
    let updated = set_account_flag(pool, account, "suspended", true).await?;
    info!(account_id = account, admin, "Account suspended");
    Ok(updated)
}

pub async fn reinstate_account(
    pool: &SqlitePool,
    admin: AccountId,
    account: AccountId,
) -> Result<Account> {
    require_admin(pool, admin).await?;
    let updated = set_account_flag(pool, account, "suspended", false).await?;
    info!(account_id = account, admin, "Account reinstated");
    Ok(updated)
}

/// Mark a producer as verified by the platform.
pub async fn verify_account(pool: &SqlitePool, admin: AccountId, account: AccountId) -> Result<Account> {
    require_admin(pool, admin).await?;
    let updated = set_account_flag(pool, account, "verified", true).await?;
    info!(account_id = account, admin, "Account verified");
    Ok(updated)
}

async fn set_account_flag(
    pool: &SqlitePool,
    account: AccountId,
    column: &'static str,
    value: bool,
) -> Result<Account> {
    let sql = format!(
        "UPDATE accounts SET {column} = ?1, updated_at = ?2 WHERE id = ?3 RETURNING {ACCOUNT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(value)
        .bind(db::now())
        .bind(account)
        .fetch_optional(pool)
        .await?
        .ok_or(MediationError::NotFound("account"))?;
    Account::try_from(row)
}

/// Remove an account with its listings and unanswered or rejected requests.
///
/// Refused with `Conflict` while the account is a party to an accepted
/// request or has any ledger entry. Ledger rows and subscriptions are
/// append-only and are never deleted.
pub async fn delete_account(pool: &SqlitePool, admin: AccountId, account: AccountId) -> Result<()> {
    require_admin(pool, admin).await?;
    if admin == account {
        return Err(MediationError::Validation("admins cannot delete themselves".into()).into());
    }
    if db::fetch_account(pool, account).await?.is_none() {
        return Err(MediationError::NotFound("account").into());
    }

    let mut tx = pool.begin().await?;
    // Requests made by the account, addressed to it, or on its listings.
    sqlx::query(
        r#"
        DELETE FROM contact_requests
        WHERE  status != 'accepted'
          AND  (buyer_id = ?1 OR producer_id = ?1
                OR listing_id IN (SELECT id FROM listings WHERE producer_id = ?1))
        "#,
    )
    .bind(account)
    .execute(&mut *tx)
    .await?;

    let (accepted,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM contact_requests
        WHERE  buyer_id = ?1 OR producer_id = ?1
           OR  listing_id IN (SELECT id FROM listings WHERE producer_id = ?1)
        "#,
    )
    .bind(account)
    .fetch_one(&mut *tx)
    .await?;
    if accepted > 0 {
        return Err(MediationError::Conflict(format!(
            "account is party to {accepted} accepted contact request(s)"
        ))
        .into());
    }

    // Every subscription has its top-up credit in the ledger.
    let (entries,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM ledger_entries WHERE account_id = ?1")
            .bind(account)
            .fetch_one(&mut *tx)
            .await?;
    if entries > 0 {
        return Err(MediationError::Conflict(format!(
            "account has ledger history ({entries} entries)"
        ))
        .into());
    }

    for sql in [
        "DELETE FROM listings WHERE producer_id = ?1",
        "DELETE FROM accounts WHERE id = ?1",
    ] {
        sqlx::query(sql).bind(account).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(account_id = account, admin, "Account deleted");
    Ok(())
}
