//! Account registration and lookups.
//!
//! Registration belongs to the external sign-up flow; [`register_account`]
//! stands in for it so the marketplace can be exercised end to end.

use contact_mediation::channel::normalize_whatsapp;
use contact_mediation::{
    Account, AccountId, ListingId, MediationError, NewAccount, ProducerProfile, ProfileUpdate,
    Role,
};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{self, AccountRow, ACCOUNT_COLUMNS};
use crate::errors::{is_unique_violation, MarketError, Result};
use crate::listings;

const MAX_NAME_LEN: usize = 100;

fn validate_profile(first_name: &str, last_name: &str, whatsapp: &str, country: &str) -> Result<()> {
    for (field, value) in [("first name", first_name), ("last name", last_name)] {
        let value = value.trim();
        if value.is_empty() || value.chars().count() > MAX_NAME_LEN {
            return Err(MediationError::Validation(format!(
                "{field} must be between 1 and {MAX_NAME_LEN} characters"
            ))
            .into());
        }
    }
    if country.trim().is_empty() {
        return Err(MediationError::Validation("country must not be empty".into()).into());
    }
    // Stored as typed; only the digit count is checked here.
    normalize_whatsapp(whatsapp)?;
    Ok(())
}

pub async fn register_account(pool: &SqlitePool, new: NewAccount) -> Result<Account> {
    let identity = new.identity.trim();
    if identity.is_empty() {
        return Err(MediationError::Validation("identity must not be empty".into()).into());
    }
    validate_profile(&new.first_name, &new.last_name, &new.whatsapp, &new.country)?;

    let now = db::now();
    let sql = format!(
        r#"
        INSERT INTO accounts
            (identity, role, first_name, last_name, whatsapp, country, region, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        RETURNING {ACCOUNT_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(identity)
        .bind(new.role.as_str())
        .bind(new.first_name.trim())
        .bind(new.last_name.trim())
        .bind(new.whatsapp.trim())
        .bind(new.country.trim())
        .bind(new.region.as_deref().map(str::trim).filter(|r| !r.is_empty()))
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MediationError::Conflict("identity is already registered".into()).into()
            } else {
                MarketError::from(e)
            }
        })?;

    let account = Account::try_from(row)?;
    info!(account_id = account.id, role = %account.role, "Account registered");
    Ok(account)
}

/// Replace the caller's own profile fields. A new WhatsApp number is what
/// the next disclosure returns.
pub async fn update_profile(
    pool: &SqlitePool,
    id: AccountId,
    update: ProfileUpdate,
) -> Result<Account> {
    validate_profile(
        &update.first_name,
        &update.last_name,
        &update.whatsapp,
        &update.country,
    )?;

    let sql = format!(
        r#"
        UPDATE accounts
        SET    first_name = ?1, last_name = ?2, whatsapp = ?3, country = ?4, region = ?5,
               updated_at = ?6
        WHERE  id = ?7
        RETURNING {ACCOUNT_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(update.first_name.trim())
        .bind(update.last_name.trim())
        .bind(update.whatsapp.trim())
        .bind(update.country.trim())
        .bind(update.region.as_deref().map(str::trim).filter(|r| !r.is_empty()))
        .bind(db::now())
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(MediationError::NotFound("account"))?;

    info!(account_id = id, "Profile updated");
    Account::try_from(row)
}

/// Public card of a producer. Suspended producers and other roles are not found.
pub async fn public_producer(pool: &SqlitePool, id: AccountId) -> Result<ProducerProfile> {
    match db::fetch_account(pool, id).await? {
        Some(account) if account.role == Role::Producer && !account.suspended => {
            Ok(ProducerProfile::from(&account))
        }
        _ => Err(MediationError::NotFound("producer").into()),
    }
}

/// Public card of the producer behind a publicly visible listing.
pub async fn public_producer_for_listing(
    pool: &SqlitePool,
    listing_id: ListingId,
) -> Result<ProducerProfile> {
    let listing = listings::fetch_public(pool, listing_id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    public_producer(pool, listing.producer_id).await
}

pub async fn get_account(pool: &SqlitePool, id: AccountId) -> Result<Account> {
    db::fetch_account(pool, id)
        .await?
        .ok_or_else(|| MediationError::NotFound("account").into())
}

/// Map an identity-provider subject to the account it belongs to.
pub async fn resolve_identity(pool: &SqlitePool, identity: &str) -> Result<Option<AccountId>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM accounts WHERE identity = ?1")
        .bind(identity)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id,)| id))
}
