//! Listing store: products, their public visibility, and advisory counters.
//!
//! A listing is publicly visible when it is approved, not hidden, and its
//! producer is not suspended. Browse never reads balances or requests and
//! never returns contact values.

use contact_mediation::{
    AccountId, Listing, ListingDraft, ListingId, MediationError, Role,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::info;

use crate::db::{self, ListingRow, LISTING_COLUMNS};
use crate::errors::Result;

pub const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 20;

/// SQL predicate (over `listings`) selecting publicly visible rows.
const PUBLIC_PREDICATE: &str = "moderation_status = 'approved' AND hidden = 0 \
     AND producer_id NOT IN (SELECT id FROM accounts WHERE suspended = 1)";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseFilter {
    /// Case-insensitive substring of the product name.
    pub q: Option<String>,
    pub location: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_listing(
    pool: &SqlitePool,
    producer_id: AccountId,
    draft: ListingDraft,
) -> Result<Listing> {
    let producer = db::fetch_account(pool, producer_id)
        .await?
        .ok_or(MediationError::NotFound("account"))?;
    if producer.role != Role::Producer || producer.suspended {
        return Err(MediationError::Forbidden.into());
    }

    validate_draft(&draft)?;

    let now = db::now();
    let sql = format!(
        r#"
        INSERT INTO listings
            (producer_id, name, price, quantity, location, description, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        RETURNING {LISTING_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(producer_id)
        .bind(draft.name.trim())
        .bind(draft.price.normalize().to_string())
        .bind(draft.quantity.trim())
        .bind(non_empty(draft.location.as_deref()))
        .bind(non_empty(draft.description.as_deref()))
        .bind(now)
        .fetch_one(pool)
        .await?;

    let listing = Listing::try_from(row)?;
    info!(listing_id = listing.id, producer_id, "Listing submitted for moderation");
    Ok(listing)
}

/// Replace the editable fields of a listing owned by `producer_id`. The
/// moderation decision and counters are kept.
pub async fn update_listing(
    pool: &SqlitePool,
    producer_id: AccountId,
    id: ListingId,
    draft: ListingDraft,
) -> Result<Listing> {
    let listing = db::fetch_listing(pool, id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    if listing.producer_id != producer_id {
        return Err(MediationError::Forbidden.into());
    }
    validate_draft(&draft)?;

    let sql = format!(
        r#"
        UPDATE listings
        SET    name = ?1, price = ?2, quantity = ?3, location = ?4, description = ?5,
               updated_at = ?6
        WHERE  id = ?7 AND producer_id = ?8
        RETURNING {LISTING_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(draft.name.trim())
        .bind(draft.price.normalize().to_string())
        .bind(draft.quantity.trim())
        .bind(non_empty(draft.location.as_deref()))
        .bind(non_empty(draft.description.as_deref()))
        .bind(db::now())
        .bind(id)
        .bind(producer_id)
        .fetch_optional(pool)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;

    info!(listing_id = id, producer_id, "Listing updated");
    Listing::try_from(row)
}

fn validate_draft(draft: &ListingDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(MediationError::Validation("name must not be empty".into()).into());
    }
    if draft.price <= Decimal::ZERO {
        return Err(MediationError::Validation("price must be positive".into()).into());
    }
    if draft.quantity.trim().is_empty() {
        return Err(MediationError::Validation("quantity must not be empty".into()).into());
    }
    Ok(())
}

/// Fetch a listing if it is publicly visible.
pub async fn fetch_public<'e, E>(exec: E, id: ListingId) -> Result<Option<Listing>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1 AND {PUBLIC_PREDICATE}");
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(Listing::try_from).transpose()
}

/// Public listings are visible to everyone; others only to their producer
/// and to admins.
pub async fn get_listing(
    pool: &SqlitePool,
    id: ListingId,
    viewer: Option<AccountId>,
) -> Result<Listing> {
    if let Some(listing) = fetch_public(pool, id).await? {
        return Ok(listing);
    }
    let listing = db::fetch_listing(pool, id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    let privileged = match viewer {
        Some(viewer) if viewer == listing.producer_id => true,
        Some(viewer) => db::fetch_account(pool, viewer)
            .await?
            .is_some_and(|account| account.is_admin()),
        None => false,
    };
    if privileged {
        Ok(listing)
    } else {
        Err(MediationError::NotFound("listing").into())
    }
}

pub async fn list_by_producer(pool: &SqlitePool, producer_id: AccountId) -> Result<Vec<Listing>> {
    let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE producer_id = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(producer_id)
        .fetch_all(pool)
        .await?;
    db::convert_all(rows)
}

pub async fn browse(pool: &SqlitePool, filter: &BrowseFilter) -> Result<Vec<Listing>> {
    let limit = filter
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = filter.offset.unwrap_or(0).max(0);
    let sql = format!(
        r#"
        SELECT {LISTING_COLUMNS}
        FROM   listings
        WHERE  {PUBLIC_PREDICATE}
          AND  (?1 IS NULL OR name LIKE '%' || ?1 || '%' ESCAPE '\')
          AND  (?2 IS NULL OR location LIKE '%' || ?2 || '%' ESCAPE '\')
        ORDER  BY id DESC
        LIMIT  ?3 OFFSET ?4
        "#
    );
    let rows = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(non_empty(filter.q.as_deref()).map(escape_like))
        .bind(non_empty(filter.location.as_deref()).map(escape_like))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    db::convert_all(rows)
}

/// Count one view of a public listing and return the new total.
pub async fn record_view(pool: &SqlitePool, id: ListingId) -> Result<i64> {
    let sql = format!(
        "UPDATE listings SET view_count = view_count + 1 WHERE id = ?1 AND {PUBLIC_PREDICATE} \
         RETURNING view_count"
    );
    let row: Option<(i64,)> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;
    row.map(|(count,)| count)
        .ok_or_else(|| MediationError::NotFound("listing").into())
}

/// Count one disclosed contact for a listing. Advisory only.
pub async fn record_contact_click<'e, E>(exec: E, id: ListingId) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE listings SET contact_click_count = contact_click_count + 1 WHERE id = ?1")
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Remove a listing owned by `producer_id` together with its unanswered or
/// rejected requests. Listings with an accepted introduction are kept for audit.
pub async fn delete_listing(pool: &SqlitePool, producer_id: AccountId, id: ListingId) -> Result<()> {
    let listing = db::fetch_listing(pool, id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    if listing.producer_id != producer_id {
        return Err(MediationError::Forbidden.into());
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM contact_requests WHERE listing_id = ?1 AND status != 'accepted'")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let (accepted,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM contact_requests WHERE listing_id = ?1 AND status = 'accepted'",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if accepted > 0 {
        return Err(MediationError::Conflict(format!(
            "listing has {accepted} accepted contact request(s)"
        ))
        .into());
    }
    sqlx::query("DELETE FROM listings WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(listing_id = id, producer_id, "Listing deleted");
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Make `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
