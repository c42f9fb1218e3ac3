//! Contact request store.
//!
//! Transitions are checked twice: once against the pure rules in
//! `contact_mediation::lifecycle` for a precise error, then again by a
//! conditional `UPDATE ... WHERE status = ?` that decides concurrent races.
//! A caller that loses the race re-reads the row and gets the error the
//! rules give for the status it now has.

use chrono::{DateTime, Utc};
use contact_mediation::channel::producer_greeting;
use contact_mediation::{
    Acceptance, AccountId, ContactAction, ContactRequest, InterestedBuyer, ListingId,
    MediationError, ReopenPolicy, RequestId, Role,
};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{info, warn};

use crate::credits;
use crate::db::{self, RequestRow, REQUEST_COLUMNS};
use crate::disclosure;
use crate::errors::{is_unique_violation, MarketError, Result};
use crate::listings;

pub const MAX_MESSAGE_LEN: usize = 1000;

pub async fn create_request(
    pool: &SqlitePool,
    buyer_id: AccountId,
    producer_id: AccountId,
    listing_id: ListingId,
    message: Option<String>,
) -> Result<ContactRequest> {
    let message = message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    if let Some(message) = &message {
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(MediationError::Validation(format!(
                "message must be at most {MAX_MESSAGE_LEN} characters"
            ))
            .into());
        }
    }
    if buyer_id == producer_id {
        return Err(
            MediationError::Validation("cannot request contact with yourself".into()).into(),
        );
    }

    let buyer = db::fetch_account(pool, buyer_id)
        .await?
        .ok_or(MediationError::NotFound("account"))?;
    if buyer.role != Role::Buyer || buyer.suspended {
        return Err(MediationError::Forbidden.into());
    }
    let listing = listings::fetch_public(pool, listing_id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    if listing.producer_id != producer_id {
        return Err(MediationError::Validation(
            "listing does not belong to this producer".into(),
        )
        .into());
    }

    let now = db::now();
    let sql = format!(
        r#"
        INSERT INTO contact_requests
            (buyer_id, producer_id, listing_id, message, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
        RETURNING {REQUEST_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(buyer_id)
        .bind(producer_id)
        .bind(listing_id)
        .bind(message)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(duplicate_as_active)?;

    let request = ContactRequest::try_from(row)?;
    info!(
        request_id = request.id,
        buyer_id, producer_id, listing_id, "Contact request created"
    );
    Ok(request)
}

/// Producer consents: the request becomes `accepted` and the buyer pays the
/// contact fee, both or neither.
pub async fn accept(
    pool: &SqlitePool,
    request_id: RequestId,
    producer_id: AccountId,
) -> Result<Acceptance> {
    let request = fetch_owned_by_producer(pool, request_id, producer_id).await?;
    request.status.apply(ContactAction::Accept)?;

    let buyer = db::fetch_account(pool, request.buyer_id)
        .await?
        .ok_or(MediationError::NotFound("account"))?;
    if buyer.suspended {
        return Err(MediationError::Conflict("buyer account is suspended".into()).into());
    }
    let buyer_channel =
        disclosure::handle_for(&buyer, producer_greeting(&buyer.display_name()))?;

    let mut tx = pool.begin().await?;
    let now = db::now();
    let moved = sqlx::query(
        r#"
        UPDATE contact_requests
        SET    status = 'accepted', updated_at = ?1, accepted_at = ?1
        WHERE  id = ?2 AND status = 'pending'
        "#,
    )
    .bind(now)
    .bind(request_id)
    .execute(&mut *tx)
    .await?;
    if moved.rows_affected() == 0 {
        return Err(lost_race(&mut *tx, request_id, ContactAction::Accept).await);
    }

    // Dropping `tx` on any error below rolls back the status change.
    let charge = credits::charge_for_contact(&mut tx, request.buyer_id, request_id).await?;
    if charge.already_charged {
        warn!(request_id, "Request was already charged before acceptance");
    }
    let accepted = db::fetch_request(&mut *tx, request_id)
        .await?
        .ok_or(MediationError::NotFound("contact request"))?;
    tx.commit().await?;

    info!(
        request_id,
        buyer_id = accepted.buyer_id,
        producer_id,
        buyer_balance = charge.new_balance,
        "Contact request accepted"
    );
    Ok(Acceptance {
        request: accepted,
        buyer_balance: charge.new_balance,
        buyer_channel,
    })
}

pub async fn reject(
    pool: &SqlitePool,
    request_id: RequestId,
    producer_id: AccountId,
) -> Result<ContactRequest> {
    let request = fetch_owned_by_producer(pool, request_id, producer_id).await?;
    request.status.apply(ContactAction::Reject)?;

    let sql = format!(
        r#"
        UPDATE contact_requests
        SET    status = 'rejected', updated_at = ?1
        WHERE  id = ?2 AND status = 'pending'
        RETURNING {REQUEST_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(db::now())
        .bind(request_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(lost_race(pool, request_id, ContactAction::Reject).await);
    };

    info!(request_id, producer_id, "Contact request rejected");
    ContactRequest::try_from(row)
}

/// Buyer retries a rejected request, subject to `policy`.
pub async fn reopen(
    pool: &SqlitePool,
    request_id: RequestId,
    buyer_id: AccountId,
    policy: ReopenPolicy,
) -> Result<ContactRequest> {
    let request = fetch_owned_by_buyer(pool, request_id, buyer_id).await?;
    request.status.apply(ContactAction::Reopen)?;
    policy.check(request.reopen_count)?;

    let sql = format!(
        r#"
        UPDATE contact_requests
        SET    status = 'pending', reopen_count = reopen_count + 1, updated_at = ?1
        WHERE  id = ?2 AND status = 'rejected' AND reopen_count = ?3
        RETURNING {REQUEST_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(db::now())
        .bind(request_id)
        .bind(request.reopen_count)
        .fetch_optional(pool)
        .await
        .map_err(duplicate_as_active)?;
    let Some(row) = row else {
        return Err(lost_race(pool, request_id, ContactAction::Reopen).await);
    };

    let reopened = ContactRequest::try_from(row)?;
    info!(
        request_id,
        buyer_id,
        reopen_count = reopened.reopen_count,
        "Contact request reopened"
    );
    Ok(reopened)
}

/// Buyer withdraws a request that was never accepted.
pub async fn delete(pool: &SqlitePool, request_id: RequestId, buyer_id: AccountId) -> Result<()> {
    let request = fetch_owned_by_buyer(pool, request_id, buyer_id).await?;
    request.status.apply(ContactAction::Delete)?;

    let removed = sqlx::query(
        "DELETE FROM contact_requests WHERE id = ?1 AND status IN ('pending', 'rejected')",
    )
    .bind(request_id)
    .execute(pool)
    .await?;
    if removed.rows_affected() == 0 {
        return Err(lost_race(pool, request_id, ContactAction::Delete).await);
    }

    info!(request_id, buyer_id, "Contact request deleted");
    Ok(())
}

/// Requests addressed to a producer, newest first.
pub async fn list_incoming(pool: &SqlitePool, producer_id: AccountId) -> Result<Vec<ContactRequest>> {
    list_where(pool, "producer_id", producer_id).await
}

/// Requests sent by a buyer, newest first.
pub async fn list_outgoing(pool: &SqlitePool, buyer_id: AccountId) -> Result<Vec<ContactRequest>> {
    list_where(pool, "buyer_id", buyer_id).await
}

/// Buyers who asked `producer_id` for contact, most recent interaction first.
/// Names only; contact values stay behind the disclosure gateway.
pub async fn interested_buyers(
    pool: &SqlitePool,
    producer_id: AccountId,
) -> Result<Vec<InterestedBuyer>> {
    let rows = sqlx::query_as::<_, InterestedRow>(
        r#"
        SELECT r.id AS request_id, r.buyer_id, a.first_name, a.last_name,
               r.listing_id, l.name AS listing_name, r.status, r.updated_at
        FROM   contact_requests r
        JOIN   accounts a ON a.id = r.buyer_id
        JOIN   listings l ON l.id = r.listing_id
        WHERE  r.producer_id = ?1
        ORDER  BY r.updated_at DESC, r.id DESC
        "#,
    )
    .bind(producer_id)
    .fetch_all(pool)
    .await?;
    db::convert_all(rows)
}

#[derive(Debug, sqlx::FromRow)]
struct InterestedRow {
    request_id: i64,
    buyer_id: i64,
    first_name: String,
    last_name: String,
    listing_id: i64,
    listing_name: String,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InterestedRow> for InterestedBuyer {
    type Error = MarketError;

    fn try_from(row: InterestedRow) -> Result<Self> {
        Ok(InterestedBuyer {
            request_id: row.request_id,
            buyer_id: row.buyer_id,
            first_name: row.first_name,
            last_name: row.last_name,
            listing_id: row.listing_id,
            listing_name: row.listing_name,
            status: row.status.parse()?,
            interaction_at: row.updated_at,
        })
    }
}

/// One request, visible to its buyer and producer only.
pub async fn get_request(
    pool: &SqlitePool,
    request_id: RequestId,
    actor: AccountId,
) -> Result<ContactRequest> {
    let request = db::fetch_request(pool, request_id)
        .await?
        .ok_or(MediationError::NotFound("contact request"))?;
    if actor != request.buyer_id && actor != request.producer_id {
        return Err(MediationError::Forbidden.into());
    }
    Ok(request)
}

async fn list_where(
    pool: &SqlitePool,
    column: &'static str,
    account_id: AccountId,
) -> Result<Vec<ContactRequest>> {
    let sql =
        format!("SELECT {REQUEST_COLUMNS} FROM contact_requests WHERE {column} = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(account_id)
        .fetch_all(pool)
        .await?;
    db::convert_all(rows)
}

/// The actor must be the producer named on the request and own its listing.
async fn fetch_owned_by_producer(
    pool: &SqlitePool,
    request_id: RequestId,
    producer_id: AccountId,
) -> Result<ContactRequest> {
    let request = db::fetch_request(pool, request_id)
        .await?
        .ok_or(MediationError::NotFound("contact request"))?;
    let listing = db::fetch_listing(pool, request.listing_id)
        .await?
        .ok_or(MediationError::NotFound("listing"))?;
    if request.producer_id != producer_id || listing.producer_id != producer_id {
        return Err(MediationError::Forbidden.into());
    }
    Ok(request)
}

async fn fetch_owned_by_buyer(
    pool: &SqlitePool,
    request_id: RequestId,
    buyer_id: AccountId,
) -> Result<ContactRequest> {
    let request = db::fetch_request(pool, request_id)
        .await?
        .ok_or(MediationError::NotFound("contact request"))?;
    if request.buyer_id != buyer_id {
        return Err(MediationError::Forbidden.into());
    }
    Ok(request)
}

/// Explain why a conditional update touched no row.
async fn lost_race<'e, E>(exec: E, request_id: RequestId, action: ContactAction) -> MarketError
where
    E: Executor<'e, Database = Sqlite>,
{
    match db::fetch_request(exec, request_id).await {
        Ok(Some(current)) => match current.status.apply(action) {
            Err(e) => e.into(),
            // Status still allows the action, so another guard (the reopen
            // counter) moved underneath us.
            Ok(_) => MediationError::Conflict("contact request changed concurrently".into()).into(),
        },
        Ok(None) => MediationError::NotFound("contact request").into(),
        Err(e) => e,
    }
}

fn duplicate_as_active(e: sqlx::Error) -> MarketError {
    if is_unique_violation(&e) {
        MediationError::DuplicateActiveRequest.into()
    } else {
        MarketError::from(e)
    }
}
