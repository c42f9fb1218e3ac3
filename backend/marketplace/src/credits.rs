//! Credit authorization: the only code that moves account balances.
//!
//! Every balance change is paired with a ledger entry in the same
//! transaction. The partial unique indexes on `ledger_entries` turn a
//! duplicate charge or a replayed payment reference into a constraint
//! violation instead of a second balance change.

use chrono::Duration;
use contact_mediation::ledger::{self, Reconciliation, CONTACT_FEE};
use contact_mediation::{
    AccountId, Charge, ContactAction, ContactStatus, CreditReceipt, LedgerEntry, LedgerReason,
    MediationError, PlanId, RequestId, Subscription,
};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::db::{self, SubscriptionRow, SUBSCRIPTION_COLUMNS};
use crate::errors::{is_foreign_key_violation, is_unique_violation, MarketError, Result};

/// Result of a plan purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUp {
    pub receipt: CreditReceipt,
    pub subscription: Subscription,
}

/// Debit the contact fee for an accepted request.
///
/// Runs on the caller's connection so it commits or rolls back together with
/// the status transition. Charging a request twice returns the current
/// balance with `already_charged` set.
pub async fn charge_for_contact(
    conn: &mut SqliteConnection,
    buyer_id: AccountId,
    request_id: RequestId,
) -> Result<Charge> {
    let request = db::fetch_request(&mut *conn, request_id)
        .await?
        .ok_or(MediationError::NotFound("contact request"))?;
    if request.buyer_id != buyer_id {
        return Err(MediationError::Forbidden.into());
    }
    if request.status != ContactStatus::Accepted {
        return Err(MediationError::InvalidTransition {
            from: request.status,
            action: ContactAction::Accept,
        }
        .into());
    }

    let charged: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM ledger_entries WHERE contact_request_id = ?1 AND reason = 'contact_fee'",
    )
    .bind(request_id)
    .fetch_optional(&mut *conn)
    .await?;
    if charged.is_some() {
        let balance = db::fetch_balance(&mut *conn, buyer_id)
            .await?
            .ok_or(MediationError::NotFound("account"))?;
        return Ok(Charge {
            new_balance: balance,
            already_charged: true,
        });
    }

    let now = db::now();
    let debited: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET    credits = credits - ?1, updated_at = ?2
        WHERE  id = ?3 AND credits >= ?1
        RETURNING credits
        "#,
    )
    .bind(CONTACT_FEE)
    .bind(now)
    .bind(buyer_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((new_balance,)) = debited else {
        let balance = db::fetch_balance(&mut *conn, buyer_id)
            .await?
            .ok_or(MediationError::NotFound("account"))?;
        return Err(MediationError::InsufficientCredits {
            balance,
            required: CONTACT_FEE,
        }
        .into());
    };

    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (account_id, direction, amount, reason, contact_request_id, created_at)
        VALUES (?1, 'debit', ?2, 'contact_fee', ?3, ?4)
        "#,
    )
    .bind(buyer_id)
    .bind(CONTACT_FEE)
    .bind(request_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            MediationError::Conflict("contact request was charged concurrently".into()).into()
        } else {
            MarketError::from(e)
        }
    })?;

    info!(buyer_id, request_id, new_balance, "Contact fee charged");
    Ok(Charge {
        new_balance,
        already_charged: false,
    })
}

/// Grant credits after an out-of-band payment. Replaying the same
/// `(reason, reference)` is a no-op that reports `already_applied`.
pub async fn credit_account(
    pool: &SqlitePool,
    account_id: AccountId,
    amount: i64,
    reason: LedgerReason,
    reference: Option<&str>,
) -> Result<CreditReceipt> {
    if amount <= 0 {
        return Err(MediationError::Validation("amount must be positive".into()).into());
    }
    if reason == LedgerReason::ContactFee {
        return Err(MediationError::Validation("contact fees cannot be credited".into()).into());
    }
    let reference = reference.map(str::trim).filter(|r| !r.is_empty());
    if reason == LedgerReason::SubscriptionTopup && reference.is_none() {
        return Err(
            MediationError::Validation("top-ups require a payment reference".into()).into(),
        );
    }

    let mut tx = pool.begin().await?;
    let receipt = apply_credit(&mut tx, account_id, amount, reason, reference).await?;
    tx.commit().await?;
    Ok(receipt)
}

/// Ledger insert first, balance second. The insert is the idempotency gate
/// and also takes the write lock before anything is read.
async fn apply_credit(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    amount: i64,
    reason: LedgerReason,
    reference: Option<&str>,
) -> Result<CreditReceipt> {
    let now = db::now();
    let inserted = sqlx::query(
        r#"
        INSERT INTO ledger_entries (account_id, direction, amount, reason, reference, created_at)
        VALUES (?1, 'credit', ?2, ?3, ?4, ?5)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .bind(reason.as_str())
    .bind(reference)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            MediationError::NotFound("account").into()
        } else {
            MarketError::from(e)
        }
    })?;

    if inserted.rows_affected() == 0 {
        let balance = db::fetch_balance(&mut *conn, account_id)
            .await?
            .ok_or(MediationError::NotFound("account"))?;
        warn!(account_id, reference, "Duplicate credit ignored");
        return Ok(CreditReceipt {
            new_balance: balance,
            already_applied: true,
        });
    }

    let (new_balance,): (i64,) = sqlx::query_as(
        "UPDATE accounts SET credits = credits + ?1, updated_at = ?2 WHERE id = ?3 RETURNING credits",
    )
    .bind(amount)
    .bind(now)
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(MediationError::NotFound("account"))?;

    info!(account_id, amount, reason = %reason, new_balance, "Account credited");
    Ok(CreditReceipt {
        new_balance,
        already_applied: false,
    })
}

/// Buy a subscription plan: grant its credits and record the subscription.
pub async fn top_up_with_plan(
    pool: &SqlitePool,
    account_id: AccountId,
    plan_id: PlanId,
    payment_reference: &str,
) -> Result<TopUp> {
    let payment_reference = payment_reference.trim();
    if payment_reference.is_empty() {
        return Err(
            MediationError::Validation("payment reference must not be empty".into()).into(),
        );
    }
    let plan = db::fetch_plan(pool, plan_id)
        .await?
        .filter(|plan| plan.active)
        .ok_or(MediationError::NotFound("subscription plan"))?;

    let start_at = db::now();
    let end_at = start_at + Duration::days(plan.validity_days);

    let mut tx = pool.begin().await?;
    let sql = format!(
        r#"
        INSERT INTO subscriptions (account_id, plan_id, payment_reference, status, start_at, end_at)
        VALUES (?1, ?2, ?3, 'active', ?4, ?5)
        ON CONFLICT (payment_reference) DO NOTHING
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    );
    let created = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(account_id)
        .bind(plan.id)
        .bind(payment_reference)
        .bind(start_at)
        .bind(end_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                MediationError::NotFound("account").into()
            } else {
                MarketError::from(e)
            }
        })?;

    let Some(row) = created else {
        let existing = fetch_subscription(&mut *tx, payment_reference)
            .await?
            .ok_or(MediationError::NotFound("subscription"))?;
        if existing.account_id != account_id || existing.plan_id != plan.id {
            return Err(MediationError::Conflict(
                "payment reference was already used for another purchase".into(),
            )
            .into());
        }
        let balance = db::fetch_balance(&mut *tx, account_id)
            .await?
            .ok_or(MediationError::NotFound("account"))?;
        tx.commit().await?;
        return Ok(TopUp {
            receipt: CreditReceipt {
                new_balance: balance,
                already_applied: true,
            },
            subscription: existing,
        });
    };

    let subscription = Subscription::try_from(row)?;
    let receipt = apply_credit(
        &mut tx,
        account_id,
        plan.credits,
        LedgerReason::SubscriptionTopup,
        Some(payment_reference),
    )
    .await?;
    tx.commit().await?;

    info!(
        account_id,
        plan = %plan.name,
        subscription_id = subscription.id,
        "Subscription purchased"
    );
    Ok(TopUp {
        receipt,
        subscription,
    })
}

pub async fn fetch_subscription<'e, E>(
    exec: E,
    payment_reference: &str,
) -> Result<Option<Subscription>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql =
        format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE payment_reference = ?1");
    let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(payment_reference)
        .fetch_optional(exec)
        .await?;
    row.map(Subscription::try_from).transpose()
}

/// Ledger entries of one account, newest first.
pub async fn ledger_history(pool: &SqlitePool, account_id: AccountId) -> Result<Vec<LedgerEntry>> {
    if db::fetch_balance(pool, account_id).await?.is_none() {
        return Err(MediationError::NotFound("account").into());
    }
    db::ledger_for_account(pool, account_id).await
}

/// Compare the stored balance against the ledger.
pub async fn reconcile(pool: &SqlitePool, account_id: AccountId) -> Result<Reconciliation> {
    // One read transaction so balance and ledger come from the same snapshot.
    let mut tx = pool.begin().await?;
    let balance = db::fetch_balance(&mut *tx, account_id)
        .await?
        .ok_or(MediationError::NotFound("account"))?;
    let entries = db::ledger_for_account(&mut *tx, account_id).await?;
    tx.commit().await?;

    let report = ledger::reconcile(balance, &entries);
    if !report.consistent {
        warn!(
            account_id,
            balance = report.balance,
            expected = report.expected,
            "Ledger does not reconcile"
        );
    }
    Ok(report)
}
