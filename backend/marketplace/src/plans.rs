//! Subscription plans (read-only reference data) and subscription validity.

use chrono::{DateTime, Utc};
use contact_mediation::{AccountId, Subscription, SubscriptionPlan};
use sqlx::SqlitePool;

use crate::db::{self, PlanRow, SubscriptionRow, PLAN_COLUMNS, SUBSCRIPTION_COLUMNS};
use crate::errors::Result;

/// Plans currently on sale, cheapest first.
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<SubscriptionPlan>> {
    let sql = format!(
        "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE active = 1 ORDER BY credits ASC, id ASC"
    );
    let rows = sqlx::query_as::<_, PlanRow>(&sql).fetch_all(pool).await?;
    db::convert_all(rows)
}

pub async fn subscriptions_for_account(
    pool: &SqlitePool,
    account_id: AccountId,
) -> Result<Vec<Subscription>> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE account_id = ?1 ORDER BY id DESC"
    );
    let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
        .bind(account_id)
        .fetch_all(pool)
        .await?;
    db::convert_all(rows)
}

/// Mark every active subscription that ended at or before `now` as expired.
/// Credits already granted are kept. Returns the number of rows changed.
pub async fn expire_due(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result =
        sqlx::query("UPDATE subscriptions SET status = 'expired' WHERE status = 'active' AND end_at <= ?1")
            .bind(now)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}
