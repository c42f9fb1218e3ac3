//! Platform-wide counters for the admin dashboard.

use contact_mediation::PlatformStats;
use sqlx::SqlitePool;

use crate::errors::Result;

pub async fn platform_stats(pool: &SqlitePool) -> Result<PlatformStats> {
    let (listings_pending, listings_approved, listings_rejected): (i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(moderation_status = 'pending'), 0),
                   COALESCE(SUM(moderation_status = 'approved'), 0),
                   COALESCE(SUM(moderation_status = 'rejected'), 0)
            FROM   listings
            "#,
        )
        .fetch_one(pool)
        .await?;

    let (producers, buyers, admins, credits_outstanding): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(role = 'producer'), 0),
               COALESCE(SUM(role = 'buyer'), 0),
               COALESCE(SUM(role = 'admin'), 0),
               COALESCE(SUM(credits), 0)
        FROM   accounts
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (requests_pending, requests_accepted, requests_rejected): (i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(status = 'pending'), 0),
                   COALESCE(SUM(status = 'accepted'), 0),
                   COALESCE(SUM(status = 'rejected'), 0)
            FROM   contact_requests
            "#,
        )
        .fetch_one(pool)
        .await?;

    Ok(PlatformStats {
        listings_pending,
        listings_approved,
        listings_rejected,
        producers,
        buyers,
        admins,
        requests_pending,
        requests_accepted,
        requests_rejected,
        credits_outstanding,
    })
}
