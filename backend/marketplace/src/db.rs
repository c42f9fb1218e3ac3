//! Database layer: pool setup, migrations, row mapping and shared lookups.
//!
//! Rows are read into plain `*Row` structs and converted into the domain
//! types from `contact_mediation`; enum columns are stored as their
//! snake_case text and prices as canonical decimal strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use contact_mediation::{
    Account, AccountId, ContactRequest, LedgerEntry, Listing, ListingId, PlanId, RequestId,
    Subscription, SubscriptionPlan,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::info;

use crate::config::Config;
use crate::errors::{MarketError, Result};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(config: &Config) -> Result<SqlitePool> {
    let url = if config.database_url.starts_with("sqlite:") {
        config.database_url.clone()
    } else {
        format!("sqlite:{}", config.database_url)
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.store_timeout());
    let options = if config.is_in_memory() {
        options
    } else {
        // Readers keep going while one connection writes.
        options.journal_mode(SqliteJournalMode::Wal)
    };

    let pool_options = SqlitePoolOptions::new().acquire_timeout(config.store_timeout());
    let pool_options = if config.is_in_memory() {
        // Every connection to `:memory:` opens a distinct database, so the
        // pool must hold exactly one connection for its whole lifetime.
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options.max_connections(config.db_max_connections)
    };

    let pool = pool_options.connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

pub const ACCOUNT_COLUMNS: &str = "id, identity, role, first_name, last_name, whatsapp, country, \
     region, credits, verified, suspended, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub identity: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub whatsapp: String,
    pub country: String,
    pub region: Option<String>,
    pub credits: i64,
    pub verified: bool,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = MarketError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: row.id,
            identity: row.identity,
            role: row.role.parse()?,
            first_name: row.first_name,
            last_name: row.last_name,
            whatsapp: row.whatsapp,
            country: row.country,
            region: row.region,
            credits: row.credits,
            verified: row.verified,
            suspended: row.suspended,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub const LISTING_COLUMNS: &str = "id, producer_id, name, price, quantity, location, description, \
     moderation_status, hidden, view_count, contact_click_count, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct ListingRow {
    pub id: i64,
    pub producer_id: i64,
    pub name: String,
    pub price: String,
    pub quantity: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub moderation_status: String,
    pub hidden: bool,
    pub view_count: i64,
    pub contact_click_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = MarketError;

    fn try_from(row: ListingRow) -> Result<Self> {
        Ok(Listing {
            id: row.id,
            producer_id: row.producer_id,
            name: row.name,
            price: parse_price(&row.price)?,
            quantity: row.quantity,
            location: row.location,
            description: row.description,
            moderation_status: row.moderation_status.parse()?,
            hidden: row.hidden,
            view_count: row.view_count,
            contact_click_count: row.contact_click_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub const REQUEST_COLUMNS: &str = "id, buyer_id, producer_id, listing_id, message, status, \
     reopen_count, created_at, updated_at, accepted_at";

#[derive(Debug, sqlx::FromRow)]
pub struct RequestRow {
    pub id: i64,
    pub buyer_id: i64,
    pub producer_id: i64,
    pub listing_id: i64,
    pub message: Option<String>,
    pub status: String,
    pub reopen_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestRow> for ContactRequest {
    type Error = MarketError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(ContactRequest {
            id: row.id,
            buyer_id: row.buyer_id,
            producer_id: row.producer_id,
            listing_id: row.listing_id,
            message: row.message,
            status: row.status.parse()?,
            reopen_count: row.reopen_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            accepted_at: row.accepted_at,
        })
    }
}

pub const LEDGER_COLUMNS: &str =
    "id, account_id, direction, amount, reason, contact_request_id, reference, created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct LedgerRow {
    pub id: i64,
    pub account_id: i64,
    pub direction: String,
    pub amount: i64,
    pub reason: String,
    pub contact_request_id: Option<i64>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = MarketError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            direction: row.direction.parse()?,
            amount: row.amount,
            reason: row.reason.parse()?,
            contact_request_id: row.contact_request_id,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

pub const PLAN_COLUMNS: &str = "id, name, description, price, credits, validity_days, active";

#[derive(Debug, sqlx::FromRow)]
pub struct PlanRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: String,
    pub credits: i64,
    pub validity_days: i64,
    pub active: bool,
}

impl TryFrom<PlanRow> for SubscriptionPlan {
    type Error = MarketError;

    fn try_from(row: PlanRow) -> Result<Self> {
        Ok(SubscriptionPlan {
            id: row.id,
            name: row.name,
            description: row.description,
            price: parse_price(&row.price)?,
            credits: row.credits,
            validity_days: row.validity_days,
            active: row.active,
        })
    }
}

pub const SUBSCRIPTION_COLUMNS: &str =
    "id, account_id, plan_id, payment_reference, status, start_at, end_at";

#[derive(Debug, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub account_id: i64,
    pub plan_id: i64,
    pub payment_reference: String,
    pub status: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = MarketError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Subscription {
            id: row.id,
            account_id: row.account_id,
            plan_id: row.plan_id,
            payment_reference: row.payment_reference,
            status: row.status.parse()?,
            start_at: row.start_at,
            end_at: row.end_at,
        })
    }
}

fn parse_price(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| MarketError::Corrupt(format!("price {raw:?}: {e}")))
}

/// Convert a batch of rows, failing on the first corrupt one.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = MarketError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Lookups shared by the service modules
// ─────────────────────────────────────────────────────────

pub async fn fetch_account<'e, E>(exec: E, id: AccountId) -> Result<Option<Account>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(Account::try_from).transpose()
}

pub async fn fetch_listing<'e, E>(exec: E, id: ListingId) -> Result<Option<Listing>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1");
    let row = sqlx::query_as::<_, ListingRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(Listing::try_from).transpose()
}

pub async fn fetch_request<'e, E>(exec: E, id: RequestId) -> Result<Option<ContactRequest>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM contact_requests WHERE id = ?1");
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(ContactRequest::try_from).transpose()
}

pub async fn fetch_plan<'e, E>(exec: E, id: PlanId) -> Result<Option<SubscriptionPlan>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = ?1");
    let row = sqlx::query_as::<_, PlanRow>(&sql)
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(SubscriptionPlan::try_from).transpose()
}

/// Current stored balance, or `None` for an unknown account.
pub async fn fetch_balance<'e, E>(exec: E, id: AccountId) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM accounts WHERE id = ?1")
        .bind(id)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(|(credits,)| credits))
}

/// All ledger entries of one account, newest first.
pub async fn ledger_for_account<'e, E>(exec: E, id: AccountId) -> Result<Vec<LedgerEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE account_id = ?1 ORDER BY id DESC"
    );
    let rows = sqlx::query_as::<_, LedgerRow>(&sql)
        .bind(id)
        .fetch_all(exec)
        .await?;
    convert_all(rows)
}
