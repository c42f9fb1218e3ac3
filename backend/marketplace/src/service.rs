//! Service facade: owns the pool and policy, and bounds every unit of work.
//!
//! Handlers and tests talk to [`Marketplace`] rather than to the store
//! modules directly. Every wait a unit of work can make is bounded by
//! `store_timeout`: pool acquisition through the pool's acquire timeout and
//! lock contention through SQLite's busy timeout. Both fail before the unit
//! of work commits, so `Timeout` and `Unavailable` always mean nothing was
//! written. A unit of work is never cut off once it runs.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use contact_mediation::ledger::Reconciliation;
use contact_mediation::{
    Acceptance, Account, AccountId, ChannelHandle, Charge, ContactRequest, CreditReceipt,
    InterestedBuyer, LedgerEntry, LedgerReason, Listing, ListingDraft, ListingId, MediationError,
    ModerationDecision, NewAccount, PlanId, PlatformStats, ProducerProfile, ProfileUpdate,
    ReopenPolicy, RequestId, Subscription, SubscriptionPlan,
};
use sqlx::SqlitePool;
use tracing::warn;

use crate::config::Config;
use crate::credits::{self, TopUp};
use crate::errors::Result;
use crate::listings::BrowseFilter;
use crate::{accounts, contacts, db, disclosure, listings, moderation, plans, stats};

#[derive(Debug, Clone)]
pub struct Marketplace {
    pool: SqlitePool,
    store_timeout: Duration,
    reopen: ReopenPolicy,
    revoke_on_suspension: bool,
}

impl Marketplace {
    /// Open the configured database, run migrations and apply `config`'s policy.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::init_pool(config).await?;
        Ok(Self::with_pool(pool, config))
    }

    pub fn with_pool(pool: SqlitePool, config: &Config) -> Self {
        Marketplace {
            pool,
            store_timeout: config.store_timeout(),
            reopen: config.reopen_policy(),
            revoke_on_suspension: config.revoke_on_suspension,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        if elapsed > self.store_timeout {
            let elapsed_ms = elapsed.as_millis() as u64;
            let timeout_ms = self.store_timeout.as_millis() as u64;
            warn!(op, elapsed_ms, timeout_ms, "Store operation overran its deadline");
        }
        if let Err(e) = &result {
            if e.domain().is_some_and(MediationError::is_retryable) {
                warn!(op, error = %e, "Store operation failed before commit");
            }
        }
        result
    }

    // ─── Accounts ─────────────────────────────────────────

    pub async fn register_account(&self, new: NewAccount) -> Result<Account> {
        self.bounded("register_account", accounts::register_account(&self.pool, new))
            .await
    }

    pub async fn account(&self, id: AccountId) -> Result<Account> {
        self.bounded("get_account", accounts::get_account(&self.pool, id))
            .await
    }

    pub async fn update_profile(&self, id: AccountId, update: ProfileUpdate) -> Result<Account> {
        self.bounded("update_profile", accounts::update_profile(&self.pool, id, update))
            .await
    }

    pub async fn producer_profile(&self, id: AccountId) -> Result<ProducerProfile> {
        self.bounded("public_producer", accounts::public_producer(&self.pool, id))
            .await
    }

    pub async fn listing_producer(&self, listing: ListingId) -> Result<ProducerProfile> {
        self.bounded(
            "public_producer_for_listing",
            accounts::public_producer_for_listing(&self.pool, listing),
        )
        .await
    }

    pub async fn resolve_identity(&self, identity: &str) -> Result<Option<AccountId>> {
        self.bounded("resolve_identity", accounts::resolve_identity(&self.pool, identity))
            .await
    }

    // ─── Listings ─────────────────────────────────────────

    pub async fn create_listing(&self, producer: AccountId, draft: ListingDraft) -> Result<Listing> {
        self.bounded("create_listing", listings::create_listing(&self.pool, producer, draft))
            .await
    }

    pub async fn update_listing(
        &self,
        producer: AccountId,
        id: ListingId,
        draft: ListingDraft,
    ) -> Result<Listing> {
        self.bounded(
            "update_listing",
            listings::update_listing(&self.pool, producer, id, draft),
        )
        .await
    }

    pub async fn listing(&self, id: ListingId, viewer: Option<AccountId>) -> Result<Listing> {
        self.bounded("get_listing", listings::get_listing(&self.pool, id, viewer))
            .await
    }

    pub async fn listings_by_producer(&self, producer: AccountId) -> Result<Vec<Listing>> {
        self.bounded("list_by_producer", listings::list_by_producer(&self.pool, producer))
            .await
    }

    pub async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<Listing>> {
        self.bounded("browse", listings::browse(&self.pool, filter))
            .await
    }

    pub async fn record_view(&self, id: ListingId) -> Result<i64> {
        self.bounded("record_view", listings::record_view(&self.pool, id))
            .await
    }

    pub async fn delete_listing(&self, producer: AccountId, id: ListingId) -> Result<()> {
        self.bounded("delete_listing", listings::delete_listing(&self.pool, producer, id))
            .await
    }

    // ─── Contact requests ─────────────────────────────────

    pub async fn create_request(
        &self,
        buyer: AccountId,
        producer: AccountId,
        listing: ListingId,
        message: Option<String>,
    ) -> Result<ContactRequest> {
        self.bounded(
            "create_request",
            contacts::create_request(&self.pool, buyer, producer, listing, message),
        )
        .await
    }

    pub async fn accept(&self, request: RequestId, producer: AccountId) -> Result<Acceptance> {
        self.bounded("accept", contacts::accept(&self.pool, request, producer))
            .await
    }

    pub async fn reject(&self, request: RequestId, producer: AccountId) -> Result<ContactRequest> {
        self.bounded("reject", contacts::reject(&self.pool, request, producer))
            .await
    }

    pub async fn reopen(&self, request: RequestId, buyer: AccountId) -> Result<ContactRequest> {
        self.bounded("reopen", contacts::reopen(&self.pool, request, buyer, self.reopen))
            .await
    }

    pub async fn delete_request(&self, request: RequestId, buyer: AccountId) -> Result<()> {
        self.bounded("delete_request", contacts::delete(&self.pool, request, buyer))
            .await
    }

    pub async fn incoming_requests(&self, producer: AccountId) -> Result<Vec<ContactRequest>> {
        self.bounded("list_incoming", contacts::list_incoming(&self.pool, producer))
            .await
    }

    pub async fn outgoing_requests(&self, buyer: AccountId) -> Result<Vec<ContactRequest>> {
        self.bounded("list_outgoing", contacts::list_outgoing(&self.pool, buyer))
            .await
    }

    pub async fn interested_buyers(&self, producer: AccountId) -> Result<Vec<InterestedBuyer>> {
        self.bounded("interested_buyers", contacts::interested_buyers(&self.pool, producer))
            .await
    }

    pub async fn request(&self, request: RequestId, actor: AccountId) -> Result<ContactRequest> {
        self.bounded("get_request", contacts::get_request(&self.pool, request, actor))
            .await
    }

    // ─── Credits ──────────────────────────────────────────

    /// Charge an already-accepted request in its own transaction. Acceptance
    /// charges on its own; this returns `already_charged` for such requests.
    pub async fn charge_for_contact(&self, buyer: AccountId, request: RequestId) -> Result<Charge> {
        self.bounded("charge_for_contact", async {
            let mut tx = self.pool.begin().await?;
            let charge = credits::charge_for_contact(&mut tx, buyer, request).await?;
            tx.commit().await?;
            Ok(charge)
        })
        .await
    }

    pub async fn credit_account(
        &self,
        account: AccountId,
        amount: i64,
        reason: LedgerReason,
        reference: Option<&str>,
    ) -> Result<CreditReceipt> {
        self.bounded(
            "credit_account",
            credits::credit_account(&self.pool, account, amount, reason, reference),
        )
        .await
    }

    pub async fn top_up_with_plan(
        &self,
        account: AccountId,
        plan: PlanId,
        payment_reference: &str,
    ) -> Result<TopUp> {
        self.bounded(
            "top_up_with_plan",
            credits::top_up_with_plan(&self.pool, account, plan, payment_reference),
        )
        .await
    }

    pub async fn ledger_history(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        self.bounded("ledger_history", credits::ledger_history(&self.pool, account))
            .await
    }

    pub async fn reconcile(&self, account: AccountId) -> Result<Reconciliation> {
        self.bounded("reconcile", credits::reconcile(&self.pool, account))
            .await
    }

    pub async fn plans(&self) -> Result<Vec<SubscriptionPlan>> {
        self.bounded("list_plans", plans::list_active(&self.pool))
            .await
    }

    pub async fn subscriptions(&self, account: AccountId) -> Result<Vec<Subscription>> {
        self.bounded("list_subscriptions", plans::subscriptions_for_account(&self.pool, account))
            .await
    }

    pub async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<u64> {
        self.bounded("expire_subscriptions", plans::expire_due(&self.pool, now))
            .await
    }

    // ─── Disclosure ───────────────────────────────────────

    pub async fn contact_channel(
        &self,
        requester: AccountId,
        producer: AccountId,
        listing: ListingId,
    ) -> Result<ChannelHandle> {
        self.bounded(
            "get_contact_channel",
            disclosure::get_contact_channel(
                &self.pool,
                requester,
                producer,
                listing,
                self.revoke_on_suspension,
            ),
        )
        .await
    }

    // ─── Moderation ───────────────────────────────────────

    pub async fn set_listing_moderation(
        &self,
        admin: AccountId,
        listing: ListingId,
        decision: ModerationDecision,
    ) -> Result<Listing> {
        self.bounded(
            "set_listing_moderation",
            moderation::set_listing_moderation(&self.pool, admin, listing, decision),
        )
        .await
    }

    pub async fn set_listing_visibility(
        &self,
        actor: AccountId,
        listing: ListingId,
        hidden: bool,
    ) -> Result<Listing> {
        self.bounded(
            "set_listing_visibility",
            moderation::set_listing_visibility(&self.pool, actor, listing, hidden),
        )
        .await
    }

    pub async fn suspend_account(&self, admin: AccountId, account: AccountId) -> Result<Account> {
        self.bounded("suspend_account", moderation::suspend_account(&self.pool, admin, account))
            .await
    }

    pub async fn reinstate_account(&self, admin: AccountId, account: AccountId) -> Result<Account> {
        self.bounded(
            "reinstate_account",
            moderation::reinstate_account(&self.pool, admin, account),
        )
        .await
    }

    pub async fn verify_account(&self, admin: AccountId, account: AccountId) -> Result<Account> {
        self.bounded("verify_account", moderation::verify_account(&self.pool, admin, account))
            .await
    }

    pub async fn delete_account(&self, admin: AccountId, account: AccountId) -> Result<()> {
        self.bounded("delete_account", moderation::delete_account(&self.pool, admin, account))
            .await
    }

    pub async fn stats(&self, admin: AccountId) -> Result<PlatformStats> {
        self.bounded("stats", async {
            moderation::require_admin(&self.pool, admin).await?;
            stats::platform_stats(&self.pool).await
        })
        .await
    }
}
