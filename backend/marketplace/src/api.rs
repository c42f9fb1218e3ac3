//! Axum REST API handlers.
//!
//! Handlers only translate HTTP into [`Marketplace`] calls. Every error
//! leaves through [`MarketError`]'s `IntoResponse`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use contact_mediation::ledger::Reconciliation;
use contact_mediation::{
    Acceptance, Account, AccountId, ChannelHandle, ContactRequest, CreditReceipt,
    InterestedBuyer, LedgerEntry, LedgerReason, Listing, ListingDraft, ListingId,
    ModerationDecision, NewAccount, PlanId, PlatformStats, ProducerProfile, ProfileUpdate,
    RequestId, Subscription, SubscriptionPlan,
};
use serde::{Deserialize, Serialize};

use crate::credits::TopUp;
use crate::errors::Result;
use crate::identity::{Actor, MaybeActor, PaymentCollaborator};
use crate::listings::BrowseFilter;
use crate::service::Marketplace;

pub struct AppState {
    pub market: Marketplace,
    /// Shared secret of the payment collaborator; `None` closes `/credits`.
    pub payment_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(register_account))
        .route("/accounts/me", get(my_account).put(update_profile))
        .route("/accounts/me/ledger", get(my_ledger))
        .route("/accounts/me/reconciliation", get(my_reconciliation))
        .route("/accounts/me/listings", get(my_listings))
        .route("/accounts/me/subscriptions", get(my_subscriptions))
        .route("/accounts/me/interested-buyers", get(interested_buyers))
        .route("/producers/:id", get(producer_profile))
        .route("/plans", get(list_plans))
        .route("/credits", post(credit_account))
        .route("/credits/plan-topups", post(top_up_with_plan))
        .route("/listings", post(create_listing).get(browse_listings))
        .route(
            "/listings/:id",
            get(get_listing).put(update_listing).delete(delete_listing),
        )
        .route("/listings/:id/producer", get(listing_producer))
        .route("/listings/:id/views", post(record_view))
        .route("/listings/:id/visibility", put(set_visibility))
        .route("/contact-requests", post(create_request))
        .route("/contact-requests/incoming", get(incoming_requests))
        .route("/contact-requests/outgoing", get(outgoing_requests))
        .route("/contact-requests/:id", get(get_request).delete(delete_request))
        .route("/contact-requests/:id/accept", post(accept_request))
        .route("/contact-requests/:id/reject", post(reject_request))
        .route("/contact-requests/:id/reopen", post(reopen_request))
        .route("/contact-channel", get(contact_channel))
        .route("/admin/listings/:id/moderation", put(moderate_listing))
        .route("/admin/accounts/:id", delete(delete_account))
        .route("/admin/accounts/:id/suspend", post(suspend_account))
        .route("/admin/accounts/:id/reinstate", post(reinstate_account))
        .route("/admin/accounts/:id/verify", post(verify_account))
        .route("/admin/stats", get(platform_stats))
        .with_state(state)
}

type AppStateRef = State<Arc<AppState>>;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        ListResponse {
            count: items.len(),
            items,
        }
    }
}

#[derive(Serialize)]
pub struct ViewCountResponse {
    pub listing_id: ListingId,
    pub view_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreditBody {
    pub account_id: AccountId,
    pub amount: i64,
    pub reason: LedgerReason,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpBody {
    pub account_id: AccountId,
    pub plan_id: PlanId,
    pub payment_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityBody {
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub producer_id: AccountId,
    pub listing_id: ListingId,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub producer_id: AccountId,
    pub listing_id: ListingId,
}

#[derive(Debug, Deserialize)]
pub struct ModerationBody {
    pub decision: ModerationDecision,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /accounts`
///
/// Stand-in for the external registration flow.
pub async fn register_account(
    State(state): AppStateRef,
    Json(body): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>)> {
    let account = state.market.register_account(body).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /accounts/me`
pub async fn my_account(State(state): AppStateRef, Actor(me): Actor) -> Result<Json<Account>> {
    Ok(Json(state.market.account(me).await?))
}

/// `PUT /accounts/me`
pub async fn update_profile(
    State(state): AppStateRef,
    Actor(me): Actor,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<Account>> {
    Ok(Json(state.market.update_profile(me, body).await?))
}

/// `GET /accounts/me/ledger`
pub async fn my_ledger(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<LedgerEntry>>> {
    Ok(Json(state.market.ledger_history(me).await?.into()))
}

/// `GET /accounts/me/reconciliation`
pub async fn my_reconciliation(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<Reconciliation>> {
    Ok(Json(state.market.reconcile(me).await?))
}

/// `GET /accounts/me/listings`
///
/// The producer's own listings, whatever their moderation status.
pub async fn my_listings(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<Listing>>> {
    Ok(Json(state.market.listings_by_producer(me).await?.into()))
}

/// `GET /accounts/me/subscriptions`
pub async fn my_subscriptions(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<Subscription>>> {
    Ok(Json(state.market.subscriptions(me).await?.into()))
}

/// `GET /accounts/me/interested-buyers`
///
/// Buyers who asked for the producer's contact, newest interaction first.
pub async fn interested_buyers(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<InterestedBuyer>>> {
    Ok(Json(state.market.interested_buyers(me).await?.into()))
}

/// `GET /producers/:id`
pub async fn producer_profile(
    State(state): AppStateRef,
    Path(id): Path<AccountId>,
) -> Result<Json<ProducerProfile>> {
    Ok(Json(state.market.producer_profile(id).await?))
}

/// `GET /plans`
pub async fn list_plans(State(state): AppStateRef) -> Result<Json<ListResponse<SubscriptionPlan>>> {
    Ok(Json(state.market.plans().await?.into()))
}

/// `POST /credits`
pub async fn credit_account(
    State(state): AppStateRef,
    _collaborator: PaymentCollaborator,
    Json(body): Json<CreditBody>,
) -> Result<Json<CreditReceipt>> {
    let receipt = state
        .market
        .credit_account(body.account_id, body.amount, body.reason, body.reference.as_deref())
        .await?;
    Ok(Json(receipt))
}

/// `POST /credits/plan-topups`
pub async fn top_up_with_plan(
    State(state): AppStateRef,
    _collaborator: PaymentCollaborator,
    Json(body): Json<TopUpBody>,
) -> Result<Json<TopUp>> {
    let top_up = state
        .market
        .top_up_with_plan(body.account_id, body.plan_id, &body.payment_reference)
        .await?;
    Ok(Json(top_up))
}

/// `POST /listings`
pub async fn create_listing(
    State(state): AppStateRef,
    Actor(me): Actor,
    Json(draft): Json<ListingDraft>,
) -> Result<(StatusCode, Json<Listing>)> {
    let listing = state.market.create_listing(me, draft).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// `GET /listings?q=&location=&limit=&offset=`
pub async fn browse_listings(
    State(state): AppStateRef,
    Query(filter): Query<BrowseFilter>,
) -> Result<Json<ListResponse<Listing>>> {
    Ok(Json(state.market.browse(&filter).await?.into()))
}

/// `GET /listings/:id`
pub async fn get_listing(
    State(state): AppStateRef,
    MaybeActor(viewer): MaybeActor,
    Path(id): Path<ListingId>,
) -> Result<Json<Listing>> {
    Ok(Json(state.market.listing(id, viewer).await?))
}

/// `PUT /listings/:id`
pub async fn update_listing(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<ListingId>,
    Json(draft): Json<ListingDraft>,
) -> Result<Json<Listing>> {
    Ok(Json(state.market.update_listing(me, id, draft).await?))
}

/// `GET /listings/:id/producer`
pub async fn listing_producer(
    State(state): AppStateRef,
    Path(id): Path<ListingId>,
) -> Result<Json<ProducerProfile>> {
    Ok(Json(state.market.listing_producer(id).await?))
}

/// `DELETE /listings/:id`
pub async fn delete_listing(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<ListingId>,
) -> Result<StatusCode> {
    state.market.delete_listing(me, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /listings/:id/views`
pub async fn record_view(
    State(state): AppStateRef,
    Path(id): Path<ListingId>,
) -> Result<Json<ViewCountResponse>> {
    let view_count = state.market.record_view(id).await?;
    Ok(Json(ViewCountResponse {
        listing_id: id,
        view_count,
    }))
}

/// `PUT /listings/:id/visibility`
pub async fn set_visibility(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<ListingId>,
    Json(body): Json<VisibilityBody>,
) -> Result<Json<Listing>> {
    Ok(Json(state.market.set_listing_visibility(me, id, body.hidden).await?))
}

/// `POST /contact-requests`
pub async fn create_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<ContactRequest>)> {
    let request = state
        .market
        .create_request(me, body.producer_id, body.listing_id, body.message)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// `GET /contact-requests/incoming`
pub async fn incoming_requests(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<ContactRequest>>> {
    Ok(Json(state.market.incoming_requests(me).await?.into()))
}

/// `GET /contact-requests/outgoing`
pub async fn outgoing_requests(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<ListResponse<ContactRequest>>> {
    Ok(Json(state.market.outgoing_requests(me).await?.into()))
}

/// `GET /contact-requests/:id`
pub async fn get_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<ContactRequest>> {
    Ok(Json(state.market.request(id, me).await?))
}

/// `DELETE /contact-requests/:id`
pub async fn delete_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<RequestId>,
) -> Result<StatusCode> {
    state.market.delete_request(id, me).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /contact-requests/:id/accept`
pub async fn accept_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<Acceptance>> {
    Ok(Json(state.market.accept(id, me).await?))
}

/// `POST /contact-requests/:id/reject`
pub async fn reject_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<ContactRequest>> {
    Ok(Json(state.market.reject(id, me).await?))
}

/// `POST /contact-requests/:id/reopen`
pub async fn reopen_request(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<RequestId>,
) -> Result<Json<ContactRequest>> {
    Ok(Json(state.market.reopen(id, me).await?))
}

/// `GET /contact-channel?producer_id=&listing_id=`
pub async fn contact_channel(
    State(state): AppStateRef,
    Actor(me): Actor,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<ChannelHandle>> {
    let handle = state
        .market
        .contact_channel(me, query.producer_id, query.listing_id)
        .await?;
    Ok(Json(handle))
}

/// `PUT /admin/listings/:id/moderation`
pub async fn moderate_listing(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<ListingId>,
    Json(body): Json<ModerationBody>,
) -> Result<Json<Listing>> {
    Ok(Json(state.market.set_listing_moderation(me, id, body.decision).await?))
}

/// `POST /admin/accounts/:id/suspend`
pub async fn suspend_account(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<AccountId>,
) -> Result<Json<Account>> {
    Ok(Json(state.market.suspend_account(me, id).await?))
}

/// `POST /admin/accounts/:id/reinstate`
pub async fn reinstate_account(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<AccountId>,
) -> Result<Json<Account>> {
    Ok(Json(state.market.reinstate_account(me, id).await?))
}

/// `POST /admin/accounts/:id/verify`
pub async fn verify_account(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<AccountId>,
) -> Result<Json<Account>> {
    Ok(Json(state.market.verify_account(me, id).await?))
}

/// `DELETE /admin/accounts/:id`
pub async fn delete_account(
    State(state): AppStateRef,
    Actor(me): Actor,
    Path(id): Path<AccountId>,
) -> Result<StatusCode> {
    state.market.delete_account(me, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/stats`
pub async fn platform_stats(
    State(state): AppStateRef,
    Actor(me): Actor,
) -> Result<Json<PlatformStats>> {
    Ok(Json(state.market.stats(me).await?))
}
