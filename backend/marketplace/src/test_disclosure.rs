use contact_mediation::{DenialReason, MediationError, Role};

use crate::config::Config;
use crate::db;
use crate::listings::BrowseFilter;
use crate::testing::{
    approved_listing, domain, fixture, fixture_with, fund, register, Fixture, BUYER_WHATSAPP,
};

async fn accepted_request(f: &Fixture) -> i64 {
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.accept(request.id, f.producer).await.unwrap();
    request.id
}

async fn denial(f: &Fixture, requester: i64, producer: i64, listing: i64) -> MediationError {
    domain(
        f.market
            .contact_channel(requester, producer, listing)
            .await
            .unwrap_err(),
    )
}

#[tokio::test]
async fn test_no_request_is_not_authorized() {
    let f = fixture().await;
    assert_eq!(
        denial(&f, f.buyer, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::NoRequest)
    );
}

#[tokio::test]
async fn test_pending_and_rejected_are_not_authorized() {
    let f = fixture().await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    assert_eq!(
        denial(&f, f.buyer, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::Pending)
    );

    f.market.reject(request.id, f.producer).await.unwrap();
    assert_eq!(
        denial(&f, f.buyer, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::Rejected)
    );
}

#[tokio::test]
async fn test_accepted_request_discloses_producer_handle() {
    let f = fixture().await;
    accepted_request(&f).await;

    let handle = f
        .market
        .contact_channel(f.buyer, f.producer, f.listing)
        .await
        .unwrap();
    assert_eq!(handle.account_id, f.producer);
    assert_eq!(handle.display_name, "awa Test");
    assert_eq!(handle.whatsapp, "+2250711223344");
    assert!(handle
        .deep_link
        .starts_with("https://wa.me/2250711223344?text="));
    assert!(handle.message_template.contains("Maïs jaune"));
    assert!(handle.message_template.starts_with("Bonjour awa"));
}

#[tokio::test]
async fn test_authorization_is_scoped_to_the_exact_triple() {
    let f = fixture().await;
    accepted_request(&f).await;
    let other_listing = approved_listing(&f.market, f.admin, f.producer, "Igname").await;
    let other_buyer = register(&f.market, "ama", Role::Buyer, "+225 05 01 01 01 01").await;

    assert_eq!(
        denial(&f, f.buyer, f.producer, other_listing.id).await,
        MediationError::NotAuthorized(DenialReason::NoRequest)
    );
    assert_eq!(
        denial(&f, other_buyer.id, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::NoRequest)
    );
    assert_eq!(
        denial(&f, f.buyer, f.admin, f.listing).await,
        MediationError::NotAuthorized(DenialReason::NoRequest)
    );
}

#[tokio::test]
async fn test_acceptance_returns_buyer_handle_to_producer() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    let acceptance = f.market.accept(request.id, f.producer).await.unwrap();

    let digits: String = BUYER_WHATSAPP.chars().filter(char::is_ascii_digit).collect();
    assert_eq!(acceptance.buyer_channel.account_id, f.buyer);
    assert_eq!(acceptance.buyer_channel.whatsapp, format!("+{digits}"));
    assert!(acceptance.buyer_channel.message_template.contains("kofi Test"));
}

#[tokio::test]
async fn test_suspension_revokes_and_reinstatement_restores() {
    let f = fixture().await;
    accepted_request(&f).await;

    f.market.suspend_account(f.admin, f.producer).await.unwrap();
    assert_eq!(
        denial(&f, f.buyer, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::Suspended)
    );
    f.market.reinstate_account(f.admin, f.producer).await.unwrap();
    assert!(f
        .market
        .contact_channel(f.buyer, f.producer, f.listing)
        .await
        .is_ok());

    f.market.suspend_account(f.admin, f.buyer).await.unwrap();
    assert_eq!(
        denial(&f, f.buyer, f.producer, f.listing).await,
        MediationError::NotAuthorized(DenialReason::Suspended)
    );
}

#[tokio::test]
async fn test_suspension_keeps_access_without_revocation() {
    let f = fixture_with(Config {
        revoke_on_suspension: false,
        ..Config::in_memory()
    })
    .await;
    accepted_request(&f).await;

    f.market.suspend_account(f.admin, f.producer).await.unwrap();
    assert!(f
        .market
        .contact_channel(f.buyer, f.producer, f.listing)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_each_disclosure_counts_a_contact_click() {
    let f = fixture().await;
    accepted_request(&f).await;

    for _ in 0..3 {
        f.market
            .contact_channel(f.buyer, f.producer, f.listing)
            .await
            .unwrap();
    }
    // Refused attempts are not counted.
    let _ = f.market.contact_channel(f.producer, f.buyer, f.listing).await;

    let listing = db::fetch_listing(f.market.pool(), f.listing)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listing.contact_click_count, 3);
}

#[tokio::test]
async fn test_browse_never_exposes_contact_numbers() {
    let f = fixture().await;
    accepted_request(&f).await;

    let listings = f.market.browse(&BrowseFilter::default()).await.unwrap();
    assert_eq!(listings.len(), 1);
    let json = serde_json::to_string(&listings).unwrap();
    assert!(!json.contains("whatsapp"));
    assert!(!json.contains("0711223344"));

    let requests = f.market.outgoing_requests(f.buyer).await.unwrap();
    let json = serde_json::to_string(&requests).unwrap();
    assert!(!json.contains("0711223344"));
}

#[tokio::test]
async fn test_click_counter_failure_does_not_block_disclosure() {
    let f = fixture().await;
    accepted_request(&f).await;
    sqlx::query(
        "CREATE TRIGGER clicks_unavailable BEFORE UPDATE OF contact_click_count ON listings \
         BEGIN SELECT RAISE(ABORT, 'click counter unavailable'); END",
    )
    .execute(f.market.pool())
    .await
    .unwrap();

    let handle = f
        .market
        .contact_channel(f.buyer, f.producer, f.listing)
        .await
        .unwrap();
    assert_eq!(handle.whatsapp, "+2250711223344");

    let listing = db::fetch_listing(f.market.pool(), f.listing)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listing.contact_click_count, 0);
}

#[tokio::test]
async fn test_browse_treats_wildcards_literally() {
    let f = fixture().await;
    let literal = approved_listing(&f.market, f.admin, f.producer, "Engrais 100%").await;
    approved_listing(&f.market, f.admin, f.producer, "Engrais 1000").await;
    approved_listing(&f.market, f.admin, f.producer, "Sac_25kg").await;
    approved_listing(&f.market, f.admin, f.producer, "Sac 25kg").await;

    let percent = f
        .market
        .browse(&BrowseFilter {
            q: Some("100%".to_string()),
            ..BrowseFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(percent.len(), 1);
    assert_eq!(percent[0].id, literal.id);

    let underscore = f
        .market
        .browse(&BrowseFilter {
            q: Some("c_2".to_string()),
            ..BrowseFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(underscore.len(), 1);
    assert_eq!(underscore[0].name, "Sac_25kg");
}
