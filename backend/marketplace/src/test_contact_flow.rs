use contact_mediation::invariants::assert_valid_contact_transition;
use contact_mediation::{
    ContactAction, ContactStatus, DenialReason, MediationError, ReopenPolicy, Role,
};

use crate::config::Config;
use crate::testing::{
    approved_listing, assert_consistent, domain, draft, fixture, fixture_with, fund, register,
};

#[tokio::test]
async fn test_reject_reopen_accept_charges_once() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;

    let r1 = f
        .market
        .create_request(f.buyer, f.producer, f.listing, Some("Bonjour".into()))
        .await
        .unwrap();
    assert_eq!(r1.status, ContactStatus::Pending);

    let rejected = f.market.reject(r1.id, f.producer).await.unwrap();
    assert_valid_contact_transition(r1.status, ContactAction::Reject, rejected.status);

    let reopened = f.market.reopen(r1.id, f.buyer).await.unwrap();
    assert_valid_contact_transition(rejected.status, ContactAction::Reopen, reopened.status);
    assert_eq!(reopened.reopen_count, 1);

    let acceptance = f.market.accept(r1.id, f.producer).await.unwrap();
    assert_valid_contact_transition(
        reopened.status,
        ContactAction::Accept,
        acceptance.request.status,
    );
    assert_eq!(acceptance.buyer_balance, 0);
    assert!(acceptance.request.accepted_at.is_some());

    let handle = f
        .market
        .contact_channel(f.buyer, f.producer, f.listing)
        .await
        .unwrap();
    assert_eq!(handle.account_id, f.producer);

    assert_consistent(&f.market, &[f.buyer, f.producer]).await;
}

#[tokio::test]
async fn test_accept_without_credits_rolls_back() {
    let f = fixture().await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let err = domain(f.market.accept(request.id, f.producer).await.unwrap_err());
    assert_eq!(
        err,
        MediationError::InsufficientCredits {
            balance: 0,
            required: 1
        }
    );

    let after = f.market.request(request.id, f.buyer).await.unwrap();
    assert_eq!(after.status, ContactStatus::Pending);
    assert!(after.accepted_at.is_none());
    assert!(f.market.ledger_history(f.buyer).await.unwrap().is_empty());
    assert_eq!(
        domain(
            f.market
                .contact_channel(f.buyer, f.producer, f.listing)
                .await
                .unwrap_err()
        ),
        MediationError::NotAuthorized(DenialReason::Pending)
    );

    // Topping up lets the same request go through.
    fund(&f.market, f.buyer, 1).await;
    let acceptance = f.market.accept(request.id, f.producer).await.unwrap();
    assert_eq!(acceptance.buyer_balance, 0);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_second_accept_is_refused_not_rebilled() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 5).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.accept(request.id, f.producer).await.unwrap();

    let err = domain(f.market.accept(request.id, f.producer).await.unwrap_err());
    assert_eq!(
        err,
        MediationError::InvalidTransition {
            from: ContactStatus::Accepted,
            action: ContactAction::Accept
        }
    );
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 4);

    // A direct charge of an accepted request is idempotent.
    let charge = f
        .market
        .charge_for_contact(f.buyer, request.id)
        .await
        .unwrap();
    assert!(charge.already_charged);
    assert_eq!(charge.new_balance, 4);

    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_charge_requires_accepted_request_of_buyer() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let err = domain(
        f.market
            .charge_for_contact(f.buyer, request.id)
            .await
            .unwrap_err(),
    );
    assert!(matches!(err, MediationError::InvalidTransition { .. }));
    assert_eq!(
        domain(
            f.market
                .charge_for_contact(f.producer, request.id)
                .await
                .unwrap_err()
        ),
        MediationError::Forbidden
    );
    assert_eq!(
        domain(f.market.charge_for_contact(f.buyer, 999).await.unwrap_err()),
        MediationError::NotFound("contact request")
    );
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 1);
}

#[tokio::test]
async fn test_concurrent_accepts_charge_exactly_once() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        f.market.accept(request.id, f.producer),
        f.market.accept(request.id, f.producer)
    );
    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (a, b) => panic!("expected exactly one winner, got {a:?} and {b:?}"),
    };
    assert_eq!(won.buyer_balance, 0);
    assert_eq!(
        domain(lost),
        MediationError::InvalidTransition {
            from: ContactStatus::Accepted,
            action: ContactAction::Accept
        }
    );

    let fees = f.market.ledger_history(f.buyer).await.unwrap();
    assert_eq!(fees.iter().filter(|e| e.contact_request_id == Some(request.id)).count(), 1);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_concurrent_accept_and_reject_have_one_winner() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let (accepted, rejected) = tokio::join!(
        f.market.accept(request.id, f.producer),
        f.market.reject(request.id, f.producer)
    );
    assert!(
        accepted.is_ok() != rejected.is_ok(),
        "exactly one of accept/reject must win"
    );
    let loser = accepted.err().or(rejected.err()).unwrap();
    assert!(matches!(domain(loser), MediationError::InvalidTransition { .. }));

    let current = f.market.request(request.id, f.buyer).await.unwrap();
    let expected_balance = i64::from(current.status != ContactStatus::Accepted);
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, expected_balance);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_one_credit_covers_only_one_of_two_requests() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let other = approved_listing(&f.market, f.admin, f.producer, "Igname").await;
    let r1 = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    let r2 = f
        .market
        .create_request(f.buyer, f.producer, other.id, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        f.market.accept(r1.id, f.producer),
        f.market.accept(r2.id, f.producer)
    );
    let failure = match (a, b) {
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => domain(e),
        (a, b) => panic!("expected exactly one acceptance, got {a:?} and {b:?}"),
    };
    assert_eq!(
        failure,
        MediationError::InsufficientCredits {
            balance: 0,
            required: 1
        }
    );

    let statuses: Vec<ContactStatus> = f
        .market
        .outgoing_requests(f.buyer)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert!(statuses.contains(&ContactStatus::Accepted));
    assert!(statuses.contains(&ContactStatus::Pending));
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 0);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_duplicate_active_request_is_refused() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let first = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let again = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap_err();
    assert_eq!(domain(again), MediationError::DuplicateActiveRequest);

    f.market.accept(first.id, f.producer).await.unwrap();
    let after_accept = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap_err();
    assert_eq!(domain(after_accept), MediationError::DuplicateActiveRequest);
}

#[tokio::test]
async fn test_concurrent_creates_leave_one_request() {
    let f = fixture().await;
    let (a, b) = tokio::join!(
        f.market.create_request(f.buyer, f.producer, f.listing, None),
        f.market.create_request(f.buyer, f.producer, f.listing, None)
    );
    assert!(a.is_ok() != b.is_ok());
    let err = a.err().or(b.err()).unwrap();
    assert_eq!(domain(err), MediationError::DuplicateActiveRequest);
    assert_eq!(f.market.outgoing_requests(f.buyer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_request_does_not_block_a_new_one() {
    let f = fixture().await;
    let first = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.reject(first.id, f.producer).await.unwrap();

    let second = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);

    // Reopening the old one would make two active requests for the triple.
    let err = f.market.reopen(first.id, f.buyer).await.unwrap_err();
    assert_eq!(domain(err), MediationError::DuplicateActiveRequest);

    let outgoing = f.market.outgoing_requests(f.buyer).await.unwrap();
    assert_eq!(outgoing[0].id, second.id, "newest first");
}

#[tokio::test]
async fn test_reopen_is_capped() {
    let f = fixture_with(Config {
        max_reopens: 2,
        ..Config::in_memory()
    })
    .await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    for _ in 0..2 {
        f.market.reject(request.id, f.producer).await.unwrap();
        f.market.reopen(request.id, f.buyer).await.unwrap();
    }
    f.market.reject(request.id, f.producer).await.unwrap();
    let err = f.market.reopen(request.id, f.buyer).await.unwrap_err();
    assert_eq!(domain(err), MediationError::RetryLimitExceeded { limit: 2 });

    let current = f.market.request(request.id, f.buyer).await.unwrap();
    assert_eq!(current.status, ContactStatus::Rejected);
    assert_eq!(current.reopen_count, 2);
}

#[tokio::test]
async fn test_unlimited_reopens_when_cap_is_zero() {
    let f = fixture_with(Config {
        max_reopens: ReopenPolicy::UNLIMITED.max_reopens,
        ..Config::in_memory()
    })
    .await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    for _ in 0..10 {
        f.market.reject(request.id, f.producer).await.unwrap();
        f.market.reopen(request.id, f.buyer).await.unwrap();
    }
    let current = f.market.request(request.id, f.buyer).await.unwrap();
    assert_eq!(current.reopen_count, 10);
}

#[tokio::test]
async fn test_reopen_only_from_rejected_and_by_buyer() {
    let f = fixture().await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    let err = f.market.reopen(request.id, f.buyer).await.unwrap_err();
    assert_eq!(
        domain(err),
        MediationError::InvalidTransition {
            from: ContactStatus::Pending,
            action: ContactAction::Reopen
        }
    );

    f.market.reject(request.id, f.producer).await.unwrap();
    let err = f.market.reopen(request.id, f.producer).await.unwrap_err();
    assert_eq!(domain(err), MediationError::Forbidden);
}

#[tokio::test]
async fn test_only_the_owning_producer_decides() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let rival = register(&f.market, "rival", Role::Producer, "+225 07 99 99 99 99").await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    for actor in [rival.id, f.buyer, f.admin] {
        assert_eq!(
            domain(f.market.accept(request.id, actor).await.unwrap_err()),
            MediationError::Forbidden
        );
        assert_eq!(
            domain(f.market.reject(request.id, actor).await.unwrap_err()),
            MediationError::Forbidden
        );
    }
    assert_eq!(
        domain(f.market.accept(404, f.producer).await.unwrap_err()),
        MediationError::NotFound("contact request")
    );
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 1);
}

#[tokio::test]
async fn test_accept_refused_for_suspended_buyer() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.suspend_account(f.admin, f.buyer).await.unwrap();

    let err = domain(f.market.accept(request.id, f.producer).await.unwrap_err());
    assert!(matches!(err, MediationError::Conflict(_)));
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 1);
}

#[tokio::test]
async fn test_delete_request_rules() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 1).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();

    assert_eq!(
        domain(f.market.delete_request(request.id, f.producer).await.unwrap_err()),
        MediationError::Forbidden
    );
    f.market.delete_request(request.id, f.buyer).await.unwrap();
    assert_eq!(
        domain(f.market.request(request.id, f.buyer).await.unwrap_err()),
        MediationError::NotFound("contact request")
    );

    let kept = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.accept(kept.id, f.producer).await.unwrap();
    assert_eq!(
        domain(f.market.delete_request(kept.id, f.buyer).await.unwrap_err()),
        MediationError::InvalidTransition {
            from: ContactStatus::Accepted,
            action: ContactAction::Delete
        }
    );
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_create_request_validation() {
    let f = fixture().await;
    let other_producer = register(&f.market, "yao", Role::Producer, "+225 07 12 12 12 12").await;
    let pending = f
        .market
        .create_listing(f.producer, draft("Cacao"))
        .await
        .unwrap();

    let cases = [
        (f.buyer, f.producer, pending.id, None, "unapproved listing"),
        (f.buyer, f.producer, 999, None, "unknown listing"),
        (f.buyer, other_producer.id, f.listing, None, "wrong producer"),
        (f.producer, f.producer, f.listing, None, "self request"),
        (other_producer.id, f.producer, f.listing, None, "producer as buyer"),
        (f.buyer, f.producer, f.listing, Some("x".repeat(1001)), "long message"),
    ];
    let expected = [
        MediationError::NotFound("listing"),
        MediationError::NotFound("listing"),
        MediationError::Validation("listing does not belong to this producer".into()),
        MediationError::Validation("cannot request contact with yourself".into()),
        MediationError::Forbidden,
        MediationError::Validation("message must be at most 1000 characters".into()),
    ];
    for ((buyer, producer, listing, message, case), expected) in cases.into_iter().zip(expected) {
        let err = f
            .market
            .create_request(buyer, producer, listing, message)
            .await
            .unwrap_err();
        assert_eq!(domain(err), expected, "{case}");
    }
}

#[tokio::test]
async fn test_request_listings_are_private_to_parties() {
    let f = fixture().await;
    let stranger = register(&f.market, "ama", Role::Buyer, "+225 05 01 01 01 01").await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, Some("  ".into()))
        .await
        .unwrap();
    assert_eq!(request.message, None, "blank messages are dropped");

    assert_eq!(f.market.incoming_requests(f.producer).await.unwrap(), vec![request.clone()]);
    assert_eq!(f.market.outgoing_requests(f.buyer).await.unwrap(), vec![request.clone()]);
    assert!(f.market.incoming_requests(f.buyer).await.unwrap().is_empty());

    assert_eq!(f.market.request(request.id, f.producer).await.unwrap(), request);
    assert_eq!(
        domain(f.market.request(request.id, stranger.id).await.unwrap_err()),
        MediationError::Forbidden
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_store_races_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database_url: format!("sqlite:{}", dir.path().join("market.db").display()),
        db_max_connections: 5,
        ..Config::default()
    };
    let f = fixture_with(config).await;

    for round in 0..5 {
        fund(&f.market, f.buyer, 1).await;
        let first = approved_listing(&f.market, f.admin, f.producer, &format!("Riz {round}")).await;
        let second =
            approved_listing(&f.market, f.admin, f.producer, &format!("Manioc {round}")).await;
        let r1 = f
            .market
            .create_request(f.buyer, f.producer, first.id, None)
            .await
            .unwrap();
        let r2 = f
            .market
            .create_request(f.buyer, f.producer, second.id, None)
            .await
            .unwrap();

        let (m1, m2, m3) = (f.market.clone(), f.market.clone(), f.market.clone());
        let producer = f.producer;
        let same_a = tokio::spawn(async move { m1.accept(r1.id, producer).await });
        let same_b = tokio::spawn(async move { m2.accept(r1.id, producer).await });
        let other = tokio::spawn(async move { m3.accept(r2.id, producer).await });
        let outcomes = [
            same_a.await.unwrap(),
            same_b.await.unwrap(),
            other.await.unwrap(),
        ];

        // One credit, three attempts: exactly one acceptance is billed.
        let won = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(won, 1, "round {round}: {outcomes:?}");
        for outcome in outcomes {
            if let Err(e) = outcome {
                assert!(matches!(
                    domain(e),
                    MediationError::InvalidTransition { .. }
                        | MediationError::InsufficientCredits { .. }
                ));
            }
        }
        assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 0);
    }

    let accepted = f
        .market
        .outgoing_requests(f.buyer)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ContactStatus::Accepted)
        .count();
    assert_eq!(accepted, 5);
    assert_consistent(&f.market, &[f.buyer, f.producer]).await;
}
