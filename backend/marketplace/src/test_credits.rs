use chrono::Duration;
use contact_mediation::{Direction, LedgerReason, MediationError, SubscriptionStatus};

use crate::testing::{assert_consistent, domain, fixture, fund};

#[tokio::test]
async fn test_credit_account_validates_input() {
    let f = fixture().await;
    let cases = [
        (f.buyer, 0, LedgerReason::AdminAdjustment, Some("r1")),
        (f.buyer, -5, LedgerReason::AdminAdjustment, Some("r2")),
        (f.buyer, 1, LedgerReason::ContactFee, Some("r3")),
        (f.buyer, 1, LedgerReason::SubscriptionTopup, None),
        (f.buyer, 1, LedgerReason::SubscriptionTopup, Some("  ")),
    ];
    for (account, amount, reason, reference) in cases {
        let err = f
            .market
            .credit_account(account, amount, reason, reference)
            .await
            .unwrap_err();
        assert!(
            matches!(domain(err), MediationError::Validation(_)),
            "{amount} {reason} {reference:?}"
        );
    }
    assert_eq!(
        domain(
            f.market
                .credit_account(999, 1, LedgerReason::AdminAdjustment, Some("ghost"))
                .await
                .unwrap_err()
        ),
        MediationError::NotFound("account")
    );
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_credit_replay_is_a_no_op() {
    let f = fixture().await;
    let first = f
        .market
        .credit_account(f.buyer, 10, LedgerReason::SubscriptionTopup, Some("pay-123"))
        .await
        .unwrap();
    assert_eq!(first.new_balance, 10);
    assert!(!first.already_applied);

    let replay = f
        .market
        .credit_account(f.buyer, 10, LedgerReason::SubscriptionTopup, Some("pay-123"))
        .await
        .unwrap();
    assert_eq!(replay.new_balance, 10);
    assert!(replay.already_applied);

    // Unreferenced adjustments are never deduplicated.
    fund(&f.market, f.buyer, 2).await;
    fund(&f.market, f.buyer, 2).await;
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 14);

    assert_eq!(f.market.ledger_history(f.buyer).await.unwrap().len(), 3);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_concurrent_replays_credit_once() {
    let f = fixture().await;
    let (a, b) = tokio::join!(
        f.market
            .credit_account(f.buyer, 5, LedgerReason::SubscriptionTopup, Some("pay-9")),
        f.market
            .credit_account(f.buyer, 5, LedgerReason::SubscriptionTopup, Some("pay-9"))
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.already_applied != b.already_applied);
    assert_eq!(f.market.account(f.buyer).await.unwrap().credits, 5);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_plan_top_up_grants_credits_and_subscription() {
    let f = fixture().await;
    let plans = f.market.plans().await.unwrap();
    assert_eq!(
        plans.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        ["Pro", "Premium", "Business"]
    );
    let pro = &plans[0];

    let top_up = f
        .market
        .top_up_with_plan(f.buyer, pro.id, "order-1")
        .await
        .unwrap();
    assert_eq!(top_up.receipt.new_balance, pro.credits);
    assert!(!top_up.receipt.already_applied);
    let subscription = &top_up.subscription;
    assert_eq!(subscription.plan_id, pro.id);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(
        subscription.end_at - subscription.start_at,
        Duration::days(pro.validity_days)
    );

    let replay = f
        .market
        .top_up_with_plan(f.buyer, pro.id, "order-1")
        .await
        .unwrap();
    assert!(replay.receipt.already_applied);
    assert_eq!(replay.receipt.new_balance, pro.credits);
    assert_eq!(replay.subscription.id, subscription.id);

    assert_eq!(f.market.subscriptions(f.buyer).await.unwrap().len(), 1);
    assert_consistent(&f.market, &[f.buyer]).await;
}

#[tokio::test]
async fn test_plan_top_up_rejects_reused_reference_and_unknown_plan() {
    let f = fixture().await;
    let plans = f.market.plans().await.unwrap();
    f.market
        .top_up_with_plan(f.buyer, plans[0].id, "order-7")
        .await
        .unwrap();

    let err = f
        .market
        .top_up_with_plan(f.producer, plans[0].id, "order-7")
        .await
        .unwrap_err();
    assert!(matches!(domain(err), MediationError::Conflict(_)));
    assert_eq!(f.market.account(f.producer).await.unwrap().credits, 0);

    assert_eq!(
        domain(
            f.market
                .top_up_with_plan(f.buyer, 999, "order-8")
                .await
                .unwrap_err()
        ),
        MediationError::NotFound("subscription plan")
    );

    sqlx::query("UPDATE subscription_plans SET active = 0 WHERE id = ?1")
        .bind(plans[1].id)
        .execute(f.market.pool())
        .await
        .unwrap();
    assert_eq!(
        domain(
            f.market
                .top_up_with_plan(f.buyer, plans[1].id, "order-9")
                .await
                .unwrap_err()
        ),
        MediationError::NotFound("subscription plan")
    );
    assert_eq!(f.market.plans().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ledger_history_is_newest_first_and_reconciles() {
    let f = fixture().await;
    fund(&f.market, f.buyer, 3).await;
    let request = f
        .market
        .create_request(f.buyer, f.producer, f.listing, None)
        .await
        .unwrap();
    f.market.accept(request.id, f.producer).await.unwrap();

    let history = f.market.ledger_history(f.buyer).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].direction, Direction::Debit);
    assert_eq!(history[0].reason, LedgerReason::ContactFee);
    assert_eq!(history[0].contact_request_id, Some(request.id));
    assert_eq!(history[1].direction, Direction::Credit);

    let report = f.market.reconcile(f.buyer).await.unwrap();
    assert_eq!(report.balance, 2);
    assert_eq!(report.credited, 3);
    assert_eq!(report.debited, 1);
    assert!(report.consistent);

    assert_eq!(
        domain(f.market.reconcile(999).await.unwrap_err()),
        MediationError::NotFound("account")
    );
}

#[tokio::test]
async fn test_expired_subscriptions_keep_their_credits() {
    let f = fixture().await;
    let plans = f.market.plans().await.unwrap();
    let top_up = f
        .market
        .top_up_with_plan(f.buyer, plans[0].id, "order-42")
        .await
        .unwrap();

    let before_end = top_up.subscription.end_at - Duration::seconds(1);
    assert_eq!(f.market.expire_subscriptions(before_end).await.unwrap(), 0);

    let after_end = top_up.subscription.end_at + Duration::seconds(1);
    assert_eq!(f.market.expire_subscriptions(after_end).await.unwrap(), 1);
    assert_eq!(f.market.expire_subscriptions(after_end).await.unwrap(), 0);

    let subscriptions = f.market.subscriptions(f.buyer).await.unwrap();
    assert_eq!(subscriptions[0].status, SubscriptionStatus::Expired);
    assert_eq!(
        f.market.account(f.buyer).await.unwrap().credits,
        plans[0].credits
    );
}
