//! Assertion helpers for the properties every mediation scenario must keep.
//!
//! Compiled for this crate's own tests and, through the `testutils` feature,
//! for the backend's scenario suites.

use crate::ledger::{reconcile, CONTACT_FEE};
use crate::lifecycle::ContactAction;
use crate::types::{ContactRequest, ContactStatus, Direction, LedgerEntry, LedgerReason};

/// INV-1: a stored balance is never negative.
pub fn assert_balance_non_negative(account_id: i64, balance: i64) {
    assert!(
        balance >= 0,
        "INV-1 violated: account {account_id} has negative balance {balance}"
    );
}

/// INV-2: the stored balance equals the initial balance plus credits minus debits.
pub fn assert_reconciled(account_id: i64, balance: i64, entries: &[LedgerEntry]) {
    let own: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| e.account_id == account_id)
        .collect();
    let report = reconcile(balance, own);
    assert!(
        report.consistent,
        "INV-2 violated: account {account_id} balance {} != expected {} (credited {}, debited {})",
        report.balance, report.expected, report.credited, report.debited
    );
}

/// INV-3: an accepted request carries exactly one contact-fee debit; any
/// other request carries none.
pub fn assert_single_contact_fee(request: &ContactRequest, entries: &[LedgerEntry]) {
    let fees: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| e.reason == LedgerReason::ContactFee && e.contact_request_id == Some(request.id))
        .collect();
    let expected = usize::from(request.status == ContactStatus::Accepted);
    assert_eq!(
        fees.len(),
        expected,
        "INV-3 violated: request {} ({}) has {} contact-fee entries",
        request.id,
        request.status,
        fees.len()
    );
    for fee in fees {
        assert_eq!(fee.direction, Direction::Debit, "INV-3 violated: fee is not a debit");
        assert_eq!(fee.amount, CONTACT_FEE, "INV-3 violated: fee amount {}", fee.amount);
        assert_eq!(
            fee.account_id, request.buyer_id,
            "INV-3 violated: fee charged to account {} instead of buyer {}",
            fee.account_id, request.buyer_id
        );
    }
}

/// INV-4: an accepted request has its acceptance time recorded, others do not.
pub fn assert_acceptance_stamped(request: &ContactRequest) {
    assert_eq!(
        request.accepted_at.is_some(),
        request.status == ContactStatus::Accepted,
        "INV-4 violated: request {} is {} with accepted_at {:?}",
        request.id,
        request.status,
        request.accepted_at
    );
}

/// INV-5: `action` moved a request from `from` to `to` legally.
pub fn assert_valid_contact_transition(from: ContactStatus, action: ContactAction, to: ContactStatus) {
    let valid = matches!(
        (from, action, to),
        (ContactStatus::Pending, ContactAction::Accept, ContactStatus::Accepted)
            | (ContactStatus::Pending, ContactAction::Reject, ContactStatus::Rejected)
            | (ContactStatus::Rejected, ContactAction::Reopen, ContactStatus::Pending)
    );
    assert!(
        valid,
        "INV-5 violated: invalid transition {from} --{action}--> {to}"
    );
}

/// Run every request-level invariant.
pub fn assert_all_request_invariants(request: &ContactRequest, entries: &[LedgerEntry]) {
    assert_single_contact_fee(request, entries);
    assert_acceptance_stamped(request);
}
