//! Ledger arithmetic.
//!
//! The account row's `credits` column is the authoritative balance; the
//! ledger is the audit trail. [`reconcile`] recomputes the balance from the
//! trail so the two can be compared. It is never used on the read path.

use serde::{Deserialize, Serialize};

use crate::types::{Direction, LedgerEntry};

/// Credits debited for one authorised introduction.
pub const CONTACT_FEE: i64 = 1;

/// Every account starts with an empty balance; credits only arrive through
/// the payment collaborator.
pub const INITIAL_BALANCE: i64 = 0;

/// Ledger totals for one account compared with its stored balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub balance: i64,
    pub credited: i64,
    pub debited: i64,
    /// `INITIAL_BALANCE + credited - debited`.
    pub expected: i64,
    pub consistent: bool,
}

/// Compare a stored balance with the sum of its ledger entries.
pub fn reconcile<'a, I>(balance: i64, entries: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let (credited, debited) = entries
        .into_iter()
        .fold((0i64, 0i64), |(c, d), entry| match entry.direction {
            Direction::Credit => (c + entry.amount, d),
            Direction::Debit => (c, d + entry.amount),
        });
    let expected = INITIAL_BALANCE + credited - debited;
    Reconciliation {
        balance,
        credited,
        debited,
        expected,
        consistent: expected == balance,
    }
}
