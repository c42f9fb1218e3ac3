//! # Lifecycle rules
//!
//! Pure transition tables for contact requests and listing moderation.
//! Storage re-applies the same guards as conditional updates, so a rule that
//! passes here can still lose a race and surface as
//! [`MediationError::InvalidTransition`] from the store.
//!
//! | Action   | Allowed from          | Result     | Billing |
//! |----------|-----------------------|------------|---------|
//! | `accept` | `pending`             | `accepted` | 1 credit|
//! | `reject` | `pending`             | `rejected` | none    |
//! | `reopen` | `rejected`            | `pending`  | none    |
//! | `delete` | `pending`, `rejected` | removed    | none    |

use crate::errors::{MediationError, Result};
use crate::types::{text_enum, ContactStatus, ModerationDecision, ModerationStatus};

text_enum! {
    /// Something a participant can do to a contact request.
    ContactAction as "contact action" {
        Accept => "accept",
        Reject => "reject",
        Reopen => "reopen",
        Delete => "delete",
    }
}

impl ContactAction {
    /// Statuses from which this action is legal.
    pub fn allowed_from(self) -> &'static [ContactStatus] {
        match self {
            Self::Accept | Self::Reject => &[ContactStatus::Pending],
            Self::Reopen => &[ContactStatus::Rejected],
            Self::Delete => &[ContactStatus::Pending, ContactStatus::Rejected],
        }
    }

    /// Only acceptance debits the buyer.
    pub fn is_charge_bearing(self) -> bool {
        self == Self::Accept
    }
}

/// What a legal action does to the request row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved(ContactStatus),
    Removed,
}

impl ContactStatus {
    /// Apply `action` to a request currently in `self`.
    pub fn apply(self, action: ContactAction) -> Result<Transition> {
        if !action.allowed_from().contains(&self) {
            return Err(MediationError::InvalidTransition { from: self, action });
        }
        Ok(match action {
            ContactAction::Accept => Transition::Moved(ContactStatus::Accepted),
            ContactAction::Reject => Transition::Moved(ContactStatus::Rejected),
            ContactAction::Reopen => Transition::Moved(ContactStatus::Pending),
            ContactAction::Delete => Transition::Removed,
        })
    }

    /// `pending` and `accepted` requests block a new request for the same triple.
    pub fn is_active(self) -> bool {
        matches!(self, ContactStatus::Pending | ContactStatus::Accepted)
    }
}

/// Cap on `rejected -> pending` reopenings of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReopenPolicy {
    /// `0` disables the cap.
    pub max_reopens: u32,
}

impl ReopenPolicy {
    pub const UNLIMITED: ReopenPolicy = ReopenPolicy { max_reopens: 0 };

    pub fn check(&self, reopen_count: i64) -> Result<()> {
        if self.max_reopens > 0 && reopen_count >= i64::from(self.max_reopens) {
            return Err(MediationError::RetryLimitExceeded {
                limit: self.max_reopens,
            });
        }
        Ok(())
    }
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        ReopenPolicy { max_reopens: 3 }
    }
}

/// Effect of a moderation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationOutcome {
    Changed(ModerationStatus),
    /// The decision was already in force.
    Unchanged,
}

impl ModerationStatus {
    /// Decisions are taken once, from `pending`. Repeating the standing
    /// decision is a no-op; reversing it is refused.
    pub fn decide(self, decision: ModerationDecision) -> Result<ModerationOutcome> {
        let to = ModerationStatus::from(decision);
        match self {
            ModerationStatus::Pending => Ok(ModerationOutcome::Changed(to)),
            current if current == to => Ok(ModerationOutcome::Unchanged),
            from => Err(MediationError::InvalidModeration { from, to }),
        }
    }

    pub fn is_public(self) -> bool {
        self == ModerationStatus::Approved
    }
}
