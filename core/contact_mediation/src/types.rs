//! # Types
//!
//! Data structures shared by every layer of the contact-mediation system.
//!
//! ## Status enums as text
//!
//! Every status-like enum is persisted as a lowercase snake_case string
//! (`"pending"`, `"contact_fee"`, ...). `text_enum!` generates the
//! `as_str` / `FromStr` / `Display` trio so the storage
//! layer and the JSON API agree on one spelling.
//!
//! ## Contact request lifecycle
//!
//! ```text
//! pending ──accept──► accepted   (terminal, charge-bearing)
//!    │  ▲
//! reject reopen
//!    ▼  │
//! rejected
//! ```
//!
//! The transition rules themselves live in [`crate::lifecycle`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type ListingId = i64;
pub type RequestId = i64;
pub type PlanId = i64;

/// Returned when a stored string does not name any variant of a text enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err($crate::types::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    /// Role of a registered participant.
    Role as "role" {
        Producer => "producer",
        Buyer => "buyer",
        Admin => "admin",
    }
}

text_enum! {
    /// Lifecycle status of a contact request.
    ContactStatus as "contact status" {
        /// Awaiting the producer's decision.
        Pending => "pending",
        /// Producer consented and the buyer was charged. Terminal.
        Accepted => "accepted",
        /// Producer declined. The buyer may reopen.
        Rejected => "rejected",
    }
}

text_enum! {
    /// Admin moderation state of a listing.
    ModerationStatus as "moderation status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Decision an admin may take on a pending listing.
    ModerationDecision as "moderation decision" {
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Direction of a ledger entry relative to the account balance.
    Direction as "ledger direction" {
        Credit => "credit",
        Debit => "debit",
    }
}

text_enum! {
    /// Why a ledger entry was written.
    LedgerReason as "ledger reason" {
        /// Fee for one authorised producer introduction.
        ContactFee => "contact_fee",
        /// Credits bought through the payment collaborator.
        SubscriptionTopup => "subscription_topup",
        /// Manual correction by an operator.
        AdminAdjustment => "admin_adjustment",
    }
}

text_enum! {
    /// Validity state of a purchased subscription.
    SubscriptionStatus as "subscription status" {
        Active => "active",
        Expired => "expired",
    }
}

text_enum! {
    /// Hint returned with a refused disclosure.
    ///
    /// Callers use it for UX only; the gateway contract is binary.
    DenialReason as "denial reason" {
        /// No request at all exists for the triple.
        NoRequest => "no_request",
        /// A request exists but the producer has not answered.
        Pending => "pending",
        /// The producer declined the latest request.
        Rejected => "rejected",
        /// Access was granted but one party is now suspended.
        Suspended => "suspended",
    }
}

impl From<ModerationDecision> for ModerationStatus {
    fn from(decision: ModerationDecision) -> Self {
        match decision {
            ModerationDecision::Approved => ModerationStatus::Approved,
            ModerationDecision::Rejected => ModerationStatus::Rejected,
        }
    }
}

/// A registered participant as seen by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Subject supplied by the identity provider.
    pub identity: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    /// Raw stored contact value. Never serialized; only the disclosure
    /// gateway turns it into a handle.
    #[serde(skip_serializing, default)]
    pub whatsapp: String,
    pub country: String,
    pub region: Option<String>,
    pub credits: i64,
    pub verified: bool,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub identity: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub whatsapp: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// Editable profile fields. Replaces all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub whatsapp: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// What any caller may see about a producer. Carries no contact value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerProfile {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub country: String,
    pub region: Option<String>,
    pub verified: bool,
}

impl From<&Account> for ProducerProfile {
    fn from(account: &Account) -> Self {
        ProducerProfile {
            id: account.id,
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            country: account.country.clone(),
            region: account.region.clone(),
            verified: account.verified,
        }
    }
}

/// A buyer who asked a producer for contact, as shown on the producer's dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestedBuyer {
    pub request_id: RequestId,
    pub buyer_id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub listing_id: ListingId,
    pub listing_name: String,
    pub status: ContactStatus,
    /// Last change of the request.
    pub interaction_at: DateTime<Utc>,
}

/// A product listed by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub producer_id: AccountId,
    pub name: String,
    pub price: Decimal,
    /// Free-text quantity ("50 kg", "3 crates", ...).
    pub quantity: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub moderation_status: ModerationStatus,
    pub hidden: bool,
    pub view_count: i64,
    pub contact_click_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing payload submitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub name: String,
    pub price: Decimal,
    pub quantity: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Mediating record between a buyer's interest and a producer's consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRequest {
    pub id: RequestId,
    pub buyer_id: AccountId,
    pub producer_id: AccountId,
    pub listing_id: ListingId,
    pub message: Option<String>,
    pub status: ContactStatus,
    /// Number of `rejected -> pending` reopenings so far.
    pub reopen_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, by the charge-bearing transition.
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Append-only audit record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: AccountId,
    pub direction: Direction,
    pub amount: i64,
    pub reason: LedgerReason,
    pub contact_request_id: Option<RequestId>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the sign it contributes to the balance.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Reference data: a purchasable credit bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub credits: i64,
    pub validity_days: i64,
    pub active: bool,
}

/// A plan purchase and its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub account_id: AccountId,
    pub plan_id: PlanId,
    pub payment_reference: String,
    pub status: SubscriptionStatus,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Communication handle revealed to an authorised party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub account_id: AccountId,
    pub display_name: String,
    /// Normalised `+<digits>` number.
    pub whatsapp: String,
    /// `https://wa.me/...` link carrying the suggested message.
    pub deep_link: String,
    pub message_template: String,
}

/// Outcome of a contact-fee charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub new_balance: i64,
    /// `true` when a fee for this request had already been recorded.
    pub already_charged: bool,
}

/// Outcome of a credit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub new_balance: i64,
    /// `true` when the same `(reason, reference)` had already been applied.
    pub already_applied: bool,
}

/// Result of accepting a contact request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub request: ContactRequest,
    pub buyer_balance: i64,
    /// Lets the producer open the conversation with the buyer.
    pub buyer_channel: ChannelHandle,
}

/// Aggregate counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub listings_pending: i64,
    pub listings_approved: i64,
    pub listings_rejected: i64,
    pub producers: i64,
    pub buyers: i64,
    pub admins: i64,
    pub requests_pending: i64,
    pub requests_accepted: i64,
    pub requests_rejected: i64,
    pub credits_outstanding: i64,
}
