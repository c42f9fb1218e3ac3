//! # AgroConnect contact mediation
//!
//! Domain rules for introducing a buyer to a producer for one listing and
//! billing that introduction exactly once.
//!
//! | Concern            | Module / item                                  |
//! |--------------------|------------------------------------------------|
//! | Data model         | [`types`]                                      |
//! | Error taxonomy     | [`MediationError`]                             |
//! | Request lifecycle  | [`lifecycle::ContactAction`], [`ContactStatus::apply`] |
//! | Moderation         | [`ModerationStatus::decide`]                   |
//! | Ledger arithmetic  | [`ledger::reconcile`], [`ledger::CONTACT_FEE`] |
//! | Contact handles    | [`channel`]                                    |
//!
//! ## Architecture
//!
//! This crate performs no I/O. The `marketplace` backend persists the model,
//! enforces the same rules as conditional writes inside one database
//! transaction per operation, and exposes them over HTTP.

pub mod channel;
pub mod errors;
pub mod ledger;
pub mod lifecycle;
pub mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod invariants;

pub use errors::{MediationError, Result};
pub use lifecycle::{ContactAction, ModerationOutcome, ReopenPolicy, Transition};
pub use types::*;
