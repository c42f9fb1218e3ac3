//! AgroConnect marketplace backend.
//!
//! Persists the `contact_mediation` model in SQLite and serves it over a
//! JSON API. Contact requests, credit charges and disclosures each run as
//! one bounded unit of work through [`service::Marketplace`].

pub mod accounts;
pub mod api;
pub mod config;
pub mod contacts;
pub mod credits;
pub mod db;
pub mod disclosure;
pub mod errors;
pub mod expiry;
pub mod identity;
pub mod listings;
pub mod moderation;
pub mod plans;
pub mod service;
pub mod stats;


#[cfg(test)]
mod test_contact_flow;
#[cfg(test)]
mod test_credits;
#[cfg(test)]
mod test_disclosure;
