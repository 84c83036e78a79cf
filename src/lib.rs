//! Trust infrastructure for inter-university student mobility.
//!
//! Universities certify credentials on an append-only ledger held by a trust
//! registry; students and universities talk over protected channels and every
//! protocol run is checked hop by hop for freshness and nonce correspondence.

pub mod academic;
pub mod actors;
pub mod certificate;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod merkle;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod store;

pub use error::{Error, Result};
