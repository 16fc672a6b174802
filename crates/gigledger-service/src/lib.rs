//! # gigledger-service
//!
//! The marketplace as one async object: a [`Marketplace`] owns the wallet
//! and the hybrid authenticator and checks the caller's bearer token on
//! every operation.
//!
//! [`config`] loads a [`ServiceConfig`](gigledger_types::ServiceConfig) from
//! JSON plus `GIGLEDGER_*` environment overrides; [`telemetry`] installs the
//! tracing subscriber.

pub mod config;
pub mod marketplace;
pub mod telemetry;

pub use marketplace::{Marketplace, Settlement, bearer_token};
