//! # gigledger-types
//!
//! Shared types, errors, and configuration for the **GigLedger** wallet and
//! escrow ledger.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`ContractId`], [`TransactionId`], [`SessionId`]
//! - **Money**: [`Amount`] (signed integer minor units)
//! - **Accounts**: [`Account`] (user wallet or contract escrow)
//! - **Users & contracts**: [`User`], [`Role`], [`Contract`]
//! - **Ledger model**: [`WalletTransaction`], [`TransactionType`], [`TransactionStatus`]
//! - **Escrow model**: [`EscrowAccount`], [`EscrowStatus`]
//! - **Sessions**: [`Session`], [`AuthSource`]
//! - **Configuration**: [`ServiceConfig`], [`WalletConfig`], [`AuthConfig`]
//! - **Errors**: [`GigledgerError`] with `GL_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod config;
pub mod constants;
pub mod contract;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod money;
pub mod session;
pub mod transaction;
pub mod user;

// Re-export all primary types at crate root for ergonomic imports:
//   use gigledger_types::{Amount, User, WalletTransaction, ...};

pub use account::*;
pub use config::*;
pub use contract::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use money::*;
pub use session::*;
pub use transaction::*;
pub use user::*;

// Constants are accessed via `gigledger_types::constants::FOO`
// (not re-exported to avoid name collisions).
