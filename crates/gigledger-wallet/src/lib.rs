//! # gigledger-wallet
//!
//! Wallet balances, per-contract escrow, and the append-only transaction
//! ledger.
//!
//! ## Architecture
//!
//! 1. **LedgerStore**: storage interface; [`MemoryStore`] keeps everything in maps
//! 2. **WriteBatch**: every operation stages all of its writes and commits once
//! 3. **Wallet**: deposits, withdrawals, adjustments and balance queries
//! 4. **Escrow**: hold, release, refund, dispute and resolution (on [`Wallet`])
//! 5. **Authority**: who may move escrowed funds
//! 6. **Audit**: recomputes every ledger invariant from the rows
//!
//! ## Operation Flow
//!
//! ```text
//! caller → Wallet.op() → authority check → read store → stage WriteBatch
//!        → LedgerStore.commit() (all-or-nothing) → [audit]
//! ```
//!
//! No operation writes to the store more than once, so a failure at any
//! step leaves balances and ledger untouched.

pub mod audit;
pub mod authority;
pub mod escrow;
pub mod idempotency;
pub mod ledger;
pub mod store;
pub mod wallet;

pub use audit::AuditReport;
pub use authority::EscrowAction;
pub use idempotency::IdempotencyGuard;
pub use store::{LedgerStore, MemoryStore, Write, WriteBatch};
pub use wallet::Wallet;
