//! Ledger accounts.
//!
//! Every ledger row posts to exactly one account: a user's wallet or a
//! contract's escrow. Escrow movements are written as a pair of rows, one
//! per side, so they net to zero and the only rows that change total supply
//! are deposits, withdrawals and system adjustments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContractId, UserId};

/// The account a ledger row posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Account {
    /// A user's spendable wallet balance.
    Wallet(UserId),
    /// The escrow account of a contract.
    Escrow(ContractId),
}

impl Account {
    /// The wallet owner, if this is a wallet account.
    #[must_use]
    pub fn wallet_owner(&self) -> Option<UserId> {
        match self {
            Self::Wallet(user) => Some(*user),
            Self::Escrow(_) => None,
        }
    }

    /// The contract, if this is an escrow account.
    #[must_use]
    pub fn escrow_contract(&self) -> Option<ContractId> {
        match self {
            Self::Escrow(contract) => Some(*contract),
            Self::Wallet(_) => None,
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet(user) => write!(f, "wallet:{user}"),
            Self::Escrow(contract) => write!(f, "escrow:{}", contract.0),
        }
    }
}
