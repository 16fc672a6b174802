//! Per-contract escrow accounts.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  drained by release   ┌──────────┐
//!   │ ACTIVE ├──────────────────────▶│ RELEASED │
//!   └─┬────┬─┘                       └──────────┘
//!     │    │ drained by refund       ┌──────────┐
//!     │    └────────────────────────▶│ REFUNDED │
//!     │ dispute opened               └──────────┘
//!     ▼                                    ▲
//!   ┌──────────┐  admin resolution         │
//!   │ DISPUTED ├───────────────────────────┘ (or RELEASED)
//!   └──────────┘
//! ```
//!
//! RELEASED and REFUNDED are terminal: the escrow holds zero and accepts
//! no further holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, ContractId, GigledgerError, Result, UserId};

/// Status of a contract's escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Holding funds; accepts holds, releases and refunds.
    Active,
    /// Fully paid out to the freelancer.
    Released,
    /// Fully returned to the client.
    Refunded,
    /// Frozen pending admin resolution.
    Disputed,
}

impl EscrowStatus {
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Released | Self::Refunded | Self::Disputed)
                | (Self::Disputed, Self::Released | Self::Refunded)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Released => write!(f, "released"),
            Self::Refunded => write!(f, "refunded"),
            Self::Disputed => write!(f, "disputed"),
        }
    }
}

/// The escrow account of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub contract_id: ContractId,
    pub client_id: UserId,
    pub freelancer_id: UserId,
    /// Amount currently held.
    pub amount: Amount,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowAccount {
    /// A fresh, empty, active escrow.
    #[must_use]
    pub fn open(contract_id: ContractId, client_id: UserId, freelancer_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            contract_id,
            client_id,
            freelancer_id,
            amount: Amount::ZERO,
            status: EscrowStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fail unless the escrow is in `expected`.
    ///
    /// # Errors
    /// Returns `EscrowWrongStatus`.
    pub fn ensure_status(&self, expected: EscrowStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(GigledgerError::EscrowWrongStatus {
                contract: self.contract_id,
                status: self.status,
                expected,
            })
        }
    }

    /// Move to `target`, stamping `updated_at`.
    ///
    /// # Errors
    /// Returns `InvalidEscrowTransition` if the move is not allowed.
    pub fn transition(&mut self, target: EscrowStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(GigledgerError::InvalidEscrowTransition {
                contract: self.contract_id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = at;
        Ok(())
    }
}
