//! Wallet transactions: the append-only ledger rows.
//!
//! ## Status Machine
//!
//! ```text
//!   ┌─────────┐ picked up ┌────────────┐
//!   │ PENDING ├──────────▶│ PROCESSING │
//!   └──┬───┬──┘           └──┬──────┬──┘
//!      │   │                 │      │
//!      │   └────────┐ ┌──────┘      │
//!      ▼            ▼ ▼             ▼
//!   ┌────────┐   ┌───────────┐
//!   │ FAILED │   │ COMPLETED │
//!   └────────┘   └───────────┘
//! ```
//!
//! Only COMPLETED rows count toward balances. COMPLETED and FAILED are
//! terminal; rows are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Account, Amount, ContractId, GigledgerError, Result, TransactionId};

/// What kind of balance-affecting event a row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds entering the platform from a payment provider.
    Deposit,
    /// Funds leaving the platform to the user's payout method.
    Withdrawal,
    /// Client funds moved into a contract's escrow.
    EscrowHold,
    /// Escrowed funds paid to the freelancer.
    EscrowRelease,
    /// Escrowed funds returned to the client.
    Refund,
    /// Manual correction by an admin.
    SystemAdjustment,
}

impl TransactionType {
    /// Whether rows of this type change the platform's total supply.
    /// Escrow movements only shift funds between accounts.
    #[must_use]
    pub fn changes_supply(self) -> bool {
        matches!(
            self,
            Self::Deposit | Self::Withdrawal | Self::SystemAdjustment
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::EscrowHold => write!(f, "escrow_hold"),
            Self::EscrowRelease => write!(f, "escrow_release"),
            Self::Refund => write!(f, "refund"),
            Self::SystemAdjustment => write!(f, "system_adjustment"),
        }
    }
}

/// Lifecycle of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Can a row move from this status to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing | Self::Completed | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Pending or processing: the row may still complete.
    #[must_use]
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    /// The account this row posts to.
    pub account: Account,
    /// Signed amount: positive credits the account, negative debits it.
    pub amount: Amount,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    /// Payment-provider reference (charge id, payout id). Unique when set.
    pub reference: Option<String>,
    /// Contract this row relates to, for escrow movements.
    pub contract_id: Option<ContractId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// A new row. Description defaults to the type name.
    #[must_use]
    pub fn new(
        account: Account,
        amount: Amount,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            account,
            amount,
            kind,
            status,
            reference: None,
            contract_id: None,
            description: kind.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: Option<&str>) -> Self {
        self.reference = reference.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_contract(mut self, contract_id: ContractId) -> Self {
        self.contract_id = Some(contract_id);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Move to `target`, stamping `updated_at`.
    ///
    /// # Errors
    /// Returns `InvalidTransactionTransition` if the move is not allowed.
    pub fn transition(&mut self, target: TransactionStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(GigledgerError::InvalidTransactionTransition {
                id: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    fn pending_withdrawal() -> WalletTransaction {
        WalletTransaction::new(
            Account::Wallet(UserId::new()),
            Amount::from_minor(-2_500),
            TransactionType::Withdrawal,
            TransactionStatus::Pending,
        )
    }

    #[test]
    fn valid_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        use TransactionStatus::*;
        for target in [Pending, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(target));
            assert!(!Failed.can_transition_to(target));
        }
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn transition_stamps_updated_at() {
        let mut tx = pending_withdrawal();
        let later = tx.created_at + chrono::Duration::seconds(5);
        tx.transition(TransactionStatus::Processing, later).unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(tx.updated_at, later);
    }

    #[test]
    fn completed_cannot_fail() {
        let mut tx = pending_withdrawal();
        tx.transition(TransactionStatus::Completed, Utc::now()).unwrap();
        let err = tx
            .transition(TransactionStatus::Failed, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            GigledgerError::InvalidTransactionTransition { .. }
        ));
        assert!(tx.is_completed());
    }

    #[test]
    fn supply_changing_types() {
        assert!(TransactionType::Deposit.changes_supply());
        assert!(TransactionType::SystemAdjustment.changes_supply());
        assert!(!TransactionType::EscrowHold.changes_supply());
        assert!(!TransactionType::Refund.changes_supply());
    }

    #[test]
    fn json_uses_type_field() {
        let tx = pending_withdrawal().with_reference(Some("po_42"));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "withdrawal");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["amount"], -2_500);
        assert_eq!(json["reference"], "po_42");
    }
}
