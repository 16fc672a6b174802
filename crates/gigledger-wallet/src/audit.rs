//! Whole-ledger audit.
//!
//! Recomputes every stored balance from the ledger rows and checks that
//! money was neither created nor destroyed:
//!
//! ```text
//! Σ wallet balances + Σ escrow amounts
//!     = Σ completed (deposit + withdrawal + system_adjustment) rows
//! ```
//!
//! Escrow movements post a debit and a credit of equal size, so they only
//! shift money between accounts and never change the right-hand side.

use std::collections::{HashMap, HashSet};

use gigledger_types::{Account, Amount, GigledgerError, Result};
use serde::Serialize;

use crate::ledger;
use crate::store::LedgerStore;

/// Totals seen by a successful audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub wallet_total: Amount,
    pub escrow_total: Amount,
    /// Completed deposits − withdrawals + adjustments.
    pub expected_supply: Amount,
    pub users_checked: usize,
    pub escrows_checked: usize,
    pub rows_checked: usize,
}

fn violation(reason: String) -> GigledgerError {
    GigledgerError::InvariantViolation { reason }
}

/// Check every ledger invariant against `store`.
///
/// # Errors
/// The first violation found, as `InvariantViolation`.
pub fn verify<S: LedgerStore + ?Sized>(store: &S) -> Result<AuditReport> {
    let rows = store.transactions()?;

    let mut references = HashSet::new();
    let mut sums: HashMap<Account, Amount> = HashMap::new();
    let mut expected_supply = Amount::ZERO;
    for tx in &rows {
        ledger::validate_row(tx)?;
        if let Some(reference) = &tx.reference {
            if !references.insert(reference.as_str()) {
                return Err(violation(format!(
                    "external reference {reference} is attached to more than one row"
                )));
            }
        }
        if !tx.is_completed() {
            continue;
        }
        let sum = sums.entry(tx.account).or_default();
        *sum = sum.checked_add(tx.amount)?;
        if tx.kind.changes_supply() {
            expected_supply = expected_supply.checked_add(tx.amount)?;
        }
    }

    let users = store.users()?;
    let mut wallet_total = Amount::ZERO;
    for user in &users {
        if user.wallet_balance.is_negative() {
            return Err(violation(format!("wallet of {} is negative", user.id)));
        }
        let derived = sums
            .remove(&Account::Wallet(user.id))
            .unwrap_or_default();
        if derived != user.wallet_balance {
            return Err(violation(format!(
                "wallet of {} holds {} but its completed rows sum to {derived}",
                user.id, user.wallet_balance
            )));
        }
        wallet_total = wallet_total.checked_add(user.wallet_balance)?;
    }

    let escrows = store.escrows()?;
    let mut escrow_total = Amount::ZERO;
    for escrow in &escrows {
        if escrow.amount.is_negative() {
            return Err(violation(format!(
                "escrow for {} is negative",
                escrow.contract_id
            )));
        }
        if escrow.status.is_terminal() && !escrow.amount.is_zero() {
            return Err(violation(format!(
                "escrow for {} is {} but still holds {}",
                escrow.contract_id, escrow.status, escrow.amount
            )));
        }
        let derived = sums
            .remove(&Account::Escrow(escrow.contract_id))
            .unwrap_or_default();
        if derived != escrow.amount {
            return Err(violation(format!(
                "escrow for {} holds {} but its completed rows sum to {derived}",
                escrow.contract_id, escrow.amount
            )));
        }
        escrow_total = escrow_total.checked_add(escrow.amount)?;
    }

    // Whatever is left was posted to an account with no stored balance.
    if let Some((account, sum)) = sums.iter().find(|(_, sum)| !sum.is_zero()) {
        return Err(violation(format!(
            "{account} has completed rows summing to {sum} but no stored balance"
        )));
    }

    let total = wallet_total.checked_add(escrow_total)?;
    if total != expected_supply {
        return Err(violation(format!(
            "wallets ({wallet_total}) + escrows ({escrow_total}) != supply ({expected_supply})"
        )));
    }

    let report = AuditReport {
        wallet_total,
        escrow_total,
        expected_supply,
        users_checked: users.len(),
        escrows_checked: escrows.len(),
        rows_checked: rows.len(),
    };
    tracing::debug!(
        wallets = %report.wallet_total,
        escrows = %report.escrow_total,
        rows = report.rows_checked,
        "Ledger audit passed"
    );
    Ok(report)
}
