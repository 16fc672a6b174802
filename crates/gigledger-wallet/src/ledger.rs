//! Ledger row helpers: building double-entry postings, summing accounts,
//! and the sign rules every row must follow.
//!
//! Rows are append-only. Balances are always derivable from them:
//! ```text
//! balance(account) = Σ amount  over completed rows posted to account
//! ```

use gigledger_types::{
    Account, Amount, ContractId, GigledgerError, Result, TransactionStatus, TransactionType,
    WalletTransaction,
};

/// Signed sum of the completed rows in `rows`.
pub fn completed_sum<'a, I>(rows: I) -> Result<Amount>
where
    I: IntoIterator<Item = &'a WalletTransaction>,
{
    Amount::checked_sum(
        rows.into_iter()
            .filter(|tx| tx.is_completed())
            .map(|tx| tx.amount),
    )
}

/// Total reserved by withdrawals that may still complete. Returned as a
/// positive amount.
pub fn open_withdrawals<'a, I>(rows: I) -> Result<Amount>
where
    I: IntoIterator<Item = &'a WalletTransaction>,
{
    Amount::checked_sum(
        rows.into_iter()
            .filter(|tx| tx.kind == TransactionType::Withdrawal && tx.status.is_open())
            .map(|tx| tx.amount),
    )?
    .checked_neg()
}

/// Two completed rows moving `amount` from `from` to `to` for a contract.
///
/// The debit row carries `-amount`, the credit row `+amount`, so the pair
/// nets to zero.
pub fn transfer(
    from: Account,
    to: Account,
    amount: Amount,
    kind: TransactionType,
    contract_id: ContractId,
    description: &str,
) -> Result<[WalletTransaction; 2]> {
    let amount = amount.ensure_positive(&kind.to_string())?;
    let debit = WalletTransaction::new(from, amount.checked_neg()?, kind, TransactionStatus::Completed)
        .with_contract(contract_id)
        .with_description(description);
    let credit = WalletTransaction::new(to, amount, kind, TransactionStatus::Completed)
        .with_contract(contract_id)
        .with_description(description);
    Ok([debit, credit])
}

/// Check that a row's sign, account kind and contract link fit its type.
///
/// | type              | wallet row | escrow row | contract |
/// |-------------------|------------|------------|----------|
/// | deposit           | > 0        | —          | —        |
/// | withdrawal        | < 0        | —          | —        |
/// | escrow_hold       | < 0        | > 0        | required |
/// | escrow_release    | > 0        | < 0        | required |
/// | refund            | > 0        | < 0        | required |
/// | system_adjustment | ≠ 0        | —          | —        |
pub fn validate_row(tx: &WalletTransaction) -> Result<()> {
    let sign_ok = match (tx.kind, tx.account) {
        (TransactionType::Deposit, Account::Wallet(_)) => tx.amount.is_positive(),
        (TransactionType::Withdrawal, Account::Wallet(_))
        | (TransactionType::EscrowHold, Account::Wallet(_))
        | (
            TransactionType::EscrowRelease | TransactionType::Refund,
            Account::Escrow(_),
        ) => tx.amount.is_negative(),
        (TransactionType::EscrowHold, Account::Escrow(_))
        | (
            TransactionType::EscrowRelease | TransactionType::Refund,
            Account::Wallet(_),
        ) => tx.amount.is_positive(),
        (TransactionType::SystemAdjustment, Account::Wallet(_)) => !tx.amount.is_zero(),
        (
            TransactionType::Deposit
            | TransactionType::Withdrawal
            | TransactionType::SystemAdjustment,
            Account::Escrow(_),
        ) => {
            return Err(invalid_row(tx, "wallet-only type posted to an escrow account"));
        }
    };
    if !sign_ok {
        return Err(invalid_row(tx, "amount has the wrong sign"));
    }

    let needs_contract = !tx.kind.changes_supply();
    if needs_contract && tx.contract_id.is_none() {
        return Err(invalid_row(tx, "escrow movement without a contract"));
    }
    if let Account::Escrow(contract) = tx.account {
        if tx.contract_id != Some(contract) {
            return Err(invalid_row(tx, "escrow row linked to a different contract"));
        }
    }
    Ok(())
}

fn invalid_row(tx: &WalletTransaction, reason: &str) -> GigledgerError {
    GigledgerError::InvariantViolation {
        reason: format!(
            "{} ({} {} on {}): {reason}",
            tx.id, tx.kind, tx.amount, tx.account
        ),
    }
}
