//! Per-contract escrow: hold, release, refund and disputes.
//!
//! ## Lifecycle
//!
//! ```text
//! hold ──→ Active ──release to zero──→ Released
//!            │  └───refund to zero───→ Refunded
//!            └─open_dispute─→ Disputed ─resolve─→ Released | Refunded
//! ```
//!
//! Every movement writes a debit row and a credit row with the same
//! contract id, so the escrow account and the wallets stay derivable from
//! the ledger.

use chrono::Utc;
use gigledger_types::{
    Account, Amount, ContractId, EscrowAccount, EscrowStatus, GigledgerError, Result,
    TransactionType, UserId,
};

use crate::authority::{self, EscrowAction};
use crate::ledger;
use crate::store::{LedgerStore, WriteBatch};
use crate::wallet::Wallet;

impl<S: LedgerStore> Wallet<S> {
    /// Move `amount` from the client's wallet into the contract's escrow,
    /// opening the escrow account on first use.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is not positive
    /// - `Unauthorized` unless `actor` is the contract's client
    /// - `EscrowWrongStatus` if the escrow is no longer active
    /// - `InsufficientBalance` if the client's available balance is short
    pub fn hold(
        &mut self,
        actor: UserId,
        contract_id: ContractId,
        amount: Amount,
    ) -> Result<EscrowAccount> {
        amount.ensure_positive("escrow hold")?;
        let contract = self.store.require_contract(contract_id)?;
        let acting = self.store.require_user(actor)?;
        authority::authorize(&acting, &contract, EscrowAction::Hold)?;

        let current = self.store.escrow(contract_id)?;
        let mut escrow = current.clone().unwrap_or_else(|| {
            EscrowAccount::open(contract_id, contract.client_id, contract.freelancer_id)
        });
        escrow.ensure_status(EscrowStatus::Active)?;

        let client = self.store.require_user(contract.client_id)?;
        let available = self.available_balance(client.id)?;
        if available < amount {
            return Err(GigledgerError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        let balance = client.wallet_balance.checked_sub(amount)?;

        let rows = ledger::transfer(
            Account::Wallet(client.id),
            Account::Escrow(contract_id),
            amount,
            TransactionType::EscrowHold,
            contract_id,
            &format!("escrow hold for {}", contract.title),
        )?;
        escrow.amount = escrow.amount.checked_add(amount)?;
        escrow.updated_at = Utc::now();

        let mut batch = WriteBatch::new();
        for row in rows {
            batch.insert_transaction(row);
        }
        batch
            .set_balance(client.id, client.wallet_balance, balance)
            .put_escrow(escrow.clone(), current);
        self.commit(batch)?;

        tracing::info!(
            contract = %contract_id,
            client = %client.id,
            amount = %amount,
            held = %escrow.amount,
            "Escrow funded"
        );
        Ok(escrow)
    }

    /// Pay up to the held amount to the freelancer. The escrow becomes
    /// `Released` once it reaches zero.
    ///
    /// # Errors
    /// `Unauthorized`, `EscrowNotFound`, `EscrowWrongStatus` (including
    /// while disputed), `EscrowExceeded`.
    pub fn release(
        &mut self,
        actor: UserId,
        contract_id: ContractId,
        amount: Amount,
    ) -> Result<EscrowAccount> {
        self.pay_out(actor, contract_id, amount, EscrowAction::Release)
    }

    /// Return up to the held amount to the client. The escrow becomes
    /// `Refunded` once it reaches zero.
    pub fn refund(
        &mut self,
        actor: UserId,
        contract_id: ContractId,
        amount: Amount,
    ) -> Result<EscrowAccount> {
        self.pay_out(actor, contract_id, amount, EscrowAction::Refund)
    }

    fn pay_out(
        &mut self,
        actor: UserId,
        contract_id: ContractId,
        amount: Amount,
        action: EscrowAction,
    ) -> Result<EscrowAccount> {
        let (kind, closed, to_freelancer) = match action {
            EscrowAction::Release => (
                TransactionType::EscrowRelease,
                EscrowStatus::Released,
                true,
            ),
            EscrowAction::Refund => (TransactionType::Refund, EscrowStatus::Refunded, false),
            EscrowAction::Hold | EscrowAction::OpenDispute | EscrowAction::ResolveDispute => {
                return Err(GigledgerError::InvariantViolation {
                    reason: format!("{action} does not pay out of escrow"),
                });
            }
        };
        amount.ensure_positive(&kind.to_string())?;

        let contract = self.store.require_contract(contract_id)?;
        let acting = self.store.require_user(actor)?;
        authority::authorize(&acting, &contract, action)?;

        let current = self.store.require_escrow(contract_id)?;
        current.ensure_status(EscrowStatus::Active)?;
        if amount > current.amount {
            return Err(GigledgerError::EscrowExceeded {
                contract: contract_id,
                requested: amount,
                held: current.amount,
            });
        }

        let payee_id = if to_freelancer {
            contract.freelancer_id
        } else {
            contract.client_id
        };
        let payee = self.store.require_user(payee_id)?;
        let balance = payee.wallet_balance.checked_add(amount)?;

        let rows = ledger::transfer(
            Account::Escrow(contract_id),
            Account::Wallet(payee_id),
            amount,
            kind,
            contract_id,
            &format!("{kind} for {}", contract.title),
        )?;

        let now = Utc::now();
        let mut escrow = current.clone();
        escrow.amount = escrow.amount.checked_sub(amount)?;
        escrow.updated_at = now;
        if escrow.amount.is_zero() {
            escrow.transition(closed, now)?;
        }

        let mut batch = WriteBatch::new();
        for row in rows {
            batch.insert_transaction(row);
        }
        batch
            .set_balance(payee_id, payee.wallet_balance, balance)
            .put_escrow(escrow.clone(), Some(current));
        self.commit(batch)?;

        tracing::info!(
            contract = %contract_id,
            actor = %actor,
            payee = %payee_id,
            kind = %kind,
            amount = %amount,
            remaining = %escrow.amount,
            status = %escrow.status,
            "Escrow paid out"
        );
        Ok(escrow)
    }

    /// Freeze an active escrow until an admin resolves it.
    ///
    /// # Errors
    /// `Unauthorized` unless `actor` is the client or freelancer,
    /// `InvalidEscrowTransition` unless the escrow is active.
    pub fn open_dispute(&mut self, actor: UserId, contract_id: ContractId) -> Result<EscrowAccount> {
        let contract = self.store.require_contract(contract_id)?;
        let acting = self.store.require_user(actor)?;
        authority::authorize(&acting, &contract, EscrowAction::OpenDispute)?;

        let current = self.store.require_escrow(contract_id)?;
        let mut escrow = current.clone();
        escrow.transition(EscrowStatus::Disputed, Utc::now())?;

        let mut batch = WriteBatch::new();
        batch.put_escrow(escrow.clone(), Some(current));
        self.commit(batch)?;

        tracing::warn!(
            contract = %contract_id,
            actor = %actor,
            held = %escrow.amount,
            "Escrow disputed"
        );
        Ok(escrow)
    }

    /// Settle a dispute: `to_freelancer` goes to the freelancer, the rest
    /// back to the client. The escrow ends `Released` if the freelancer got
    /// anything, `Refunded` otherwise.
    ///
    /// # Errors
    /// `Unauthorized` unless `actor` is an admin, `EscrowWrongStatus`
    /// unless disputed, `InvalidAmount` / `EscrowExceeded` for a split
    /// outside `0..=held`.
    pub fn resolve_dispute(
        &mut self,
        actor: UserId,
        contract_id: ContractId,
        to_freelancer: Amount,
    ) -> Result<EscrowAccount> {
        let contract = self.store.require_contract(contract_id)?;
        let acting = self.store.require_user(actor)?;
        authority::authorize(&acting, &contract, EscrowAction::ResolveDispute)?;

        let current = self.store.require_escrow(contract_id)?;
        current.ensure_status(EscrowStatus::Disputed)?;
        if to_freelancer.is_negative() {
            return Err(GigledgerError::InvalidAmount {
                reason: format!("dispute payout must not be negative, got {to_freelancer}"),
            });
        }
        if to_freelancer > current.amount {
            return Err(GigledgerError::EscrowExceeded {
                contract: contract_id,
                requested: to_freelancer,
                held: current.amount,
            });
        }
        let to_client = current.amount.checked_sub(to_freelancer)?;

        let mut batch = WriteBatch::new();
        let parts = [
            (
                contract.freelancer_id,
                to_freelancer,
                TransactionType::EscrowRelease,
            ),
            (contract.client_id, to_client, TransactionType::Refund),
        ];
        for (payee_id, amount, kind) in parts {
            if amount.is_zero() {
                continue;
            }
            let payee = self.store.require_user(payee_id)?;
            let balance = payee.wallet_balance.checked_add(amount)?;
            let rows = ledger::transfer(
                Account::Escrow(contract_id),
                Account::Wallet(payee_id),
                amount,
                kind,
                contract_id,
                &format!("dispute resolution for {}", contract.title),
            )?;
            for row in rows {
                batch.insert_transaction(row);
            }
            batch.set_balance(payee_id, payee.wallet_balance, balance);
        }

        let now = Utc::now();
        let mut escrow = current.clone();
        escrow.amount = Amount::ZERO;
        escrow.updated_at = now;
        let outcome = if to_freelancer.is_positive() {
            EscrowStatus::Released
        } else {
            EscrowStatus::Refunded
        };
        escrow.transition(outcome, now)?;
        batch.put_escrow(escrow.clone(), Some(current));
        self.commit(batch)?;

        tracing::info!(
            contract = %contract_id,
            actor = %actor,
            to_freelancer = %to_freelancer,
            to_client = %to_client,
            status = %escrow.status,
            "Dispute resolved"
        );
        Ok(escrow)
    }
}
