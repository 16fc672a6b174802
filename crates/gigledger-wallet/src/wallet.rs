//! Wallet balances and the single-row ledger operations.
//!
//! Every operation reads what it needs, builds one [`WriteBatch`] and
//! commits it once. A validation failure at any step returns before the
//! commit, so balances and the ledger are left untouched.

use chrono::Utc;
use gigledger_types::{
    Account, Amount, Contract, ContractId, EscrowAccount, GigledgerError, Result,
    TransactionId, TransactionStatus, TransactionType, User, UserId, WalletConfig,
    WalletTransaction,
};

use crate::audit;
use crate::authority;
use crate::idempotency::IdempotencyGuard;
use crate::ledger;
use crate::store::{LedgerStore, WriteBatch};

/// Wallet and escrow operations over a [`LedgerStore`].
///
/// Escrow operations live in [`crate::escrow`].
pub struct Wallet<S: LedgerStore> {
    pub(crate) store: S,
    config: WalletConfig,
    requests: IdempotencyGuard,
}

impl<S: LedgerStore> Wallet<S> {
    #[must_use]
    pub fn new(store: S, config: WalletConfig) -> Self {
        let requests = IdempotencyGuard::new(config.idempotency_cache_size.max(1));
        Self {
            store,
            config,
            requests,
        }
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Commit `batch`, then re-audit the whole ledger when
    /// `audit_after_commit` is set.
    ///
    /// # Errors
    /// Store errors leave nothing applied. A failed audit is reported as
    /// `AuditFailedAfterCommit`: the batch is already in the store.
    pub(crate) fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        let writes = batch.len();
        self.store.commit(batch)?;
        tracing::trace!(writes, "Batch committed");
        if self.config.audit_after_commit {
            if let Err(err) = audit::verify(&self.store) {
                tracing::error!(error = %err, "Ledger audit failed after commit");
                return Err(GigledgerError::AuditFailedAfterCommit {
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run `op` at most once per request key.
    ///
    /// A key that already succeeded is rejected with `DuplicateRequest`.
    /// The key is only recorded when `op` succeeds, so a failed call can be
    /// retried with the same key. `None` runs `op` unguarded.
    pub fn idempotent<T>(
        &mut self,
        key: Option<&str>,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let Some(key) = key else {
            return op(self);
        };
        self.requests.check(key)?;
        match op(self) {
            Ok(out) => {
                self.requests.record(key);
                Ok(out)
            }
            Err(err) => {
                if err.is_committed() {
                    self.requests.record(key);
                }
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Users and contracts
    // -----------------------------------------------------------------------

    /// Add a user with an empty wallet.
    ///
    /// # Errors
    /// `DuplicateUser` if the email or external subject is taken.
    pub fn register_user(&mut self, mut user: User) -> Result<User> {
        user.wallet_balance = Amount::ZERO;
        let mut batch = WriteBatch::new();
        batch.insert_user(user.clone());
        self.commit(batch)?;
        tracing::info!(user = %user.id, role = %user.role, "User registered");
        Ok(user)
    }

    /// Replace a user's profile fields (email, credentials, external link).
    /// The stored balance is never changed by this call.
    pub fn update_profile(&mut self, user: User) -> Result<User> {
        let id = user.id;
        let mut batch = WriteBatch::new();
        batch.update_profile(user);
        self.commit(batch)?;
        tracing::debug!(user = %id, "Profile updated");
        self.store.require_user(id)
    }

    /// Record a contract so escrow can be held against it.
    ///
    /// # Errors
    /// `InvalidContract` if the client also freelances on it or the
    /// freelancer supervises their own payout.
    pub fn register_contract(&mut self, contract: Contract) -> Result<Contract> {
        if contract.client_id == contract.freelancer_id {
            return Err(GigledgerError::InvalidContract {
                reason: "client and freelancer must differ".into(),
            });
        }
        if contract.supervisor_id == Some(contract.freelancer_id) {
            return Err(GigledgerError::InvalidContract {
                reason: "freelancer cannot supervise their own contract".into(),
            });
        }
        let mut batch = WriteBatch::new();
        batch.insert_contract(contract.clone());
        self.commit(batch)?;
        tracing::info!(
            contract = %contract.id,
            client = %contract.client_id,
            freelancer = %contract.freelancer_id,
            "Contract registered"
        );
        Ok(contract)
    }

    // -----------------------------------------------------------------------
    // Deposits
    // -----------------------------------------------------------------------

    fn check_deposit(&self, amount: Amount, reference: Option<&str>) -> Result<()> {
        amount.ensure_positive("deposit")?;
        if amount > self.config.max_single_deposit {
            return Err(GigledgerError::InvalidAmount {
                reason: format!(
                    "deposit of {amount} exceeds the single-deposit limit of {}",
                    self.config.max_single_deposit
                ),
            });
        }
        self.check_reference(reference)
    }

    fn check_reference(&self, reference: Option<&str>) -> Result<()> {
        if let Some(reference) = reference {
            if self.store.transaction_by_reference(reference)?.is_some() {
                return Err(GigledgerError::DuplicateReference(reference.to_string()));
            }
        }
        Ok(())
    }

    /// Credit `amount` to `user` immediately.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive or over-limit amounts,
    /// `DuplicateReference` if `reference` was already used.
    pub fn deposit(
        &mut self,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
    ) -> Result<WalletTransaction> {
        self.check_deposit(amount, reference)?;
        let owner = self.store.require_user(user)?;
        let balance = owner.wallet_balance.checked_add(amount)?;

        let row = WalletTransaction::new(
            Account::Wallet(user),
            amount,
            TransactionType::Deposit,
            TransactionStatus::Completed,
        )
        .with_reference(reference)
        .with_description("deposit");

        let mut batch = WriteBatch::new();
        batch
            .insert_transaction(row.clone())
            .set_balance(user, owner.wallet_balance, balance);
        self.commit(batch)?;

        tracing::info!(
            user = %user,
            amount = %amount,
            balance = %balance,
            tx = %row.id,
            reference = ?reference,
            "Deposit completed"
        );
        Ok(row)
    }

    /// Record a pending deposit awaiting provider confirmation. The balance
    /// is unchanged until [`Wallet::confirm_deposit`].
    pub fn begin_deposit(
        &mut self,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
    ) -> Result<WalletTransaction> {
        self.check_deposit(amount, reference)?;
        self.store.require_user(user)?;

        let row = WalletTransaction::new(
            Account::Wallet(user),
            amount,
            TransactionType::Deposit,
            TransactionStatus::Pending,
        )
        .with_reference(reference)
        .with_description("deposit");

        let mut batch = WriteBatch::new();
        batch.insert_transaction(row.clone());
        self.commit(batch)?;

        tracing::info!(user = %user, amount = %amount, tx = %row.id, "Deposit pending");
        Ok(row)
    }

    /// Complete a pending deposit and credit the wallet.
    pub fn confirm_deposit(&mut self, id: TransactionId) -> Result<WalletTransaction> {
        let row = self.open_row(id, TransactionType::Deposit, TransactionStatus::Completed)?;
        self.settle(row, TransactionStatus::Completed)
    }

    /// Mark a pending deposit failed. Nothing is credited.
    pub fn fail_deposit(&mut self, id: TransactionId) -> Result<WalletTransaction> {
        let row = self.open_row(id, TransactionType::Deposit, TransactionStatus::Failed)?;
        self.settle(row, TransactionStatus::Failed)
    }

    // -----------------------------------------------------------------------
    // Withdrawals
    // -----------------------------------------------------------------------

    /// Reserve `amount` for a payout. The row stays pending and the balance
    /// is only deducted by [`Wallet::complete_withdrawal`], but the amount
    /// no longer counts as available.
    ///
    /// # Errors
    /// `InvalidAmount` below the minimum, `InsufficientBalance` when the
    /// available balance cannot cover it.
    pub fn request_withdrawal(
        &mut self,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
    ) -> Result<WalletTransaction> {
        amount.ensure_positive("withdrawal")?;
        if amount < self.config.min_withdrawal {
            return Err(GigledgerError::InvalidAmount {
                reason: format!(
                    "withdrawal of {amount} is below the minimum of {}",
                    self.config.min_withdrawal
                ),
            });
        }
        self.check_reference(reference)?;

        let available = self.available_balance(user)?;
        if available < amount {
            return Err(GigledgerError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        let row = WalletTransaction::new(
            Account::Wallet(user),
            amount.checked_neg()?,
            TransactionType::Withdrawal,
            TransactionStatus::Pending,
        )
        .with_reference(reference)
        .with_description("withdrawal");

        let mut batch = WriteBatch::new();
        batch.insert_transaction(row.clone());
        self.commit(batch)?;

        tracing::info!(
            user = %user,
            amount = %amount,
            tx = %row.id,
            reference = ?reference,
            "Withdrawal requested"
        );
        Ok(row)
    }

    /// The payout has been handed to the payment provider.
    pub fn mark_withdrawal_processing(&mut self, id: TransactionId) -> Result<WalletTransaction> {
        let row = self.open_row(
            id,
            TransactionType::Withdrawal,
            TransactionStatus::Processing,
        )?;
        self.settle(row, TransactionStatus::Processing)
    }

    /// The payout went through: deduct the balance.
    pub fn complete_withdrawal(&mut self, id: TransactionId) -> Result<WalletTransaction> {
        let row = self.open_row(id, TransactionType::Withdrawal, TransactionStatus::Completed)?;
        self.settle(row, TransactionStatus::Completed)
    }

    /// The payout failed: drop the reservation, balance untouched.
    pub fn fail_withdrawal(&mut self, id: TransactionId) -> Result<WalletTransaction> {
        let row = self.open_row(id, TransactionType::Withdrawal, TransactionStatus::Failed)?;
        self.settle(row, TransactionStatus::Failed)
    }

    /// Load a row of `kind` that may move to `target`.
    fn open_row(
        &self,
        id: TransactionId,
        kind: TransactionType,
        target: TransactionStatus,
    ) -> Result<WalletTransaction> {
        let row = self.store.require_transaction(id)?;
        if row.kind != kind {
            return Err(GigledgerError::WrongTransactionType {
                id,
                reason: format!("expected {kind}, found {}", row.kind),
            });
        }
        if !row.status.can_transition_to(target) {
            return Err(GigledgerError::InvalidTransactionTransition {
                id,
                from: row.status,
                to: target,
            });
        }
        Ok(row)
    }

    /// Move a single-row deposit or withdrawal to `target`, applying its
    /// amount to the wallet when it completes.
    fn settle(
        &mut self,
        mut row: WalletTransaction,
        target: TransactionStatus,
    ) -> Result<WalletTransaction> {
        let Account::Wallet(user) = row.account else {
            return Err(GigledgerError::InvariantViolation {
                reason: format!("{} is not posted to a wallet", row.id),
            });
        };
        let now = Utc::now();
        let mut batch = WriteBatch::new();
        batch.set_transaction_status(row.id, row.status, target, now);

        if target == TransactionStatus::Completed {
            let owner = self.store.require_user(user)?;
            let balance = owner.wallet_balance.checked_add(row.amount)?;
            if balance.is_negative() {
                return Err(GigledgerError::InsufficientBalance {
                    needed: row.amount.checked_neg()?,
                    available: owner.wallet_balance,
                });
            }
            batch.set_balance(user, owner.wallet_balance, balance);
        }
        self.commit(batch)?;

        let from = row.status;
        row.transition(target, now)?;
        tracing::info!(
            user = %user,
            tx = %row.id,
            kind = %row.kind,
            amount = %row.amount,
            from = %from,
            to = %target,
            "Transaction settled"
        );
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Adjustments
    // -----------------------------------------------------------------------

    /// Admin correction of a wallet by a signed `amount`.
    ///
    /// # Errors
    /// `Unauthorized` unless `actor` is an admin, `InvalidAmount` for zero,
    /// `InsufficientBalance` if the balance would go negative.
    pub fn adjust(
        &mut self,
        actor: UserId,
        user: UserId,
        amount: Amount,
        reason: &str,
    ) -> Result<WalletTransaction> {
        let admin = self.store.require_user(actor)?;
        authority::authorize_adjustment(&admin)?;
        if amount.is_zero() {
            return Err(GigledgerError::InvalidAmount {
                reason: "adjustment must be non-zero".into(),
            });
        }

        let owner = self.store.require_user(user)?;
        let balance = owner.wallet_balance.checked_add(amount)?;
        if balance.is_negative() {
            return Err(GigledgerError::InsufficientBalance {
                needed: amount.checked_neg()?,
                available: owner.wallet_balance,
            });
        }

        let row = WalletTransaction::new(
            Account::Wallet(user),
            amount,
            TransactionType::SystemAdjustment,
            TransactionStatus::Completed,
        )
        .with_description(reason);

        let mut batch = WriteBatch::new();
        batch
            .insert_transaction(row.clone())
            .set_balance(user, owner.wallet_balance, balance);
        self.commit(batch)?;

        tracing::warn!(
            actor = %actor,
            user = %user,
            amount = %amount,
            balance = %balance,
            reason,
            "Balance adjusted"
        );
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn balance(&self, user: UserId) -> Result<Amount> {
        Ok(self.store.require_user(user)?.wallet_balance)
    }

    /// Balance minus open withdrawal reservations.
    pub fn available_balance(&self, user: UserId) -> Result<Amount> {
        let balance = self.balance(user)?;
        let rows = self.store.transactions_for(Account::Wallet(user))?;
        balance.checked_sub(ledger::open_withdrawals(&rows)?)
    }

    /// The user's wallet rows, oldest first.
    pub fn history(&self, user: UserId) -> Result<Vec<WalletTransaction>> {
        self.store.require_user(user)?;
        self.store.transactions_for(Account::Wallet(user))
    }

    /// Every row linked to `contract` on either side, oldest first.
    pub fn contract_history(&self, contract: ContractId) -> Result<Vec<WalletTransaction>> {
        self.store.require_contract(contract)?;
        Ok(self
            .store
            .transactions()?
            .into_iter()
            .filter(|tx| tx.contract_id == Some(contract))
            .collect())
    }

    pub fn transaction_by_reference(&self, reference: &str) -> Result<Option<WalletTransaction>> {
        self.store.transaction_by_reference(reference)
    }

    pub fn escrow(&self, contract: ContractId) -> Result<Option<EscrowAccount>> {
        self.store.escrow(contract)
    }
}
