//! Storage interface and the in-memory store.
//!
//! Reads return owned values so relational adapters can implement the same
//! trait. Writes go through a [`WriteBatch`] that [`LedgerStore::commit`]
//! applies all-or-nothing: every write is checked against the stored state
//! (and the writes staged before it) before any of them become visible.
//!
//! Balance and escrow writes carry the value the caller read. A commit
//! whose expectation no longer matches fails with `StoreConflict` instead
//! of silently overwriting a concurrent update.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use gigledger_types::{
    Account, Amount, Contract, ContractId, EscrowAccount, GigledgerError, Result, TransactionId,
    TransactionStatus, User, UserId, WalletTransaction, normalize_email,
};

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// A single staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Add a new user. The balance must be zero.
    InsertUser(User),
    /// Replace a user's profile fields. The stored balance is kept.
    UpdateProfile(User),
    /// Compare-and-set a wallet balance.
    SetBalance {
        user: UserId,
        expected: Amount,
        balance: Amount,
    },
    InsertContract(Contract),
    /// Create (`expected: None`) or compare-and-replace an escrow account.
    PutEscrow {
        escrow: EscrowAccount,
        expected: Option<EscrowAccount>,
    },
    /// Append a ledger row.
    InsertTransaction(WalletTransaction),
    /// Move a ledger row from `from` to `to`.
    SetTransactionStatus {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    },
}

/// An ordered set of writes committed as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&mut self, user: User) -> &mut Self {
        self.writes.push(Write::InsertUser(user));
        self
    }

    pub fn update_profile(&mut self, user: User) -> &mut Self {
        self.writes.push(Write::UpdateProfile(user));
        self
    }

    pub fn set_balance(&mut self, user: UserId, expected: Amount, balance: Amount) -> &mut Self {
        self.writes.push(Write::SetBalance {
            user,
            expected,
            balance,
        });
        self
    }

    pub fn insert_contract(&mut self, contract: Contract) -> &mut Self {
        self.writes.push(Write::InsertContract(contract));
        self
    }

    pub fn put_escrow(
        &mut self,
        escrow: EscrowAccount,
        expected: Option<EscrowAccount>,
    ) -> &mut Self {
        self.writes.push(Write::PutEscrow { escrow, expected });
        self
    }

    pub fn insert_transaction(&mut self, tx: WalletTransaction) -> &mut Self {
        self.writes.push(Write::InsertTransaction(tx));
        self
    }

    pub fn set_transaction_status(
        &mut self,
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> &mut Self {
        self.writes.push(Write::SetTransactionStatus { id, from, to, at });
        self
    }

    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Storage for users, contracts, escrow accounts and ledger rows.
pub trait LedgerStore {
    fn user(&self, id: UserId) -> Result<Option<User>>;

    /// Lookup by email; implementations normalize the argument.
    fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    fn user_by_external_subject(&self, subject: &str) -> Result<Option<User>>;

    fn users(&self) -> Result<Vec<User>>;

    fn contract(&self, id: ContractId) -> Result<Option<Contract>>;

    fn escrow(&self, contract: ContractId) -> Result<Option<EscrowAccount>>;

    fn escrows(&self) -> Result<Vec<EscrowAccount>>;

    fn transaction(&self, id: TransactionId) -> Result<Option<WalletTransaction>>;

    fn transaction_by_reference(&self, reference: &str) -> Result<Option<WalletTransaction>>;

    /// Rows posted to `account`, oldest first.
    fn transactions_for(&self, account: Account) -> Result<Vec<WalletTransaction>>;

    /// Every row, oldest first.
    fn transactions(&self) -> Result<Vec<WalletTransaction>>;

    /// Apply every write in `batch`, or none of them.
    fn commit(&mut self, batch: WriteBatch) -> Result<()>;

    /// Like [`LedgerStore::user`] but missing users are an error.
    fn require_user(&self, id: UserId) -> Result<User> {
        self.user(id)?.ok_or(GigledgerError::UserNotFound(id))
    }

    fn require_contract(&self, id: ContractId) -> Result<Contract> {
        self.contract(id)?.ok_or(GigledgerError::ContractNotFound(id))
    }

    fn require_escrow(&self, contract: ContractId) -> Result<EscrowAccount> {
        self.escrow(contract)?
            .ok_or(GigledgerError::EscrowNotFound(contract))
    }

    fn require_transaction(&self, id: TransactionId) -> Result<WalletTransaction> {
        self.transaction(id)?
            .ok_or(GigledgerError::TransactionNotFound(id))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// `HashMap`-backed [`LedgerStore`]. Used for tests and single-process
/// deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    subjects: HashMap<String, UserId>,
    contracts: HashMap<ContractId, Contract>,
    escrows: HashMap<ContractId, EscrowAccount>,
    /// UUIDv7 keys keep this in insertion order.
    transactions: BTreeMap<TransactionId, WalletTransaction>,
    by_account: HashMap<Account, Vec<TransactionId>>,
    references: HashMap<String, TransactionId>,
    commits: u64,
}

/// Writes validated so far in the current commit, keyed like the store.
#[derive(Default)]
struct Staged {
    users: HashMap<UserId, User>,
    contracts: HashMap<ContractId, Contract>,
    escrows: HashMap<ContractId, EscrowAccount>,
    transactions: HashMap<TransactionId, WalletTransaction>,
    /// Insertion order of new rows.
    new_rows: Vec<TransactionId>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    fn staged_user<'a>(&'a self, staged: &'a Staged, id: UserId) -> Option<&'a User> {
        staged.users.get(&id).or_else(|| self.users.get(&id))
    }

    fn staged_escrow<'a>(
        &'a self,
        staged: &'a Staged,
        contract: ContractId,
    ) -> Option<&'a EscrowAccount> {
        staged
            .escrows
            .get(&contract)
            .or_else(|| self.escrows.get(&contract))
    }

    fn staged_transaction<'a>(
        &'a self,
        staged: &'a Staged,
        id: TransactionId,
    ) -> Option<&'a WalletTransaction> {
        staged
            .transactions
            .get(&id)
            .or_else(|| self.transactions.get(&id))
    }

    fn contract_exists(&self, staged: &Staged, id: ContractId) -> bool {
        staged.contracts.contains_key(&id) || self.contracts.contains_key(&id)
    }

    /// Whether `email` belongs to someone other than `owner`, either in the
    /// store or among staged users.
    fn email_taken(&self, staged: &Staged, email: &str, owner: UserId) -> bool {
        let stored = self
            .emails
            .get(email)
            .is_some_and(|id| *id != owner && !staged.users.contains_key(id));
        stored
            || staged
                .users
                .values()
                .any(|u| u.id != owner && u.email == email)
    }

    fn subject_taken(&self, staged: &Staged, subject: &str, owner: UserId) -> bool {
        let stored = self
            .subjects
            .get(subject)
            .is_some_and(|id| *id != owner && !staged.users.contains_key(id));
        stored
            || staged
                .users
                .values()
                .any(|u| u.id != owner && u.external_subject.as_deref() == Some(subject))
    }

    fn reference_taken(&self, staged: &Staged, reference: &str) -> bool {
        self.references.contains_key(reference)
            || staged
                .transactions
                .values()
                .any(|tx| tx.reference.as_deref() == Some(reference))
    }

    fn check_user_unique(&self, staged: &Staged, user: &User) -> Result<()> {
        if self.email_taken(staged, &user.email, user.id) {
            return Err(GigledgerError::DuplicateUser(user.email.clone()));
        }
        if let Some(subject) = &user.external_subject {
            if self.subject_taken(staged, subject, user.id) {
                return Err(GigledgerError::DuplicateUser(format!(
                    "external subject {subject}"
                )));
            }
        }
        Ok(())
    }

    /// Validate one write against the store plus everything staged before it.
    fn stage(&self, staged: &mut Staged, write: Write) -> Result<()> {
        match write {
            Write::InsertUser(user) => {
                if self.staged_user(staged, user.id).is_some() {
                    return Err(GigledgerError::DuplicateUser(user.id.to_string()));
                }
                if !user.wallet_balance.is_zero() {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!("new user {} must start with a zero balance", user.id),
                    });
                }
                self.check_user_unique(staged, &user)?;
                staged.users.insert(user.id, user);
            }
            Write::UpdateProfile(mut user) => {
                let current = self
                    .staged_user(staged, user.id)
                    .ok_or(GigledgerError::UserNotFound(user.id))?;
                user.wallet_balance = current.wallet_balance;
                self.check_user_unique(staged, &user)?;
                staged.users.insert(user.id, user);
            }
            Write::SetBalance {
                user,
                expected,
                balance,
            } => {
                let mut current = self
                    .staged_user(staged, user)
                    .cloned()
                    .ok_or(GigledgerError::UserNotFound(user))?;
                if current.wallet_balance != expected {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!(
                            "balance of {user} is {}, expected {expected}",
                            current.wallet_balance
                        ),
                    });
                }
                if balance.is_negative() {
                    return Err(GigledgerError::BalanceUnderflow(user));
                }
                current.wallet_balance = balance;
                staged.users.insert(user, current);
            }
            Write::InsertContract(contract) => {
                if self.contract_exists(staged, contract.id) {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!("{} already exists", contract.id),
                    });
                }
                let parties = [Some(contract.client_id), Some(contract.freelancer_id)];
                for party in parties.into_iter().chain([contract.supervisor_id]).flatten() {
                    if self.staged_user(staged, party).is_none() {
                        return Err(GigledgerError::UserNotFound(party));
                    }
                }
                staged.contracts.insert(contract.id, contract);
            }
            Write::PutEscrow { escrow, expected } => {
                if !self.contract_exists(staged, escrow.contract_id) {
                    return Err(GigledgerError::ContractNotFound(escrow.contract_id));
                }
                let current = self.staged_escrow(staged, escrow.contract_id);
                if current != expected.as_ref() {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!(
                            "escrow for {} changed since it was read",
                            escrow.contract_id
                        ),
                    });
                }
                if escrow.amount.is_negative() {
                    return Err(GigledgerError::InvariantViolation {
                        reason: format!("escrow for {} would go negative", escrow.contract_id),
                    });
                }
                staged.escrows.insert(escrow.contract_id, escrow);
            }
            Write::InsertTransaction(tx) => {
                if self.staged_transaction(staged, tx.id).is_some() {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!("{} already exists", tx.id),
                    });
                }
                if let Some(reference) = &tx.reference {
                    if self.reference_taken(staged, reference) {
                        return Err(GigledgerError::DuplicateReference(reference.clone()));
                    }
                }
                staged.new_rows.push(tx.id);
                staged.transactions.insert(tx.id, tx);
            }
            Write::SetTransactionStatus { id, from, to, at } => {
                let mut tx = self
                    .staged_transaction(staged, id)
                    .cloned()
                    .ok_or(GigledgerError::TransactionNotFound(id))?;
                if tx.status != from {
                    return Err(GigledgerError::StoreConflict {
                        reason: format!("{id} is {}, expected {from}", tx.status),
                    });
                }
                tx.transition(to, at)?;
                staged.transactions.insert(id, tx);
            }
        }
        Ok(())
    }

    /// Make staged writes visible. Cannot fail.
    fn apply(&mut self, staged: Staged) {
        // Unindex every replaced profile before indexing any new one: a batch
        // may hand one user's old email to another.
        for id in staged.users.keys() {
            if let Some(old) = self.users.get(id) {
                self.emails.remove(&old.email);
                if let Some(subject) = &old.external_subject {
                    self.subjects.remove(subject);
                }
            }
        }
        for (id, user) in staged.users {
            self.emails.insert(user.email.clone(), id);
            if let Some(subject) = &user.external_subject {
                self.subjects.insert(subject.clone(), id);
            }
            self.users.insert(id, user);
        }
        self.contracts.extend(staged.contracts);
        self.escrows.extend(staged.escrows);

        let mut rows = staged.transactions;
        for id in staged.new_rows {
            if let Some(tx) = rows.remove(&id) {
                self.by_account.entry(tx.account).or_default().push(id);
                if let Some(reference) = &tx.reference {
                    self.references.insert(reference.clone(), id);
                }
                self.transactions.insert(id, tx);
            }
        }
        // Remaining rows are status updates of existing rows.
        self.transactions.extend(rows);
        self.commits += 1;
    }
}

impl LedgerStore for MemoryStore {
    fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .emails
            .get(&normalize_email(email))
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    fn user_by_external_subject(&self, subject: &str) -> Result<Option<User>> {
        Ok(self
            .subjects
            .get(subject)
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    fn users(&self) -> Result<Vec<User>> {
        Ok(self.users.values().cloned().collect())
    }

    fn contract(&self, id: ContractId) -> Result<Option<Contract>> {
        Ok(self.contracts.get(&id).cloned())
    }

    fn escrow(&self, contract: ContractId) -> Result<Option<EscrowAccount>> {
        Ok(self.escrows.get(&contract).cloned())
    }

    fn escrows(&self) -> Result<Vec<EscrowAccount>> {
        Ok(self.escrows.values().cloned().collect())
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<WalletTransaction>> {
        Ok(self.transactions.get(&id).cloned())
    }

    fn transaction_by_reference(&self, reference: &str) -> Result<Option<WalletTransaction>> {
        Ok(self
            .references
            .get(reference)
            .and_then(|id| self.transactions.get(id))
            .cloned())
    }

    fn transactions_for(&self, account: Account) -> Result<Vec<WalletTransaction>> {
        Ok(self
            .by_account
            .get(&account)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.transactions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn transactions(&self) -> Result<Vec<WalletTransaction>> {
        Ok(self.transactions.values().cloned().collect())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<()> {
        let mut staged = Staged::default();
        for write in batch {
            self.stage(&mut staged, write)?;
        }
        self.apply(staged);
        Ok(())
    }
}
