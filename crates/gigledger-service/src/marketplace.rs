//! The async marketplace facade.
//!
//! Every call is made on behalf of a bearer token. The token is resolved to
//! a [`Principal`] first, then the wallet is locked for the operation.
//!
//! Locks are always taken wallet first, authenticator second, and neither
//! is held while the external provider is being called.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gigledger_auth::{
    HybridAuthenticator, IdentityProvider, LocalOutcome, LoginSuccess, Principal, is_local_token,
};
use gigledger_types::{
    Amount, AuthSource, Contract, ContractId, EscrowAccount, GigledgerError, Result, Role,
    ServiceConfig, TransactionId, User, UserId, WalletTransaction,
};
use gigledger_wallet::{AuditReport, LedgerStore, MemoryStore, Wallet, audit};
use tokio::sync::{Mutex, RwLock};

/// Actor recorded on errors raised before anyone is signed in.
fn anonymous() -> UserId {
    UserId::from_bytes([0; 16])
}

/// Strip an optional `Bearer ` scheme from an authorization value.
#[must_use]
pub fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map_or(value, str::trim)
}

pub struct Marketplace<P: IdentityProvider> {
    wallet: RwLock<Wallet<MemoryStore>>,
    auth: Mutex<HybridAuthenticator>,
    provider: Arc<P>,
}

impl<P: IdentityProvider> Marketplace<P> {
    /// Validate `config` and build an empty marketplace.
    pub fn new(config: &ServiceConfig, provider: P) -> Result<Self> {
        config.validate()?;
        let auth = HybridAuthenticator::new(config.auth.clone())?;
        Ok(Self::with_authenticator(config, auth, provider))
    }

    /// Use a pre-built authenticator (custom password cost or signing key).
    pub fn with_authenticator(
        config: &ServiceConfig,
        auth: HybridAuthenticator,
        provider: P,
    ) -> Self {
        tracing::info!(provider = provider.name(), "Marketplace started");
        Self {
            wallet: RwLock::new(Wallet::new(MemoryStore::new(), config.wallet.clone())),
            auth: Mutex::new(auth),
            provider: Arc::new(provider),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    // -----------------------------------------------------------------------
    // Accounts and sessions
    // -----------------------------------------------------------------------

    /// Self-service sign-up for clients and freelancers.
    pub async fn register(
        &self,
        email: &str,
        display_name: &str,
        role: Role,
        password: &str,
    ) -> Result<User> {
        if role.is_staff() {
            return Err(GigledgerError::Unauthorized {
                actor: anonymous(),
                action: format!("self-register as {role}"),
            });
        }
        let mut wallet = self.wallet.write().await;
        let auth = self.auth.lock().await;
        auth.register_local(&mut *wallet, email, display_name, role, password)
    }

    /// Create the first admin. Fails once any admin exists.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<User> {
        let mut wallet = self.wallet.write().await;
        if wallet
            .store()
            .users()?
            .iter()
            .any(|u| u.role == Role::Admin)
        {
            return Err(GigledgerError::Unauthorized {
                actor: anonymous(),
                action: "bootstrap a second admin".into(),
            });
        }
        let auth = self.auth.lock().await;
        auth.register_local(&mut *wallet, email, display_name, Role::Admin, password)
    }

    /// Admin creates a staff (admin or QA) account.
    pub async fn register_staff(
        &self,
        bearer: &str,
        email: &str,
        display_name: &str,
        role: Role,
        password: &str,
    ) -> Result<User> {
        let admin = self.authenticate(bearer).await?;
        admin.require_role(Role::Admin, "create staff accounts")?;
        if !role.is_staff() {
            return Err(GigledgerError::Unauthorized {
                actor: admin.id(),
                action: format!("create a {role} account as staff"),
            });
        }
        let mut wallet = self.wallet.write().await;
        let auth = self.auth.lock().await;
        auth.register_local(&mut *wallet, email, display_name, role, password)
    }

    /// Local check under the locks, provider call outside them.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSuccess> {
        let now = Utc::now();
        {
            let wallet = self.wallet.read().await;
            let mut auth = self.auth.lock().await;
            match auth.try_local(wallet.store(), email, password, now)? {
                LocalOutcome::Authenticated(user) => {
                    return auth.start_session(user, AuthSource::Local, now);
                }
                LocalOutcome::Fallback(reason) => {
                    tracing::debug!(email = %email, ?reason, "Local check missed");
                }
            }
        }

        match self.provider.sign_in(email, password).await? {
            Some(identity) => {
                let mut wallet = self.wallet.write().await;
                let mut auth = self.auth.lock().await;
                auth.complete_external(&mut *wallet, &identity, Utc::now())
            }
            None => {
                self.auth.lock().await.record_failure(email, now);
                Err(GigledgerError::InvalidCredentials)
            }
        }
    }

    /// Resolve a bearer token to the calling user.
    pub async fn authenticate(&self, bearer: &str) -> Result<Principal> {
        let token = bearer_token(bearer);
        if is_local_token(token) {
            let wallet = self.wallet.read().await;
            let auth = self.auth.lock().await;
            return auth.verify_local(wallet.store(), token, Utc::now());
        }

        let identity = self
            .provider
            .verify_access_token(token)
            .await?
            .ok_or_else(|| GigledgerError::TokenInvalid {
                reason: format!("not recognized by {}", self.provider.name()),
            })?;
        let mut wallet = self.wallet.write().await;
        let auth = self.auth.lock().await;
        let user = auth.resolve_external(&mut *wallet, &identity)?;
        Ok(Principal {
            user,
            source: AuthSource::External {
                provider: identity.provider,
            },
            session_id: None,
        })
    }

    pub async fn logout(&self, bearer: &str) -> Result<bool> {
        self.auth.lock().await.logout(bearer_token(bearer))
    }

    /// Revoke every session of the caller.
    pub async fn logout_everywhere(&self, bearer: &str) -> Result<usize> {
        let caller = self.authenticate(bearer).await?;
        Ok(self.auth.lock().await.revoke_all(caller.id()))
    }

    pub async fn change_password(&self, bearer: &str, new_password: &str) -> Result<()> {
        let caller = self.authenticate(bearer).await?;
        let mut wallet = self.wallet.write().await;
        let mut auth = self.auth.lock().await;
        auth.set_password(&mut *wallet, caller.id(), new_password)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Wallet
    // -----------------------------------------------------------------------

    /// Request keys are scoped per caller.
    fn scoped_key(caller: &Principal, key: Option<&str>) -> Option<String> {
        key.map(|k| format!("{}:{k}", caller.id()))
    }

    /// Record a deposit the payment provider has already captured for
    /// `user`. Admin only; users fund their wallet with
    /// [`Marketplace::begin_deposit`].
    pub async fn deposit(
        &self,
        bearer: &str,
        user: UserId,
        amount: Amount,
        reference: Option<&str>,
        request_key: Option<&str>,
    ) -> Result<WalletTransaction> {
        let caller = self.authenticate(bearer).await?;
        caller.require_role(Role::Admin, "record captured deposits")?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| w.deposit(user, amount, reference))
    }

    /// Start a deposit for the caller. Nothing is credited until the
    /// payment provider confirms it through
    /// [`Marketplace::settle_transaction`].
    pub async fn begin_deposit(
        &self,
        bearer: &str,
        amount: Amount,
        reference: Option<&str>,
        request_key: Option<&str>,
    ) -> Result<WalletTransaction> {
        let caller = self.authenticate(bearer).await?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| {
            w.begin_deposit(caller.id(), amount, reference)
        })
    }

    pub async fn request_withdrawal(
        &self,
        bearer: &str,
        amount: Amount,
        reference: Option<&str>,
        request_key: Option<&str>,
    ) -> Result<WalletTransaction> {
        let caller = self.authenticate(bearer).await?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| {
            w.request_withdrawal(caller.id(), amount, reference)
        })
    }

    /// Payment-provider callbacks: confirm or fail deposits, advance
    /// withdrawals. Admin only.
    pub async fn settle_transaction(
        &self,
        bearer: &str,
        id: TransactionId,
        outcome: Settlement,
    ) -> Result<WalletTransaction> {
        let caller = self.authenticate(bearer).await?;
        caller.require_role(Role::Admin, "settle transactions")?;
        let mut wallet = self.wallet.write().await;
        match outcome {
            Settlement::ConfirmDeposit => wallet.confirm_deposit(id),
            Settlement::FailDeposit => wallet.fail_deposit(id),
            Settlement::WithdrawalProcessing => wallet.mark_withdrawal_processing(id),
            Settlement::CompleteWithdrawal => wallet.complete_withdrawal(id),
            Settlement::FailWithdrawal => wallet.fail_withdrawal(id),
        }
    }

    pub async fn adjust(
        &self,
        bearer: &str,
        user: UserId,
        amount: Amount,
        reason: &str,
    ) -> Result<WalletTransaction> {
        let caller = self.authenticate(bearer).await?;
        let mut wallet = self.wallet.write().await;
        wallet.adjust(caller.id(), user, amount, reason)
    }

    pub async fn balance(&self, bearer: &str) -> Result<Amount> {
        let caller = self.authenticate(bearer).await?;
        self.wallet.read().await.balance(caller.id())
    }

    pub async fn available_balance(&self, bearer: &str) -> Result<Amount> {
        let caller = self.authenticate(bearer).await?;
        self.wallet.read().await.available_balance(caller.id())
    }

    pub async fn history(&self, bearer: &str) -> Result<Vec<WalletTransaction>> {
        let caller = self.authenticate(bearer).await?;
        self.wallet.read().await.history(caller.id())
    }

    // -----------------------------------------------------------------------
    // Contracts and escrow
    // -----------------------------------------------------------------------

    /// The caller becomes the contract's client.
    pub async fn create_contract(
        &self,
        bearer: &str,
        freelancer: UserId,
        title: &str,
        supervisor: Option<UserId>,
    ) -> Result<Contract> {
        let caller = self.authenticate(bearer).await?;
        caller.require_role(Role::Client, "create contracts")?;
        let mut contract = Contract::new(caller.id(), freelancer, title);
        if let Some(supervisor) = supervisor {
            contract = contract.with_supervisor(supervisor);
        }
        self.wallet.write().await.register_contract(contract)
    }

    pub async fn hold(
        &self,
        bearer: &str,
        contract: ContractId,
        amount: Amount,
        request_key: Option<&str>,
    ) -> Result<EscrowAccount> {
        let caller = self.authenticate(bearer).await?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| w.hold(caller.id(), contract, amount))
    }

    pub async fn release(
        &self,
        bearer: &str,
        contract: ContractId,
        amount: Amount,
        request_key: Option<&str>,
    ) -> Result<EscrowAccount> {
        let caller = self.authenticate(bearer).await?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| w.release(caller.id(), contract, amount))
    }

    pub async fn refund(
        &self,
        bearer: &str,
        contract: ContractId,
        amount: Amount,
        request_key: Option<&str>,
    ) -> Result<EscrowAccount> {
        let caller = self.authenticate(bearer).await?;
        let key = Self::scoped_key(&caller, request_key);
        let mut wallet = self.wallet.write().await;
        wallet.idempotent(key.as_deref(), |w| w.refund(caller.id(), contract, amount))
    }

    pub async fn open_dispute(&self, bearer: &str, contract: ContractId) -> Result<EscrowAccount> {
        let caller = self.authenticate(bearer).await?;
        self.wallet.write().await.open_dispute(caller.id(), contract)
    }

    pub async fn resolve_dispute(
        &self,
        bearer: &str,
        contract: ContractId,
        to_freelancer: Amount,
    ) -> Result<EscrowAccount> {
        let caller = self.authenticate(bearer).await?;
        self.wallet
            .write()
            .await
            .resolve_dispute(caller.id(), contract, to_freelancer)
    }

    /// Visible to the parties, the supervisor and staff.
    pub async fn escrow(&self, bearer: &str, contract: ContractId) -> Result<Option<EscrowAccount>> {
        let caller = self.authenticate(bearer).await?;
        let wallet = self.wallet.read().await;
        let record = wallet.store().require_contract(contract)?;
        let id = caller.id();
        if !(record.is_party(id) || record.is_supervisor(id) || caller.user.role.is_staff()) {
            return Err(GigledgerError::Unauthorized {
                actor: id,
                action: format!("view escrow of {contract}"),
            });
        }
        wallet.escrow(contract)
    }

    /// Full ledger audit. Staff only.
    pub async fn audit(&self, bearer: &str) -> Result<AuditReport> {
        let caller = self.authenticate(bearer).await?;
        if !caller.user.role.is_staff() {
            return Err(GigledgerError::Unauthorized {
                actor: caller.id(),
                action: "audit the ledger".into(),
            });
        }
        let wallet = self.wallet.read().await;
        let report = audit::verify(wallet.store())?;
        let summary = serde_json::to_string(&report)?;
        tracing::info!(actor = %caller.id(), report = %summary, "Ledger audited");
        Ok(report)
    }

    /// Drop expired and revoked sessions.
    pub async fn purge_sessions(&self) -> usize {
        self.auth.lock().await.purge_expired(Utc::now())
    }

    /// Purge sessions every `every` until `shutdown` resolves. Returns the
    /// total number of sessions purged.
    pub async fn sweep_sessions_until<F>(&self, every: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sweep = tokio::time::interval(every);
        let mut total = 0;
        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let purged = self.purge_sessions().await;
                    if purged > 0 {
                        tracing::debug!(purged, "Sessions purged");
                    }
                    total += purged;
                }
                () = &mut shutdown => {
                    tracing::info!(purged = total, "Session sweeper stopped");
                    return total;
                }
            }
        }
    }
}

/// Outcome reported by the payment provider for an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    ConfirmDeposit,
    FailDeposit,
    WithdrawalProcessing,
    CompleteWithdrawal,
    FailWithdrawal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gigledger_auth::{MemoryProvider, NoProvider, PasswordPolicy, TokenSigner};

    fn market<P: IdentityProvider>(provider: P) -> Marketplace<P> {
        let config = ServiceConfig::default();
        let auth = HybridAuthenticator::with_parts(
            config.auth.clone(),
            PasswordPolicy::fast(8).unwrap(),
            TokenSigner::generate(),
        )
        .unwrap();
        Marketplace::with_authenticator(&config, auth, provider)
    }

    #[test]
    fn bearer_scheme_stripped() {
        assert_eq!(bearer_token("Bearer glt1.a.b"), "glt1.a.b");
        assert_eq!(bearer_token("  glt1.a.b "), "glt1.a.b");
        assert_eq!(bearer_token("bearer  x"), "x");
    }

    #[tokio::test]
    async fn staff_cannot_self_register() {
        let m = market(NoProvider);
        let err = m
            .register("boss@example.com", "Boss", Role::Admin, "pass-word-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn single_bootstrap_admin() {
        let m = market(NoProvider);
        m.bootstrap_admin("root@example.com", "Root", "pass-word-1")
            .await
            .unwrap();
        assert!(
            m.bootstrap_admin("root2@example.com", "Root2", "pass-word-2")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn deposit_with_request_key_posts_once() {
        let m = market(NoProvider);
        m.bootstrap_admin("root@example.com", "Root", "pass-word-1")
            .await
            .unwrap();
        let client = m
            .register("c@example.com", "C", Role::Client, "pass-word-1")
            .await
            .unwrap();
        let admin = m.login("root@example.com", "pass-word-1").await.unwrap();
        let bearer = format!("Bearer {}", admin.token);

        m.deposit(&bearer, client.id, Amount::from_minor(1_000), None, Some("k1"))
            .await
            .unwrap();
        let err = m
            .deposit(&bearer, client.id, Amount::from_minor(1_000), None, Some("k1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::DuplicateRequest(_)));

        let login = m.login("c@example.com", "pass-word-1").await.unwrap();
        assert_eq!(
            m.balance(&login.token).await.unwrap(),
            Amount::from_minor(1_000)
        );
    }

    #[tokio::test]
    async fn clients_cannot_credit_themselves() {
        let m = market(NoProvider);
        let client = m
            .register("c@example.com", "C", Role::Client, "pass-word-1")
            .await
            .unwrap();
        let login = m.login("c@example.com", "pass-word-1").await.unwrap();

        let max = ServiceConfig::default().wallet.max_single_deposit;
        for _ in 0..3 {
            let err = m
                .deposit(&login.token, client.id, max, None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, GigledgerError::Unauthorized { .. }));
        }
        let pending = m.begin_deposit(&login.token, max, None, None).await.unwrap();
        assert!(
            m.settle_transaction(&login.token, pending.id, Settlement::ConfirmDeposit)
                .await
                .is_err()
        );
        assert_eq!(m.balance(&login.token).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn sweeper_purges_until_shutdown() {
        let mut config = ServiceConfig::default();
        config.auth.session_ttl_secs = 1;
        let auth = HybridAuthenticator::with_parts(
            config.auth.clone(),
            PasswordPolicy::fast(8).unwrap(),
            TokenSigner::generate(),
        )
        .unwrap();
        let m = Marketplace::with_authenticator(&config, auth, NoProvider);
        m.register("c@example.com", "C", Role::Client, "pass-word-1")
            .await
            .unwrap();
        m.login("c@example.com", "pass-word-1").await.unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stopped.await;
        };
        let stopper = async move {
            tokio::time::sleep(Duration::from_millis(1_300)).await;
            let _ = stop.send(());
        };
        let (purged, ()) = tokio::join!(
            m.sweep_sessions_until(Duration::from_millis(50), shutdown),
            stopper
        );
        assert_eq!(purged, 1);
    }

    #[test]
    fn oversized_session_ttl_is_rejected_at_startup() {
        let mut config = ServiceConfig::default();
        config.auth.session_ttl_secs = i64::MAX / 2;
        assert!(matches!(
            Marketplace::new(&config, NoProvider),
            Err(GigledgerError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn provider_token_reaches_wallet() {
        let provider =
            MemoryProvider::new("supabase").with_account("f@example.com", "remote-pw-1", "sb-f");
        let token = provider.access_token_for("f@example.com").unwrap();
        let m = market(provider);
        let principal = m.authenticate(&token).await.unwrap();
        assert!(principal.source.is_external());
        assert_eq!(m.balance(&token).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn audit_is_staff_only() {
        let m = market(NoProvider);
        m.register("c@example.com", "C", Role::Client, "pass-word-1")
            .await
            .unwrap();
        let login = m.login("c@example.com", "pass-word-1").await.unwrap();
        assert!(m.audit(&login.token).await.is_err());
    }
}
