//! End-to-end marketplace flows: sign-up, login, deposits, escrow, disputes
//! and withdrawals through the async facade, audited after each scenario.

use std::sync::Arc;

use gigledger_auth::{HybridAuthenticator, MemoryProvider, PasswordPolicy, TokenSigner};
use gigledger_service::{Marketplace, Settlement};
use gigledger_types::*;

const PASSWORD: &str = "correct-horse-1";

struct Gig {
    market: Marketplace<MemoryProvider>,
    admin: String,
    client: String,
    client_id: UserId,
    freelancer: String,
    freelancer_id: UserId,
}

impl Gig {
    async fn new() -> Self {
        let provider = MemoryProvider::new("supabase")
            .with_account("legacy@example.com", "legacy-pass-1", "sb-legacy");
        Self::with_provider(provider).await
    }

    async fn with_provider(provider: MemoryProvider) -> Self {
        let config = ServiceConfig {
            wallet: WalletConfig {
                audit_after_commit: true,
                ..WalletConfig::default()
            },
            ..ServiceConfig::default()
        };
        let auth = HybridAuthenticator::with_parts(
            config.auth.clone(),
            PasswordPolicy::fast(config.auth.min_password_len).unwrap(),
            TokenSigner::generate(),
        )
        .unwrap();
        let market = Marketplace::with_authenticator(&config, auth, provider);

        market
            .bootstrap_admin("admin@example.com", "Admin", PASSWORD)
            .await
            .unwrap();
        let client_id = market
            .register("client@example.com", "Client", Role::Client, PASSWORD)
            .await
            .unwrap()
            .id;
        let freelancer_id = market
            .register("dev@example.com", "Dev", Role::Freelancer, PASSWORD)
            .await
            .unwrap()
            .id;

        let admin = Self::login(&market, "admin@example.com", PASSWORD).await;
        let client = Self::login(&market, "client@example.com", PASSWORD).await;
        let freelancer = Self::login(&market, "dev@example.com", PASSWORD).await;
        Self {
            market,
            admin,
            client,
            client_id,
            freelancer,
            freelancer_id,
        }
    }

    async fn login(market: &Marketplace<MemoryProvider>, email: &str, password: &str) -> String {
        let login = market.login(email, password).await.unwrap();
        format!("Bearer {}", login.token)
    }

    async fn contract(&self) -> ContractId {
        self.market
            .create_contract(&self.client, self.freelancer_id, "Landing page", None)
            .await
            .unwrap()
            .id
    }

    /// Deposit captured by the payment provider, recorded by the admin.
    async fn fund(&self, user: UserId, amount: Amount, reference: Option<&str>) {
        self.market
            .deposit(&self.admin, user, amount, reference, None)
            .await
            .unwrap();
    }

    async fn balance(&self, bearer: &str) -> i64 {
        self.market.balance(bearer).await.unwrap().minor()
    }

    async fn audit(&self) -> gigledger_wallet::AuditReport {
        self.market.audit(&self.admin).await.unwrap()
    }
}

fn minor(n: i64) -> Amount {
    Amount::from_minor(n)
}

#[tokio::test]
async fn milestone_gig_from_deposit_to_cash_out() {
    let gig = Gig::new().await;
    let m = &gig.market;

    gig.fund(gig.client_id, minor(10_000), Some("pi_001")).await;
    let contract = gig.contract().await;

    m.hold(&gig.client, contract, minor(6_000), Some("hold-1"))
        .await
        .unwrap();
    assert_eq!(gig.balance(&gig.client).await, 4_000);

    m.release(&gig.client, contract, minor(2_500), Some("m1"))
        .await
        .unwrap();
    let escrow = m
        .release(&gig.client, contract, minor(3_500), Some("m2"))
        .await
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);
    assert!(escrow.amount.is_zero());
    assert_eq!(gig.balance(&gig.freelancer).await, 6_000);

    let withdrawal = m
        .request_withdrawal(&gig.freelancer, minor(5_000), Some("po_001"), None)
        .await
        .unwrap();
    assert_eq!(m.available_balance(&gig.freelancer).await.unwrap(), minor(1_000));
    m.settle_transaction(&gig.admin, withdrawal.id, Settlement::WithdrawalProcessing)
        .await
        .unwrap();
    let done = m
        .settle_transaction(&gig.admin, withdrawal.id, Settlement::CompleteWithdrawal)
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert_eq!(gig.balance(&gig.freelancer).await, 1_000);

    let report = gig.audit().await;
    assert_eq!(report.wallet_total, minor(5_000));
    assert!(report.escrow_total.is_zero());
    assert_eq!(report.expected_supply, minor(5_000));
}

#[tokio::test]
async fn dispute_split_by_admin() {
    let gig = Gig::new().await;
    let m = &gig.market;
    gig.fund(gig.client_id, minor(4_000), None).await;
    let contract = gig.contract().await;
    m.hold(&gig.client, contract, minor(4_000), None).await.unwrap();

    let disputed = m.open_dispute(&gig.freelancer, contract).await.unwrap();
    assert_eq!(disputed.status, EscrowStatus::Disputed);

    let err = m
        .release(&gig.client, contract, minor(1_000), None)
        .await
        .unwrap_err();
    assert!(matches!(err, GigledgerError::EscrowWrongStatus { .. }));
    let err = m
        .resolve_dispute(&gig.client, contract, minor(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, GigledgerError::Unauthorized { .. }));

    let resolved = m
        .resolve_dispute(&gig.admin, contract, minor(1_500))
        .await
        .unwrap();
    assert_eq!(resolved.status, EscrowStatus::Released);
    assert_eq!(gig.balance(&gig.freelancer).await, 1_500);
    assert_eq!(gig.balance(&gig.client).await, 2_500);

    let seen = m.escrow(&gig.freelancer, contract).await.unwrap().unwrap();
    assert!(seen.amount.is_zero());
    gig.audit().await;
}

#[tokio::test]
async fn outsiders_cannot_touch_the_escrow() {
    let gig = Gig::new().await;
    let m = &gig.market;
    gig.fund(gig.client_id, minor(3_000), None).await;
    let contract = gig.contract().await;
    m.hold(&gig.client, contract, minor(3_000), None).await.unwrap();

    m.register("nosy@example.com", "Nosy", Role::Freelancer, PASSWORD)
        .await
        .unwrap();
    let nosy = Gig::login(m, "nosy@example.com", PASSWORD).await;

    assert!(m.escrow(&nosy, contract).await.is_err());
    assert!(m.release(&nosy, contract, minor(1), None).await.is_err());
    assert!(m.open_dispute(&nosy, contract).await.is_err());
    // Freelancer can refund but not release.
    assert!(
        m.release(&gig.freelancer, contract, minor(1), None)
            .await
            .is_err()
    );
    let escrow = m
        .refund(&gig.freelancer, contract, minor(3_000), None)
        .await
        .unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert_eq!(gig.balance(&gig.client).await, 3_000);
    // Staff can look.
    assert!(m.escrow(&gig.admin, contract).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_withdrawal_restores_funds() {
    let gig = Gig::new().await;
    let m = &gig.market;
    gig.fund(gig.client_id, minor(2_000), None).await;

    let w = m
        .request_withdrawal(&gig.client, minor(1_500), None, None)
        .await
        .unwrap();
    let err = m
        .request_withdrawal(&gig.client, minor(1_000), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GigledgerError::InsufficientBalance { .. }));

    // Only admins settle.
    assert!(
        m.settle_transaction(&gig.client, w.id, Settlement::FailWithdrawal)
            .await
            .is_err()
    );
    m.settle_transaction(&gig.admin, w.id, Settlement::FailWithdrawal)
        .await
        .unwrap();
    assert_eq!(m.available_balance(&gig.client).await.unwrap(), minor(2_000));
    assert_eq!(m.history(&gig.client).await.unwrap().len(), 2);
}

#[tokio::test]
async fn provider_deposit_confirmed_later() {
    let gig = Gig::new().await;
    let m = &gig.market;
    let pending = m
        .begin_deposit(&gig.client, minor(7_000), Some("pi_async"), Some("bd-1"))
        .await
        .unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert_eq!(gig.balance(&gig.client).await, 0);

    m.settle_transaction(&gig.admin, pending.id, Settlement::ConfirmDeposit)
        .await
        .unwrap();
    assert_eq!(gig.balance(&gig.client).await, 7_000);
    let err = m
        .settle_transaction(&gig.admin, pending.id, Settlement::FailDeposit)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GigledgerError::InvalidTransactionTransition { .. }
    ));
}

#[tokio::test]
async fn request_keys_are_scoped_per_caller() {
    let gig = Gig::new().await;
    let m = &gig.market;
    m.begin_deposit(&gig.client, minor(100), None, Some("same"))
        .await
        .unwrap();
    m.begin_deposit(&gig.freelancer, minor(100), None, Some("same"))
        .await
        .unwrap();
    let err = m
        .begin_deposit(&gig.client, minor(100), None, Some("same"))
        .await
        .unwrap_err();
    assert!(matches!(err, GigledgerError::DuplicateRequest(_)));
    assert_eq!(m.history(&gig.client).await.unwrap().len(), 1);
    assert_eq!(m.history(&gig.freelancer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_the_payment_side_creates_money() {
    let gig = Gig::new().await;
    let m = &gig.market;
    let max = WalletConfig::default().max_single_deposit;

    for _ in 0..3 {
        let err = m
            .deposit(&gig.client, gig.client_id, max, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::Unauthorized { .. }));
    }
    let pending = m.begin_deposit(&gig.client, max, None, None).await.unwrap();
    assert!(
        m.settle_transaction(&gig.client, pending.id, Settlement::ConfirmDeposit)
            .await
            .is_err()
    );
    assert_eq!(gig.balance(&gig.client).await, 0);
    assert!(gig.audit().await.expected_supply.is_zero());

    m.settle_transaction(&gig.admin, pending.id, Settlement::ConfirmDeposit)
        .await
        .unwrap();
    assert_eq!(gig.balance(&gig.client).await, max.minor());
}

#[tokio::test]
async fn legacy_user_signs_in_through_provider() {
    let gig = Gig::new().await;
    let m = &gig.market;

    let login = m.login("legacy@example.com", "legacy-pass-1").await.unwrap();
    assert!(login.session.source.is_external());
    assert_eq!(login.user.role, Role::Client);

    // The provider's own access token also works and maps to the same user.
    let access = m.provider().access_token_for("legacy@example.com").unwrap();
    let principal = m.authenticate(&access).await.unwrap();
    assert_eq!(principal.id(), login.user.id);

    let pending = m
        .begin_deposit(&access, minor(900), Some("pi_legacy"), None)
        .await
        .unwrap();
    m.settle_transaction(&gig.admin, pending.id, Settlement::ConfirmDeposit)
        .await
        .unwrap();
    let bearer = format!("Bearer {}", login.token);
    assert_eq!(gig.balance(&bearer).await, 900);
}

#[tokio::test]
async fn provider_outage_spares_local_users() {
    let gig = Gig::new().await;
    let m = &gig.market;
    m.provider().set_offline(true);

    let err = m
        .login("legacy@example.com", "legacy-pass-1")
        .await
        .unwrap_err();
    assert!(matches!(err, GigledgerError::ProviderUnavailable { .. }));
    assert!(m.login("client@example.com", PASSWORD).await.is_ok());
    // Existing local tokens keep working.
    assert_eq!(gig.balance(&gig.client).await, 0);
}

#[tokio::test]
async fn logout_and_password_change_end_sessions() {
    let gig = Gig::new().await;
    let m = &gig.market;

    assert!(m.logout(&gig.freelancer).await.unwrap());
    assert!(matches!(
        m.balance(&gig.freelancer).await,
        Err(GigledgerError::SessionRevoked)
    ));

    let second = Gig::login(m, "client@example.com", PASSWORD).await;
    m.change_password(&gig.client, "brand-new-pass-2")
        .await
        .unwrap();
    assert!(m.balance(&second).await.is_err());
    assert!(m.login("client@example.com", PASSWORD).await.is_err());
    let fresh = Gig::login(m, "client@example.com", "brand-new-pass-2").await;
    assert_eq!(m.logout_everywhere(&fresh).await.unwrap(), 1);
}

#[tokio::test]
async fn repeated_bad_passwords_are_throttled() {
    let gig = Gig::new().await;
    let m = &gig.market;
    for _ in 0..5 {
        let err = m.login("client@example.com", "wrong-pass-9").await.unwrap_err();
        assert!(matches!(err, GigledgerError::InvalidCredentials));
    }
    let err = m.login("client@example.com", PASSWORD).await.unwrap_err();
    assert!(matches!(err, GigledgerError::TooManyAttempts { .. }));
}

#[tokio::test]
async fn admin_creates_staff_and_adjusts() {
    let gig = Gig::new().await;
    let m = &gig.market;

    assert!(
        m.register_staff(&gig.client, "qa@example.com", "QA", Role::Qa, PASSWORD)
            .await
            .is_err()
    );
    m.register_staff(&gig.admin, "qa@example.com", "QA", Role::Qa, PASSWORD)
        .await
        .unwrap();
    let qa = Gig::login(m, "qa@example.com", PASSWORD).await;
    assert!(m.audit(&qa).await.is_ok());
    assert!(m.adjust(&qa, gig.client_id, minor(100), "goodwill").await.is_err());

    m.adjust(&gig.admin, gig.client_id, minor(250), "goodwill credit")
        .await
        .unwrap();
    assert_eq!(gig.balance(&gig.client).await, 250);
    assert_eq!(gig.audit().await.expected_supply, minor(250));
}

#[tokio::test]
async fn concurrent_deposits_all_land() {
    let gig = Arc::new(Gig::new().await);
    let mut tasks = Vec::new();
    for i in 0..20 {
        let gig = Arc::clone(&gig);
        tasks.push(tokio::spawn(async move {
            let key = format!("c-{i}");
            let result = gig
                .market
                .deposit(&gig.admin, gig.client_id, minor(100), None, Some(&key))
                .await;
            result.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(gig.balance(&gig.client).await, 2_000);
    assert_eq!(gig.audit().await.rows_checked, 20);
}
