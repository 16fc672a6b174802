//! Hybrid login: local password first, external provider second.
//!
//! ## Login flow
//!
//! ```text
//! throttle check ─→ local user with hash? ─yes→ argon2 verify ─ok→ Local session
//!                          │ no                     │ mismatch
//!                          └──────────┬─────────────┘
//!                                     ↓
//!                        provider.sign_in(email, password)
//!                      ok → link or provision user → External session
//!                      rejected → record failure → InvalidCredentials
//! ```
//!
//! Both kinds of session get a locally signed token. Bearer tokens that are
//! not local are checked with the provider on every request.
//!
//! The sync steps ([`HybridAuthenticator::try_local`],
//! [`HybridAuthenticator::complete_external`]) are public so a caller that
//! guards the wallet with a lock can release it while the provider call is
//! in flight. [`HybridAuthenticator::login`] chains them for callers that
//! own the wallet outright.

use chrono::{DateTime, Utc};
use gigledger_types::{
    AuthConfig, AuthSource, GigledgerError, Result, Role, Session, SessionId, User, UserId,
};
use gigledger_wallet::{LedgerStore, Wallet};

use crate::password::PasswordPolicy;
use crate::provider::{ExternalIdentity, IdentityProvider};
use crate::session::SessionStore;
use crate::throttle::LoginThrottle;
use crate::token::{TokenClaims, TokenSigner, is_local_token};

/// Why the local check could not authenticate a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    UnknownUser,
    NoLocalCredentials,
    WrongPassword,
}

/// Result of the local half of a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOutcome {
    Authenticated(User),
    Fallback(Fallback),
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub session: Session,
    /// Bearer token for subsequent requests.
    pub token: String,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: User,
    pub source: AuthSource,
    /// `None` for requests carrying a provider access token.
    pub session_id: Option<SessionId>,
}

impl Principal {
    #[must_use]
    pub fn id(&self) -> UserId {
        self.user.id
    }

    /// # Errors
    /// `Unauthorized` unless the caller has `role`.
    pub fn require_role(&self, role: Role, action: &str) -> Result<()> {
        if self.user.role == role {
            Ok(())
        } else {
            Err(GigledgerError::Unauthorized {
                actor: self.user.id,
                action: action.to_string(),
            })
        }
    }
}

fn now_ms(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp_millis()).unwrap_or(0)
}

pub struct HybridAuthenticator {
    config: AuthConfig,
    passwords: PasswordPolicy,
    signer: TokenSigner,
    sessions: SessionStore,
    throttle: LoginThrottle,
}

impl HybridAuthenticator {
    /// Default password cost; signing key from `config` or freshly generated.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let passwords = PasswordPolicy::new(config.min_password_len);
        let signer = TokenSigner::from_config(&config)?;
        Self::with_parts(config, passwords, signer)
    }

    /// # Errors
    /// `Configuration` for an unusable session lifetime.
    pub fn with_parts(
        config: AuthConfig,
        passwords: PasswordPolicy,
        signer: TokenSigner,
    ) -> Result<Self> {
        let sessions = SessionStore::new(config.session_ttl_secs)?;
        let throttle = LoginThrottle::new(config.login_window_ms, config.max_login_attempts);
        tracing::info!(
            key = %signer.fingerprint(),
            provider = %config.provider_name,
            "Authenticator ready"
        );
        Ok(Self {
            config,
            passwords,
            signer,
            sessions,
            throttle,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    pub fn passwords(&self) -> &PasswordPolicy {
        &self.passwords
    }

    // -----------------------------------------------------------------------
    // Local accounts
    // -----------------------------------------------------------------------

    /// Create a user who signs in with a local password.
    ///
    /// # Errors
    /// `WeakPassword`, or `DuplicateUser` if the email is taken.
    pub fn register_local<S: LedgerStore>(
        &self,
        wallet: &mut Wallet<S>,
        email: &str,
        display_name: &str,
        role: Role,
        password: &str,
    ) -> Result<User> {
        let mut user = User::new(email, display_name, role);
        user.password_hash = Some(self.passwords.hash(password)?);
        wallet.register_user(user)
    }

    /// Replace a user's local password and end their existing sessions.
    pub fn set_password<S: LedgerStore>(
        &mut self,
        wallet: &mut Wallet<S>,
        user: UserId,
        password: &str,
    ) -> Result<User> {
        let mut profile = wallet.store().require_user(user)?;
        profile.password_hash = Some(self.passwords.hash(password)?);
        let updated = wallet.update_profile(profile)?;
        self.sessions.revoke_all_for(user);
        tracing::info!(user = %user, "Local password changed");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Throttle check, then the local argon2 check.
    ///
    /// # Errors
    /// `TooManyAttempts` while throttled, `PasswordHash` for a corrupt
    /// stored hash.
    pub fn try_local<S: LedgerStore>(
        &mut self,
        store: &S,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<LocalOutcome> {
        self.throttle.check(email, now_ms(now))?;
        let Some(user) = store.user_by_email(email)? else {
            return Ok(LocalOutcome::Fallback(Fallback::UnknownUser));
        };
        let Some(phc) = user.password_hash.as_deref() else {
            return Ok(LocalOutcome::Fallback(Fallback::NoLocalCredentials));
        };
        if self.passwords.verify(password, phc)? {
            Ok(LocalOutcome::Authenticated(user))
        } else {
            Ok(LocalOutcome::Fallback(Fallback::WrongPassword))
        }
    }

    /// Issue a session and token for an authenticated user.
    pub fn start_session(
        &mut self,
        user: User,
        source: AuthSource,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess> {
        let session = self.sessions.issue(user.id, source, now)?;
        let token = self.signer.issue(&TokenClaims::for_session(&session))?;
        self.throttle.reset(&user.email);
        tracing::info!(
            user = %user.id,
            session = %session.id,
            source = %session.source,
            "Login succeeded"
        );
        Ok(LoginSuccess {
            user,
            session,
            token,
        })
    }

    /// Count a rejected login against `email`.
    pub fn record_failure(&mut self, email: &str, now: DateTime<Utc>) {
        self.throttle.record_failure(email, now_ms(now));
        tracing::warn!(
            email = %email,
            failures = self.throttle.failures(email),
            "Login failed"
        );
    }

    /// The local user behind an external identity: linked by subject, else
    /// linked now by email, else provisioned when allowed.
    ///
    /// # Errors
    /// `UnlinkedIdentity` if no user matches and provisioning is off, or the
    /// matching user is linked to a different subject.
    pub fn resolve_external<S: LedgerStore>(
        &self,
        wallet: &mut Wallet<S>,
        identity: &ExternalIdentity,
    ) -> Result<User> {
        if let Some(user) = wallet.store().user_by_external_subject(&identity.subject)? {
            return Ok(user);
        }

        if let Some(mut user) = wallet.store().user_by_email(&identity.email)? {
            if let Some(existing) = &user.external_subject {
                return Err(GigledgerError::UnlinkedIdentity(format!(
                    "{} is linked to subject {existing}, not {}",
                    user.email, identity.subject
                )));
            }
            user.external_subject = Some(identity.subject.clone());
            let user = wallet.update_profile(user)?;
            tracing::info!(
                user = %user.id,
                provider = %identity.provider,
                "External identity linked to existing user"
            );
            return Ok(user);
        }

        if !self.config.provision_external_users {
            return Err(GigledgerError::UnlinkedIdentity(identity.email.clone()));
        }
        let display_name = identity
            .email
            .split('@')
            .next()
            .unwrap_or(&identity.email)
            .to_string();
        let mut user = User::new(&identity.email, display_name, self.config.provisioned_role);
        user.external_subject = Some(identity.subject.clone());
        let user = wallet.register_user(user)?;
        tracing::info!(
            user = %user.id,
            provider = %identity.provider,
            role = %user.role,
            "User provisioned from external identity"
        );
        Ok(user)
    }

    /// Finish a login the provider accepted.
    pub fn complete_external<S: LedgerStore>(
        &mut self,
        wallet: &mut Wallet<S>,
        identity: &ExternalIdentity,
        now: DateTime<Utc>,
    ) -> Result<LoginSuccess> {
        let user = self.resolve_external(wallet, identity)?;
        let source = AuthSource::External {
            provider: identity.provider.clone(),
        };
        self.start_session(user, source, now)
    }

    /// Full login against a wallet the caller owns.
    ///
    /// # Errors
    /// `InvalidCredentials` when both checks reject, `TooManyAttempts`
    /// while throttled, `ProviderUnavailable` if the provider is needed and
    /// down.
    pub async fn login<S, P>(
        &mut self,
        wallet: &mut Wallet<S>,
        provider: &P,
        email: &str,
        password: &str,
    ) -> Result<LoginSuccess>
    where
        S: LedgerStore,
        P: IdentityProvider,
    {
        let now = Utc::now();
        match self.try_local(wallet.store(), email, password, now)? {
            LocalOutcome::Authenticated(user) => {
                return self.start_session(user, AuthSource::Local, now);
            }
            LocalOutcome::Fallback(reason) => {
                tracing::debug!(email = %email, ?reason, provider = provider.name(), "Falling back to external provider");
            }
        }

        match provider.sign_in(email, password).await? {
            Some(identity) => self.complete_external(wallet, &identity, Utc::now()),
            None => {
                self.record_failure(email, now);
                Err(GigledgerError::InvalidCredentials)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Check a locally issued token and its session.
    ///
    /// # Errors
    /// `TokenInvalid`, `TokenExpired`, `SessionRevoked`, or `UserNotFound`
    /// if the user has since been removed.
    pub fn verify_local<S: LedgerStore>(
        &self,
        store: &S,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Principal> {
        let claims = self.signer.verify(token, now)?;
        let session = self
            .sessions
            .validate(claims.session_id, claims.user_id, now)?;
        let user = store.require_user(claims.user_id)?;
        Ok(Principal {
            user,
            source: session.source.clone(),
            session_id: Some(session.id),
        })
    }

    /// Authenticate a bearer token: local tokens locally, everything else
    /// with the provider.
    pub async fn authenticate<S, P>(
        &self,
        wallet: &mut Wallet<S>,
        provider: &P,
        bearer: &str,
    ) -> Result<Principal>
    where
        S: LedgerStore,
        P: IdentityProvider,
    {
        if is_local_token(bearer) {
            return self.verify_local(wallet.store(), bearer, Utc::now());
        }
        let identity = provider
            .verify_access_token(bearer)
            .await?
            .ok_or_else(|| GigledgerError::TokenInvalid {
                reason: format!("not recognized by {}", provider.name()),
            })?;
        let user = self.resolve_external(wallet, &identity)?;
        Ok(Principal {
            user,
            source: AuthSource::External {
                provider: identity.provider,
            },
            session_id: None,
        })
    }

    /// End the session named by a local token. Returns whether a live
    /// session was revoked. Expired tokens are accepted.
    pub fn logout(&mut self, token: &str) -> Result<bool> {
        let claims = self.signer.decode(token)?;
        Ok(self.sessions.revoke(claims.session_id))
    }

    pub fn revoke_all(&mut self, user: UserId) -> usize {
        self.sessions.revoke_all_for(user)
    }

    /// Drop expired or revoked sessions and aged-out throttle windows.
    /// Returns the number of sessions dropped.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let windows = self.throttle.purge(now_ms(now));
        if windows > 0 {
            tracing::debug!(windows, "Throttle windows purged");
        }
        self.sessions.purge_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, NoProvider};
    use gigledger_types::WalletConfig;
    use gigledger_wallet::MemoryStore;

    fn setup(provision: bool) -> (HybridAuthenticator, Wallet<MemoryStore>) {
        let config = AuthConfig {
            provision_external_users: provision,
            max_login_attempts: 3,
            ..AuthConfig::default()
        };
        let auth = HybridAuthenticator::with_parts(
            config,
            PasswordPolicy::fast(8).unwrap(),
            TokenSigner::generate(),
        )
        .unwrap();
        let wallet = Wallet::new(MemoryStore::new(), WalletConfig::default());
        (auth, wallet)
    }

    fn provider() -> MemoryProvider {
        MemoryProvider::new("supabase")
            .with_account("ext@example.com", "remote-pass-1", "sb-ext")
            .with_account("both@example.com", "remote-pass-2", "sb-both")
    }

    #[tokio::test]
    async fn local_password_wins() {
        let (mut auth, mut wallet) = setup(true);
        let user = auth
            .register_local(&mut wallet, "ana@example.com", "Ana", Role::Client, "local-pass-1")
            .unwrap();
        let ok = auth
            .login(&mut wallet, &NoProvider, "ANA@example.com", "local-pass-1")
            .await
            .unwrap();
        assert_eq!(ok.user.id, user.id);
        assert_eq!(ok.session.source, AuthSource::Local);

        let principal = auth
            .authenticate(&mut wallet, &NoProvider, &ok.token)
            .await
            .unwrap();
        assert_eq!(principal.id(), user.id);
        assert_eq!(principal.session_id, Some(ok.session.id));
    }

    #[tokio::test]
    async fn wrong_local_password_falls_back_to_provider() {
        let (mut auth, mut wallet) = setup(true);
        let local = auth
            .register_local(&mut wallet, "both@example.com", "Both", Role::Freelancer, "local-pass-2")
            .unwrap();
        let ok = auth
            .login(&mut wallet, &provider(), "both@example.com", "remote-pass-2")
            .await
            .unwrap();
        assert_eq!(ok.user.id, local.id);
        assert_eq!(ok.user.external_subject.as_deref(), Some("sb-both"));
        assert!(ok.session.source.is_external());
        // Local credentials survive linking.
        assert!(ok.user.has_local_credentials());
    }

    #[tokio::test]
    async fn unknown_user_is_provisioned() {
        let (mut auth, mut wallet) = setup(true);
        let ok = auth
            .login(&mut wallet, &provider(), "ext@example.com", "remote-pass-1")
            .await
            .unwrap();
        assert_eq!(ok.user.role, Role::Client);
        assert_eq!(ok.user.display_name, "ext");
        assert!(!ok.user.has_local_credentials());

        // Second login reuses the linked user.
        let again = auth
            .login(&mut wallet, &provider(), "ext@example.com", "remote-pass-1")
            .await
            .unwrap();
        assert_eq!(again.user.id, ok.user.id);
        assert_eq!(wallet.store().users().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provisioning_disabled() {
        let (mut auth, mut wallet) = setup(false);
        let err = auth
            .login(&mut wallet, &provider(), "ext@example.com", "remote-pass-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::UnlinkedIdentity(_)));
        assert!(wallet.store().users().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_are_throttled() {
        let (mut auth, mut wallet) = setup(true);
        auth.register_local(&mut wallet, "ana@example.com", "Ana", Role::Client, "local-pass-1")
            .unwrap();
        for _ in 0..3 {
            let err = auth
                .login(&mut wallet, &provider(), "ana@example.com", "nope-nope-1")
                .await
                .unwrap_err();
            assert!(matches!(err, GigledgerError::InvalidCredentials));
        }
        let err = auth
            .login(&mut wallet, &provider(), "ana@example.com", "local-pass-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::TooManyAttempts { .. }));
    }

    #[test]
    fn sweep_forgets_stale_failures() {
        let (mut auth, _wallet) = setup(true);
        let start = Utc::now();
        for i in 0..50 {
            auth.record_failure(&format!("spray{i}@example.com"), start);
        }
        assert_eq!(auth.throttle().tracked(), 50);

        let window = chrono::Duration::milliseconds(
            i64::try_from(auth.config().login_window_ms).unwrap(),
        );
        auth.purge_expired(start + window + chrono::Duration::seconds(1));
        assert_eq!(auth.throttle().tracked(), 0);
    }

    #[tokio::test]
    async fn provider_outage_surfaces() {
        let (mut auth, mut wallet) = setup(true);
        let p = provider();
        p.set_offline(true);
        let err = auth
            .login(&mut wallet, &p, "ext@example.com", "remote-pass-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn provider_access_token_authenticates() {
        let (auth, mut wallet) = setup(true);
        let p = provider();
        let token = p.access_token_for("ext@example.com").unwrap();
        let principal = auth.authenticate(&mut wallet, &p, &token).await.unwrap();
        assert_eq!(principal.user.email, "ext@example.com");
        assert!(principal.session_id.is_none());

        let err = auth
            .authenticate(&mut wallet, &p, "supabase-at-unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::TokenInvalid { .. }));
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let (mut auth, mut wallet) = setup(true);
        auth.register_local(&mut wallet, "ana@example.com", "Ana", Role::Client, "local-pass-1")
            .unwrap();
        let ok = auth
            .login(&mut wallet, &NoProvider, "ana@example.com", "local-pass-1")
            .await
            .unwrap();
        assert!(auth.logout(&ok.token).unwrap());
        let err = auth
            .authenticate(&mut wallet, &NoProvider, &ok.token)
            .await
            .unwrap_err();
        assert!(matches!(err, GigledgerError::SessionRevoked));
    }

    #[tokio::test]
    async fn password_change_ends_sessions() {
        let (mut auth, mut wallet) = setup(true);
        let user = auth
            .register_local(&mut wallet, "ana@example.com", "Ana", Role::Client, "local-pass-1")
            .unwrap();
        let ok = auth
            .login(&mut wallet, &NoProvider, "ana@example.com", "local-pass-1")
            .await
            .unwrap();
        auth.set_password(&mut wallet, user.id, "local-pass-2").unwrap();
        assert!(auth.verify_local(wallet.store(), &ok.token, Utc::now()).is_err());
        assert!(auth
            .login(&mut wallet, &NoProvider, "ana@example.com", "local-pass-2")
            .await
            .is_ok());
    }

    #[test]
    fn subject_conflict_is_rejected() {
        let (auth, mut wallet) = setup(true);
        let mut user = User::new("dup@example.com", "Dup", Role::Client);
        user.external_subject = Some("sb-old".into());
        wallet.register_user(user).unwrap();
        let identity = ExternalIdentity {
            provider: "supabase".into(),
            subject: "sb-new".into(),
            email: "dup@example.com".into(),
        };
        let err = auth.resolve_external(&mut wallet, &identity).unwrap_err();
        assert!(matches!(err, GigledgerError::UnlinkedIdentity(_)));
    }
}
