//! External identity providers.
//!
//! The provider is consulted only when the local check cannot authenticate
//! a login, and for bearer tokens that were not issued locally.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use gigledger_types::{GigledgerError, Result, normalize_email};
use serde::{Deserialize, Serialize};

/// A user as vouched for by the external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Provider name, recorded on the session.
    pub provider: String,
    /// Stable subject id at the provider.
    pub subject: String,
    pub email: String,
}

/// An external authority for passwords and access tokens.
///
/// `Ok(None)` means the provider answered and rejected the credentials;
/// `Err(ProviderUnavailable)` means it could not be asked.
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Option<ExternalIdentity>>> + Send;

    fn verify_access_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<ExternalIdentity>>> + Send;
}

/// Local-only deployments: every external check is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProvider;

impl IdentityProvider for NoProvider {
    fn name(&self) -> &str {
        "none"
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Option<ExternalIdentity>> {
        Ok(None)
    }

    async fn verify_access_token(&self, _token: &str) -> Result<Option<ExternalIdentity>> {
        Ok(None)
    }
}

struct DirectoryEntry {
    subject: String,
    password: String,
}

/// In-process provider backed by a fixed account directory.
///
/// Access tokens are `"{name}-at-{subject}"`. Useful for development
/// setups and tests; can be switched offline to exercise outages.
pub struct MemoryProvider {
    name: String,
    accounts: HashMap<String, DirectoryEntry>,
    offline: AtomicBool,
}

impl MemoryProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accounts: HashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Add an account with the given subject id.
    #[must_use]
    pub fn with_account(mut self, email: &str, password: &str, subject: &str) -> Self {
        self.accounts.insert(
            normalize_email(email),
            DirectoryEntry {
                subject: subject.to_string(),
                password: password.to_string(),
            },
        );
        self
    }

    /// The access token this provider would hand `email`'s owner.
    #[must_use]
    pub fn access_token_for(&self, email: &str) -> Option<String> {
        self.accounts
            .get(&normalize_email(email))
            .map(|entry| format!("{}-at-{}", self.name, entry.subject))
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GigledgerError::ProviderUnavailable {
                reason: format!("{} is offline", self.name),
            });
        }
        Ok(())
    }

    fn identity(&self, email: &str, entry: &DirectoryEntry) -> ExternalIdentity {
        ExternalIdentity {
            provider: self.name.clone(),
            subject: entry.subject.clone(),
            email: email.to_string(),
        }
    }
}

impl IdentityProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Option<ExternalIdentity>> {
        self.ensure_online()?;
        let email = normalize_email(email);
        Ok(self
            .accounts
            .get(&email)
            .filter(|entry| entry.password == password)
            .map(|entry| self.identity(&email, entry)))
    }

    async fn verify_access_token(&self, token: &str) -> Result<Option<ExternalIdentity>> {
        self.ensure_online()?;
        let Some(subject) = token
            .strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix("-at-"))
        else {
            return Ok(None);
        };
        Ok(self
            .accounts
            .iter()
            .find(|(_, entry)| entry.subject == subject)
            .map(|(email, entry)| self.identity(email, entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryProvider {
        MemoryProvider::new("supabase").with_account("Eve@Example.com", "hunter22", "sb-1")
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let p = provider();
        let id = p.sign_in("eve@example.com", "hunter22").await.unwrap().unwrap();
        assert_eq!(id.subject, "sb-1");
        assert_eq!(id.provider, "supabase");
        assert!(p.sign_in("eve@example.com", "wrong").await.unwrap().is_none());
        assert!(p.sign_in("nobody@example.com", "hunter22").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn access_tokens_resolve_to_subject() {
        let p = provider();
        let token = p.access_token_for("EVE@example.com").unwrap();
        let id = p.verify_access_token(&token).await.unwrap().unwrap();
        assert_eq!(id.email, "eve@example.com");
        assert!(p.verify_access_token("supabase-at-sb-2").await.unwrap().is_none());
        assert!(p.verify_access_token("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_provider_errors() {
        let p = provider();
        p.set_offline(true);
        let err = p.sign_in("eve@example.com", "hunter22").await.unwrap_err();
        assert!(matches!(err, GigledgerError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn no_provider_rejects_everything() {
        assert!(NoProvider.sign_in("a@b.c", "x").await.unwrap().is_none());
        assert!(NoProvider.verify_access_token("t").await.unwrap().is_none());
    }
}
