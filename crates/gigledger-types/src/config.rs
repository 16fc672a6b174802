//! Configuration types for the wallet, the auth layer and the service.
//!
//! Every field has a default from [`crate::constants`], so a config file
//! only needs to name what it overrides.

use serde::{Deserialize, Serialize};

use crate::{Amount, GigledgerError, Result, Role, constants};

/// Wallet and escrow limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Request keys remembered for duplicate-call rejection.
    pub idempotency_cache_size: usize,
    /// Largest accepted single deposit.
    pub max_single_deposit: Amount,
    /// Smallest accepted withdrawal.
    pub min_withdrawal: Amount,
    /// Re-check all ledger invariants after every commit.
    pub audit_after_commit: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            idempotency_cache_size: constants::DEFAULT_IDEMPOTENCY_CACHE_SIZE,
            max_single_deposit: Amount::from_minor(constants::DEFAULT_MAX_SINGLE_DEPOSIT),
            min_withdrawal: Amount::from_minor(constants::DEFAULT_MIN_WITHDRAWAL),
            audit_after_commit: false,
        }
    }
}

/// Hybrid authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session (and token) lifetime.
    pub session_ttl_secs: i64,
    /// Hex-encoded 32-byte ed25519 seed. A random key is generated when
    /// unset, which invalidates all tokens on restart.
    pub signing_key_hex: Option<String>,
    pub min_password_len: usize,
    /// Sliding window for failed login attempts.
    pub login_window_ms: u64,
    /// Failed attempts allowed per email within the window.
    pub max_login_attempts: usize,
    /// Name recorded on sessions verified by the external provider.
    pub provider_name: String,
    /// Create a local user the first time an unknown external identity
    /// signs in. When false, such logins fail with `UnlinkedIdentity`.
    pub provision_external_users: bool,
    /// Role given to provisioned users.
    pub provisioned_role: Role,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: constants::DEFAULT_SESSION_TTL_SECS,
            signing_key_hex: None,
            min_password_len: constants::DEFAULT_MIN_PASSWORD_LEN,
            login_window_ms: constants::DEFAULT_LOGIN_WINDOW_MS,
            max_login_attempts: constants::DEFAULT_MAX_LOGIN_ATTEMPTS,
            provider_name: constants::DEFAULT_PROVIDER_NAME.to_string(),
            provision_external_users: true,
            provisioned_role: Role::Client,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub wallet: WalletConfig,
    pub auth: AuthConfig,
    /// `tracing-subscriber` env-filter directive.
    pub log_filter: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            wallet: WalletConfig::default(),
            auth: AuthConfig::default(),
            log_filter: constants::DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Parse a JSON config document and validate it.
    ///
    /// # Errors
    /// `Serialization` on malformed JSON, `Configuration` on invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.wallet.idempotency_cache_size == 0 {
            return Err(GigledgerError::Configuration(
                "wallet.idempotency_cache_size must be > 0".into(),
            ));
        }
        if !self.wallet.max_single_deposit.is_positive() {
            return Err(GigledgerError::Configuration(
                "wallet.max_single_deposit must be positive".into(),
            ));
        }
        if self.wallet.min_withdrawal.is_negative() {
            return Err(GigledgerError::Configuration(
                "wallet.min_withdrawal must not be negative".into(),
            ));
        }
        if self.auth.session_ttl_secs <= 0
            || self.auth.session_ttl_secs > constants::MAX_SESSION_TTL_SECS
        {
            return Err(GigledgerError::Configuration(format!(
                "auth.session_ttl_secs must be in 1..={}",
                constants::MAX_SESSION_TTL_SECS
            )));
        }
        if self.auth.max_login_attempts == 0 {
            return Err(GigledgerError::Configuration(
                "auth.max_login_attempts must be > 0".into(),
            ));
        }
        if self.auth.provider_name.trim().is_empty() {
            return Err(GigledgerError::Configuration(
                "auth.provider_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServiceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.auth.session_ttl_secs, 86_400);
        assert_eq!(cfg.wallet.min_withdrawal, Amount::from_minor(100));
        assert!(cfg.auth.provision_external_users);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = ServiceConfig::from_json_str(
            r#"{ "auth": { "session_ttl_secs": 600 }, "log_json": true }"#,
        )
        .unwrap();
        assert_eq!(cfg.auth.session_ttl_secs, 600);
        assert_eq!(cfg.auth.max_login_attempts, 5);
        assert!(cfg.log_json);
        assert_eq!(cfg.wallet, WalletConfig::default());
    }

    #[test]
    fn invalid_values_rejected() {
        let err = ServiceConfig::from_json_str(r#"{ "auth": { "session_ttl_secs": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, GigledgerError::Configuration(_)));
    }

    #[test]
    fn oversized_session_ttl_rejected() {
        for ttl in [
            constants::MAX_SESSION_TTL_SECS + 1,
            9_000_000_000_000,
            i64::MAX / 2,
        ] {
            let mut cfg = ServiceConfig::default();
            cfg.auth.session_ttl_secs = ttl;
            assert!(matches!(
                cfg.validate(),
                Err(GigledgerError::Configuration(_))
            ));
        }
        let mut cfg = ServiceConfig::default();
        cfg.auth.session_ttl_secs = constants::MAX_SESSION_TTL_SECS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = ServiceConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, GigledgerError::Serialization(_)));
    }
}
