//! Local password hashing with Argon2id.
//!
//! Hashes are stored as PHC strings (`$argon2id$v=19$m=...`), which carry
//! their own salt and cost parameters. Verification reads the parameters
//! from the stored hash, so raising the cost only affects new hashes.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use gigledger_types::{GigledgerError, Result};
use rand::rngs::OsRng;

/// Upper bound on password length, in bytes.
pub const MAX_PASSWORD_BYTES: usize = 256;

/// Strength rules plus the Argon2 instance used for new hashes.
#[derive(Clone)]
pub struct PasswordPolicy {
    min_len: usize,
    argon: Argon2<'static>,
}

impl std::fmt::Debug for PasswordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordPolicy")
            .field("min_len", &self.min_len)
            .finish_non_exhaustive()
    }
}

impl PasswordPolicy {
    /// Default Argon2id cost parameters.
    #[must_use]
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len,
            argon: Argon2::default(),
        }
    }

    /// Custom cost: `m_cost` KiB of memory, `t_cost` passes, `p_cost` lanes.
    pub fn with_params(min_len: usize, m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| GigledgerError::Configuration(format!("argon2 params: {e}")))?;
        Ok(Self {
            min_len,
            argon: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Minimal cost, for tests.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn fast(min_len: usize) -> Result<Self> {
        Self::with_params(min_len, Params::MIN_M_COST.max(64), 1, 1)
    }

    /// # Errors
    /// `WeakPassword` describing the first rule the password breaks.
    pub fn check_strength(&self, password: &str) -> Result<()> {
        let weak = |reason: String| Err(GigledgerError::WeakPassword { reason });
        if password.chars().count() < self.min_len {
            return weak(format!("must be at least {} characters", self.min_len));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return weak(format!("must be at most {MAX_PASSWORD_BYTES} bytes"));
        }
        if !password.chars().any(char::is_alphabetic) {
            return weak("must contain a letter".into());
        }
        if password.chars().all(char::is_alphabetic) {
            return weak("must contain a digit or symbol".into());
        }
        Ok(())
    }

    /// Check strength, then hash with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        self.check_strength(password)?;
        let salt = SaltString::generate(&mut OsRng);
        let phc = self
            .argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| GigledgerError::PasswordHash(e.to_string()))?;
        Ok(phc.to_string())
    }

    /// Whether `password` matches the stored PHC string.
    ///
    /// # Errors
    /// `PasswordHash` if `phc` is malformed. A mismatch is `Ok(false)`.
    pub fn verify(&self, password: &str, phc: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(phc).map_err(|e| GigledgerError::PasswordHash(e.to_string()))?;
        match self.argon.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(GigledgerError::PasswordHash(e.to_string())),
        }
    }
}
