//! Signed session tokens.
//!
//! ```text
//! glt1.<hex(claims_json)>.<hex(ed25519_signature)>
//! ```
//!
//! The signature covers `TOKEN_SIGNING_DOMAIN || claims_json`. A token only
//! proves who it was issued to; the session it names must still be live in
//! the [`SessionStore`](crate::SessionStore) for the token to be accepted.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use gigledger_types::constants::{LOCAL_TOKEN_PREFIX, TOKEN_SIGNING_DOMAIN};
use gigledger_types::{AuthConfig, AuthSource, GigledgerError, Result, Session, SessionId, UserId};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a session token asserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub source: AuthSource,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

impl TokenClaims {
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            session_id: session.id,
            source: session.source.clone(),
            issued_at: session.created_at.timestamp(),
            expires_at: session.expires_at.timestamp(),
        }
    }
}

/// Whether `token` has the shape of a locally issued token. Anything else
/// is handed to the external identity provider.
#[must_use]
pub fn is_local_token(token: &str) -> bool {
    token
        .strip_prefix(LOCAL_TOKEN_PREFIX)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn signing_payload(claims_json: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(TOKEN_SIGNING_DOMAIN.len() + claims_json.len());
    payload.extend_from_slice(TOKEN_SIGNING_DOMAIN);
    payload.extend_from_slice(claims_json);
    payload
}

fn invalid(reason: impl Into<String>) -> GigledgerError {
    GigledgerError::TokenInvalid {
        reason: reason.into(),
    }
}

/// Issues and checks session tokens with one ed25519 key.
pub struct TokenSigner {
    key: SigningKey,
}

impl TokenSigner {
    /// Random key. Tokens do not survive a restart.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Key from a hex-encoded 32-byte seed.
    ///
    /// # Errors
    /// `Configuration` if the hex is malformed or not 32 bytes.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| GigledgerError::Configuration(format!("signing key: {e}")))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            GigledgerError::Configuration(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let signer = match &config.signing_key_hex {
            Some(seed) => Self::from_seed_hex(seed)?,
            None => {
                let signer = Self::generate();
                tracing::warn!(
                    key = %signer.fingerprint(),
                    "No signing key configured; generated an ephemeral one"
                );
                signer
            }
        };
        Ok(signer)
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Short SHA-256 fingerprint of the public key, for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key.verifying_key().as_bytes());
        hex::encode(&digest[..8])
    }

    pub fn issue(&self, claims: &TokenClaims) -> Result<String> {
        let json = serde_json::to_vec(claims)?;
        let signature = self.key.sign(&signing_payload(&json));
        Ok(format!(
            "{LOCAL_TOKEN_PREFIX}.{}.{}",
            hex::encode(&json),
            hex::encode(signature.to_bytes())
        ))
    }

    /// Check the signature and decode the claims, ignoring expiry.
    ///
    /// # Errors
    /// `TokenInvalid` for anything that is not a well-formed token signed by
    /// this key.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let mut parts = token.split('.');
        let (Some(prefix), Some(body), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three dot-separated parts"));
        };
        if prefix != LOCAL_TOKEN_PREFIX {
            return Err(invalid(format!("unknown token prefix {prefix:?}")));
        }

        let json = hex::decode(body).map_err(|e| invalid(format!("claims: {e}")))?;
        let sig_bytes = hex::decode(sig).map_err(|e| invalid(format!("signature: {e}")))?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|e| invalid(format!("signature: {e}")))?;
        self.key
            .verifying_key()
            .verify_strict(&signing_payload(&json), &signature)
            .map_err(|_| invalid("signature does not verify"))?;

        serde_json::from_slice(&json).map_err(|e| invalid(format!("claims: {e}")))
    }

    /// [`TokenSigner::decode`] plus an expiry check against `now`.
    ///
    /// # Errors
    /// `TokenInvalid`, or `TokenExpired` once `expires_at` has passed.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims> {
        let claims = self.decode(token)?;
        if now.timestamp() >= claims.expires_at {
            return Err(GigledgerError::TokenExpired);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(ttl_secs: i64) -> TokenClaims {
        let now = Utc::now();
        TokenClaims {
            user_id: UserId::new(),
            session_id: SessionId::new(),
            source: AuthSource::External {
                provider: "supabase".into(),
            },
            issued_at: now.timestamp(),
            expires_at: (now + Duration::seconds(ttl_secs)).timestamp(),
        }
    }

    #[test]
    fn issue_and_verify() {
        let signer = TokenSigner::generate();
        let c = claims(600);
        let token = signer.issue(&c).unwrap();
        assert!(is_local_token(&token));
        assert_eq!(signer.verify(&token, Utc::now()).unwrap(), c);
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::generate();
        let token = signer.issue(&claims(60)).unwrap();
        let later = Utc::now() + Duration::seconds(61);
        assert!(matches!(
            signer.verify(&token, later).unwrap_err(),
            GigledgerError::TokenExpired
        ));
        assert!(signer.decode(&token).is_ok());
    }

    #[test]
    fn other_key_rejected() {
        let token = TokenSigner::generate().issue(&claims(60)).unwrap();
        let err = TokenSigner::generate().decode(&token).unwrap_err();
        assert!(matches!(err, GigledgerError::TokenInvalid { .. }));
    }

    #[test]
    fn tampered_claims_rejected() {
        let signer = TokenSigner::generate();
        let token = signer.issue(&claims(60)).unwrap();
        let mut forged = claims(60);
        forged.expires_at += 1_000_000;
        let forged_body = hex::encode(serde_json::to_vec(&forged).unwrap());
        let sig = token.rsplit('.').next().unwrap();
        let forged_token = format!("{LOCAL_TOKEN_PREFIX}.{forged_body}.{sig}");
        assert!(signer.decode(&forged_token).is_err());
    }

    #[test]
    fn malformed_tokens_rejected() {
        let signer = TokenSigner::generate();
        for token in ["", "glt1", "glt1.zz.zz", "glt1.00.00.00", "jwt.abc.def"] {
            assert!(signer.decode(token).is_err(), "{token:?} should not decode");
        }
    }

    #[test]
    fn seeded_keys_are_stable() {
        let seed = "11".repeat(32);
        let a = TokenSigner::from_seed_hex(&seed).unwrap();
        let b = TokenSigner::from_seed_hex(&seed).unwrap();
        let token = a.issue(&claims(60)).unwrap();
        assert!(b.decode(&token).is_ok());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(TokenSigner::from_seed_hex("abcd").is_err());
    }

    #[test]
    fn external_tokens_are_not_local() {
        assert!(!is_local_token("eyJhbGciOiJIUzI1NiJ9.payload.sig"));
        assert!(!is_local_token("glt10.x.y"));
    }
}
