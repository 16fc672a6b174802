//! # gigledger-auth
//!
//! Hybrid authentication for the marketplace: a local Argon2 password check
//! first, then an external identity provider as fallback. Both paths end in
//! a server-side [`Session`](gigledger_types::Session) and an ed25519-signed
//! bearer token tagged with where the login was verified.
//!
//! ## Modules
//!
//! - [`password`]: Argon2id hashing and strength rules
//! - [`token`]: `glt1.` session tokens
//! - [`session`]: issue, validate and revoke sessions
//! - [`provider`]: the [`IdentityProvider`] seam and in-process providers
//! - [`throttle`]: sliding-window failed-login limiter
//! - [`hybrid`]: [`HybridAuthenticator`], which ties them together

pub mod hybrid;
pub mod password;
pub mod provider;
pub mod session;
pub mod throttle;
pub mod token;

pub use hybrid::{Fallback, HybridAuthenticator, LocalOutcome, LoginSuccess, Principal};
pub use password::PasswordPolicy;
pub use provider::{ExternalIdentity, IdentityProvider, MemoryProvider, NoProvider};
pub use session::SessionStore;
pub use throttle::LoginThrottle;
pub use token::{TokenClaims, TokenSigner, is_local_token};
