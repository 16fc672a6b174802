//! Marketplace users and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, UserId};

/// A user's platform role.
///
/// Clients fund escrow, freelancers receive releases, staff (admin and QA)
/// may release or refund on any contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Freelancer,
    Admin,
    Qa,
}

impl Role {
    /// Admin or QA.
    #[must_use]
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Admin | Self::Qa)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Freelancer => write!(f, "freelancer"),
            Self::Admin => write!(f, "admin"),
            Self::Qa => write!(f, "qa"),
        }
    }
}

/// A marketplace user as stored in the ledger's user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Normalized (trimmed, lowercase) email. Unique.
    pub email: String,
    pub display_name: String,
    pub role: Role,
    /// Argon2 PHC string. `None` for users that only sign in externally.
    pub password_hash: Option<String>,
    /// Subject id at the external identity provider, once linked.
    pub external_subject: Option<String>,
    /// Sum of the user's completed wallet ledger rows.
    pub wallet_balance: Amount,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A new user with a zero balance and no credentials.
    #[must_use]
    pub fn new(email: &str, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            display_name: display_name.into(),
            role,
            password_hash: None,
            external_subject: None,
            wallet_balance: Amount::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Whether the user can sign in with a local password.
    #[must_use]
    pub fn has_local_credentials(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Dummy user for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl User {
    /// A user with a unique `@test.local` email and no credentials.
    pub fn dummy(role: Role) -> Self {
        let mut user = Self::new("", format!("test {role}"), role);
        user.email = format!("{}@test.local", user.id.0.simple());
        user
    }
}

/// Canonical form of an email address used for lookups.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
