//! The slice of a contract record that escrow needs: who pays, who gets
//! paid, and who else may sign off on a release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContractId, UserId};

/// A contract between a client and a freelancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    /// The paying party. Funds the escrow.
    pub client_id: UserId,
    /// The paid party. Receives releases.
    pub freelancer_id: UserId,
    /// Optional third party designated by the client to approve releases.
    pub supervisor_id: Option<UserId>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Contract {
    #[must_use]
    pub fn new(client_id: UserId, freelancer_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: ContractId::new(),
            client_id,
            freelancer_id,
            supervisor_id: None,
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_supervisor(mut self, supervisor_id: UserId) -> Self {
        self.supervisor_id = Some(supervisor_id);
        self
    }

    /// Client or freelancer.
    #[must_use]
    pub fn is_party(&self, user: UserId) -> bool {
        user == self.client_id || user == self.freelancer_id
    }

    #[must_use]
    pub fn is_supervisor(&self, user: UserId) -> bool {
        self.supervisor_id == Some(user)
    }
}
