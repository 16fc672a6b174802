//! Who may move escrowed funds.
//!
//! | action          | allowed actors                                   |
//! |-----------------|--------------------------------------------------|
//! | hold            | the contract's client                            |
//! | release         | client, admin, QA, or the designated supervisor  |
//! | refund          | freelancer (giving money back), admin, QA        |
//! | open dispute    | client or freelancer                             |
//! | resolve dispute | admin                                            |
//! | adjust balance  | admin                                            |

use std::fmt;

use gigledger_types::{Contract, GigledgerError, Result, Role, User};

/// An escrow operation subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscrowAction {
    Hold,
    Release,
    Refund,
    OpenDispute,
    ResolveDispute,
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold => write!(f, "hold escrow"),
            Self::Release => write!(f, "release escrow"),
            Self::Refund => write!(f, "refund escrow"),
            Self::OpenDispute => write!(f, "open a dispute"),
            Self::ResolveDispute => write!(f, "resolve a dispute"),
        }
    }
}

#[must_use]
pub fn is_permitted(actor: &User, contract: &Contract, action: EscrowAction) -> bool {
    match action {
        EscrowAction::Hold => actor.id == contract.client_id,
        EscrowAction::Release => {
            actor.id == contract.client_id
                || actor.role.is_staff()
                || contract.is_supervisor(actor.id)
        }
        EscrowAction::Refund => actor.id == contract.freelancer_id || actor.role.is_staff(),
        EscrowAction::OpenDispute => contract.is_party(actor.id),
        EscrowAction::ResolveDispute => actor.role == Role::Admin,
    }
}

/// # Errors
/// Returns `Unauthorized` naming the action and contract.
pub fn authorize(actor: &User, contract: &Contract, action: EscrowAction) -> Result<()> {
    if is_permitted(actor, contract, action) {
        Ok(())
    } else {
        Err(GigledgerError::Unauthorized {
            actor: actor.id,
            action: format!("{action} on {}", contract.id),
        })
    }
}

/// Manual balance corrections are admin-only.
pub fn authorize_adjustment(actor: &User) -> Result<()> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(GigledgerError::Unauthorized {
            actor: actor.id,
            action: "adjust wallet balances".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cast {
        client: User,
        freelancer: User,
        supervisor: User,
        admin: User,
        qa: User,
        stranger: User,
        contract: Contract,
    }

    fn cast() -> Cast {
        let client = User::dummy(Role::Client);
        let freelancer = User::dummy(Role::Freelancer);
        let supervisor = User::dummy(Role::Client);
        let contract =
            Contract::new(client.id, freelancer.id, "Landing page").with_supervisor(supervisor.id);
        Cast {
            client,
            freelancer,
            supervisor,
            admin: User::dummy(Role::Admin),
            qa: User::dummy(Role::Qa),
            stranger: User::dummy(Role::Client),
            contract,
        }
    }

    #[test]
    fn release_actors() {
        let c = cast();
        for actor in [&c.client, &c.admin, &c.qa, &c.supervisor] {
            assert!(is_permitted(actor, &c.contract, EscrowAction::Release));
        }
        for actor in [&c.freelancer, &c.stranger] {
            assert!(!is_permitted(actor, &c.contract, EscrowAction::Release));
        }
    }

    #[test]
    fn refund_actors() {
        let c = cast();
        for actor in [&c.freelancer, &c.admin, &c.qa] {
            assert!(is_permitted(actor, &c.contract, EscrowAction::Refund));
        }
        for actor in [&c.client, &c.supervisor, &c.stranger] {
            assert!(!is_permitted(actor, &c.contract, EscrowAction::Refund));
        }
    }

    #[test]
    fn only_client_holds() {
        let c = cast();
        assert!(is_permitted(&c.client, &c.contract, EscrowAction::Hold));
        assert!(!is_permitted(&c.admin, &c.contract, EscrowAction::Hold));
        assert!(!is_permitted(&c.freelancer, &c.contract, EscrowAction::Hold));
    }

    #[test]
    fn disputes() {
        let c = cast();
        assert!(is_permitted(&c.client, &c.contract, EscrowAction::OpenDispute));
        assert!(is_permitted(&c.freelancer, &c.contract, EscrowAction::OpenDispute));
        assert!(!is_permitted(&c.supervisor, &c.contract, EscrowAction::OpenDispute));
        assert!(is_permitted(&c.admin, &c.contract, EscrowAction::ResolveDispute));
        assert!(!is_permitted(&c.qa, &c.contract, EscrowAction::ResolveDispute));
    }

    #[test]
    fn unauthorized_error_names_action() {
        let c = cast();
        let err = authorize(&c.stranger, &c.contract, EscrowAction::Release).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GL_ERR_601"));
        assert!(msg.contains("release escrow"));
    }

    #[test]
    fn adjustments_admin_only() {
        let c = cast();
        assert!(authorize_adjustment(&c.admin).is_ok());
        assert!(authorize_adjustment(&c.qa).is_err());
    }
}
