//! Capability checks for workflow actions.
//!
//! Pure, no side effects. Evaluated before the status machine's precondition
//! check; a denial short-circuits with no state mutation and no effects.

use serde::{Deserialize, Serialize};

use crate::models::party::{PartyKind, PartyRef};
use crate::models::request::{TransitionAction, WorkflowRequest};

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actor", rename_all = "snake_case")]
pub enum Actor {
    /// Background jobs (the expiry sweeper).
    System,
    /// A marketplace party, admins included.
    Party(PartyRef),
}

impl Actor {
    pub fn party(&self) -> Option<PartyRef> {
        match self {
            Actor::System => None,
            Actor::Party(p) => Some(*p),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Party(p) if p.kind() == PartyKind::Admin)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::System => write!(f, "system"),
            Actor::Party(p) => write!(f, "{}", p),
        }
    }
}

/// What an actor is trying to do to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewAny,
    View,
    Transition(TransitionAction),
}

/// Capability check, polymorphic over entity kind. The rules follow the same
/// shape for every kind: admins review, owners drive their own requests.
pub fn can(actor: &Actor, cap: Capability, request: &WorkflowRequest) -> bool {
    if actor.is_admin() {
        // Admins may do everything except impersonate the requester's
        // submit/withdraw (a draft belongs to its owner).
        return match cap {
            Capability::Transition(TransitionAction::Submit)
            | Capability::Transition(TransitionAction::Withdraw) => is_owner(actor, request),
            _ => true,
        };
    }

    let owner = is_owner(actor, request);
    match cap {
        Capability::ViewAny => false,
        Capability::View => owner || is_counterpart(actor, request),
        Capability::Transition(action) => match action {
            TransitionAction::Submit | TransitionAction::Withdraw => owner,
            TransitionAction::Activate | TransitionAction::Deactivate => owner,
            TransitionAction::Expire => matches!(actor, Actor::System),
            TransitionAction::Approve | TransitionAction::Reject => false,
        },
    }
}

fn is_owner(actor: &Actor, request: &WorkflowRequest) -> bool {
    actor.party() == Some(request.owner)
}

fn is_counterpart(actor: &Actor, request: &WorkflowRequest) -> bool {
    actor.party() == Some(request.counterpart)
}

// ── Tests ───────────────────────────────────────────────────────
