//! The status machine: pure transition logic over workflow requests.
//!
//! `transition` never performs I/O. It validates the action against the
//! current status, produces the mutated snapshot, and returns the list of
//! effects (notify / invalidate / broadcast) the caller must enqueue after
//! the mutation commits. Actor legality is the gate's job, not ours — the
//! actor is only used here to stamp the approver and to tag the event.

use chrono::{DateTime, Utc};

use crate::models::request::{
    RequestKind, RequestStatus, TransitionAction, TransitionInput, WorkflowRequest,
};

use super::effects::{Effect, TransitionEvent};
use super::gate::Actor;

/// Why a transition was refused. Converted to `AppError` at the API edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} a request in status {from}", action = action.as_str(), from = from.as_str())]
    IllegalState {
        from: RequestStatus,
        action: TransitionAction,
    },

    #[error("invalid transition input: {0}")]
    Validation(String),
}

/// Input validation, surfaced before any state check.
pub fn validate(action: TransitionAction, input: &TransitionInput) -> Result<(), TransitionError> {
    if action == TransitionAction::Reject
        && input
            .rejection_reason
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        return Err(TransitionError::Validation(
            "rejection requires a rejection_reason".into(),
        ));
    }
    Ok(())
}

/// Target status for an action from a given state, or None if illegal.
fn target(kind: RequestKind, from: RequestStatus, action: TransitionAction) -> Option<RequestStatus> {
    use RequestStatus::*;
    use TransitionAction::*;
    match (from, action) {
        (Draft, Submit) => Some(Pending),
        (Pending, Approve) => Some(Approved),
        (Pending, Reject) => Some(Rejected),
        // The requester pulls a pending request back for editing.
        (Pending, Withdraw) => Some(Draft),
        (Pending, Expire) => Some(Expired),
        // Active/inactive toggle on resolved listings only.
        (Approved, Deactivate) if kind.is_listing() => Some(Withdrawn),
        (Withdrawn, Activate) if kind.is_listing() => Some(Approved),
        _ => None,
    }
}

/// Apply `action` to `request`, returning the mutated snapshot and the
/// effects to enqueue once it commits.
///
/// Resolution fields are written once: a request approved after an earlier
/// rejection cycle keeps its history untouched (there is no such path today,
/// but the stamping below only ever fills empty fields).
pub fn transition(
    request: &WorkflowRequest,
    action: TransitionAction,
    actor: &Actor,
    input: &TransitionInput,
    now: DateTime<Utc>,
) -> Result<(WorkflowRequest, Vec<Effect>), TransitionError> {
    validate(action, input)?;

    let to = target(request.kind, request.status, action).ok_or(TransitionError::IllegalState {
        from: request.status,
        action,
    })?;

    // Expiry only fires once the deadline has actually passed.
    if action == TransitionAction::Expire {
        match request.expires_at {
            Some(deadline) if now >= deadline => {}
            _ => {
                return Err(TransitionError::IllegalState {
                    from: request.status,
                    action,
                })
            }
        }
    }

    let mut updated = request.clone();
    updated.status = to;
    updated.updated_at = now;

    if let Some(notes) = &input.notes {
        updated.notes = Some(notes.clone());
    }

    match action {
        TransitionAction::Approve => {
            updated.approved_at = Some(now);
            updated.approver = actor.party();
        }
        TransitionAction::Reject => {
            updated.rejected_at = Some(now);
            updated.approver = actor.party();
            updated.rejection_reason = input.rejection_reason.clone();
        }
        _ => {}
    }

    let event = TransitionEvent::new(updated.clone(), action, actor.clone(), now);
    Ok((updated, plan_effects(event)))
}

/// Static effect plan: every transition notifies and broadcasts; resolved-state
/// changes on listing kinds additionally invalidate the public listing caches.
/// Service-request transitions never touch listing caches.
fn plan_effects(event: TransitionEvent) -> Vec<Effect> {
    use TransitionAction::*;

    let kind = event.request.kind;
    let invalidates = kind.is_listing()
        && matches!(event.action, Approve | Reject | Expire | Activate | Deactivate);

    let mut effects = vec![Effect::Notify(event.clone())];
    if invalidates {
        effects.push(Effect::InvalidateListings(kind));
    }
    effects.push(Effect::Broadcast(event));
    effects
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::party::PartyRef;
    use crate::workflow::gate::Actor;
    use uuid::Uuid;

    fn sample(kind: RequestKind, status: RequestStatus) -> WorkflowRequest {
        let now = Utc::now();
        WorkflowRequest {
            id: Uuid::new_v4(),
            kind,
            owner: PartyRef::Customer(Uuid::new_v4()),
            counterpart: PartyRef::Agent(Uuid::new_v4()),
            subject_id: Uuid::new_v4(),
            status,
            approver: None,
            notes: None,
            rejection_reason: None,
            priority: 0,
            expires_at: None,
            approved_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn admin() -> Actor {
        Actor::Party(PartyRef::Admin(Uuid::new_v4()))
    }

    #[test]
    fn test_submit_moves_draft_to_pending() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Draft);
        let (updated, _) = transition(
            &req,
            TransitionAction::Submit,
            &Actor::Party(req.owner),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Pending);
        assert!(updated.approved_at.is_none());
    }

    #[test]
    fn test_approve_stamps_approved_at_and_approver() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Pending);
        let actor = admin();
        let now = Utc::now();
        let (updated, _) = transition(
            &req,
            TransitionAction::Approve,
            &actor,
            &TransitionInput {
                notes: Some("ok".into()),
                rejection_reason: None,
            },
            now,
        )
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);
        assert_eq!(updated.approved_at, Some(now));
        assert_eq!(updated.approver, actor.party());
        assert_eq!(updated.notes.as_deref(), Some("ok"));
        assert!(updated.rejected_at.is_none());
        assert!(updated.rejection_reason.is_none());
    }

    #[test]
    fn test_reject_requires_reason() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Pending);
        let err = transition(
            &req,
            TransitionAction::Reject,
            &admin(),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Validation(_)));
    }

    #[test]
    fn test_reject_stamps_reason_not_approved_at() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Pending);
        let (updated, _) = transition(
            &req,
            TransitionAction::Reject,
            &admin(),
            &TransitionInput {
                notes: None,
                rejection_reason: Some("incomplete documents".into()),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Rejected);
        assert!(updated.rejected_at.is_some());
        assert_eq!(
            updated.rejection_reason.as_deref(),
            Some("incomplete documents")
        );
        // Invariant: approved_at and rejection_reason never coexist.
        assert!(updated.approved_at.is_none());
    }

    #[test]
    fn test_resolved_request_refuses_opposite_action() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Pending);
        let (approved, _) = transition(
            &req,
            TransitionAction::Approve,
            &admin(),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();

        let err = transition(
            &approved,
            TransitionAction::Reject,
            &admin(),
            &TransitionInput {
                notes: None,
                rejection_reason: Some("too late".into()),
            },
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::IllegalState {
                from: RequestStatus::Approved,
                action: TransitionAction::Reject
            }
        );
        // Timestamps untouched on the failed path: the snapshot we hold is
        // the same one we approved.
        assert!(approved.rejected_at.is_none());
    }

    #[test]
    fn test_withdraw_returns_pending_to_draft() {
        let req = sample(RequestKind::FeaturedRequest, RequestStatus::Pending);
        let (updated, _) = transition(
            &req,
            TransitionAction::Withdraw,
            &Actor::Party(req.owner),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Draft);
    }

    #[test]
    fn test_expire_requires_elapsed_deadline() {
        let mut req = sample(RequestKind::FeaturedRequest, RequestStatus::Pending);
        req.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        let err = transition(
            &req,
            TransitionAction::Expire,
            &Actor::System,
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::IllegalState { .. }));

        req.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let (updated, _) = transition(
            &req,
            TransitionAction::Expire,
            &Actor::System,
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(updated.status, RequestStatus::Expired);
    }

    #[test]
    fn test_toggle_only_for_listing_kinds() {
        let listing = sample(RequestKind::Ad, RequestStatus::Approved);
        let (off, _) = transition(
            &listing,
            TransitionAction::Deactivate,
            &Actor::Party(listing.owner),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(off.status, RequestStatus::Withdrawn);

        let (on, _) = transition(
            &off,
            TransitionAction::Activate,
            &Actor::Party(listing.owner),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(on.status, RequestStatus::Approved);

        let service = sample(RequestKind::ServiceRequest, RequestStatus::Approved);
        assert!(transition(
            &service,
            TransitionAction::Deactivate,
            &admin(),
            &TransitionInput::default(),
            Utc::now(),
        )
        .is_err());
    }

    #[test]
    fn test_listing_resolution_invalidates_caches() {
        let req = sample(RequestKind::Ad, RequestStatus::Pending);
        let (_, effects) = transition(
            &req,
            TransitionAction::Approve,
            &admin(),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::InvalidateListings(RequestKind::Ad))));
    }

    #[test]
    fn test_service_request_never_invalidates_caches() {
        let req = sample(RequestKind::ServiceRequest, RequestStatus::Pending);
        let (_, effects) = transition(
            &req,
            TransitionAction::Approve,
            &admin(),
            &TransitionInput::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::InvalidateListings(_))));
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify(_))));
        assert!(effects.iter().any(|e| matches!(e, Effect::Broadcast(_))));
    }
}
