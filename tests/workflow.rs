//! Lifecycle walks through the status machine, gate, effect planning, and
//! broadcast hub — the full transition pipeline minus the database.

use chrono::{Duration, Utc};
use uuid::Uuid;

use seferet::broadcast::Hub;
use seferet::models::party::PartyRef;
use seferet::models::request::{
    RequestKind, RequestStatus, TransitionAction, TransitionInput, WorkflowRequest,
};
use seferet::notify::dispatcher::recipients_for;
use seferet::workflow::effects::{channels_for, Channel, Effect};
use seferet::workflow::gate::{self, Actor, Capability};
use seferet::workflow::status;

fn draft(kind: RequestKind, owner: PartyRef, counterpart: PartyRef) -> WorkflowRequest {
    let now = Utc::now();
    WorkflowRequest {
        id: Uuid::new_v4(),
        kind,
        owner,
        counterpart,
        subject_id: Uuid::new_v4(),
        status: RequestStatus::Draft,
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

fn step(
    request: &WorkflowRequest,
    action: TransitionAction,
    actor: &Actor,
    input: TransitionInput,
) -> (WorkflowRequest, Vec<Effect>) {
    assert!(
        gate::can(actor, Capability::Transition(action), request),
        "{} should be allowed to {}",
        actor,
        action.as_str()
    );
    status::transition(request, action, actor, &input, Utc::now())
        .unwrap_or_else(|e| panic!("{} failed: {}", action.as_str(), e))
}

#[test]
fn service_request_approval_walk() {
    let customer = PartyRef::Customer(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let admin = Actor::Party(PartyRef::Admin(Uuid::new_v4()));
    let req = draft(RequestKind::ServiceRequest, customer, agent);

    // Customer submits: the reviewing side is told, by record and mail.
    let (pending, effects) = step(
        &req,
        TransitionAction::Submit,
        &Actor::Party(customer),
        TransitionInput::default(),
    );
    assert_eq!(pending.status, RequestStatus::Pending);
    let notify = effects
        .iter()
        .find_map(|e| match e {
            Effect::Notify(ev) => Some(ev),
            _ => None,
        })
        .unwrap();
    assert_eq!(recipients_for(notify), vec![agent]);
    assert!(channels_for(TransitionAction::Submit).contains(&Channel::Email));
    // Service requests never touch the listing caches.
    assert!(!effects
        .iter()
        .any(|e| matches!(e, Effect::InvalidateListings(_))));

    // Admin approves: the requester hears about the decision.
    let (approved, effects) = step(
        &pending,
        TransitionAction::Approve,
        &admin,
        TransitionInput::default(),
    );
    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(approved.approved_at.is_some());
    assert_eq!(approved.approver, admin.party());
    let notify = effects
        .iter()
        .find_map(|e| match e {
            Effect::Notify(ev) => Some(ev),
            _ => None,
        })
        .unwrap();
    assert_eq!(recipients_for(notify), vec![customer]);
    assert_eq!(notify.name(), "service-request.approved");
}

#[test]
fn rejection_requires_reason_and_keeps_approval_fields_empty() {
    let customer = PartyRef::Customer(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let admin = Actor::Party(PartyRef::Admin(Uuid::new_v4()));
    let mut req = draft(RequestKind::ServiceRequest, customer, agent);
    req.status = RequestStatus::Pending;

    // Reason is validated before the state machine runs.
    let err = status::transition(
        &req,
        TransitionAction::Reject,
        &admin,
        &TransitionInput::default(),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, status::TransitionError::Validation(_)));

    let (rejected, _) = step(
        &req,
        TransitionAction::Reject,
        &admin,
        TransitionInput {
            notes: None,
            rejection_reason: Some("incomplete itinerary".into()),
        },
    );
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert!(rejected.rejected_at.is_some());
    assert!(rejected.approved_at.is_none());

    // The opposite resolution is now illegal.
    let err = status::transition(
        &rejected,
        TransitionAction::Approve,
        &admin,
        &TransitionInput::default(),
        Utc::now(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        status::TransitionError::IllegalState {
            from: RequestStatus::Rejected,
            action: TransitionAction::Approve,
        }
    );
}

#[test]
fn ad_lifecycle_with_toggle_and_cache_invalidation() {
    let provider = PartyRef::Provider(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let owner = Actor::Party(provider);
    let admin = Actor::Party(PartyRef::Admin(Uuid::new_v4()));
    let req = draft(RequestKind::Ad, provider, agent);

    let (pending, _) = step(&req, TransitionAction::Submit, &owner, TransitionInput::default());
    let (live, effects) = step(
        &pending,
        TransitionAction::Approve,
        &admin,
        TransitionInput::default(),
    );
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::InvalidateListings(RequestKind::Ad))));

    // Owner toggles the live listing off and back on.
    let (off, effects) = step(
        &live,
        TransitionAction::Deactivate,
        &owner,
        TransitionInput::default(),
    );
    assert_eq!(off.status, RequestStatus::Withdrawn);
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::InvalidateListings(RequestKind::Ad))));
    // The toggle is record-only: no mail for deactivation.
    assert!(!channels_for(TransitionAction::Deactivate).contains(&Channel::Email));

    let (back, _) = step(
        &off,
        TransitionAction::Activate,
        &owner,
        TransitionInput::default(),
    );
    assert_eq!(back.status, RequestStatus::Approved);
    // Resolution stamps survive the toggle round-trip.
    assert_eq!(back.approved_at, live.approved_at);
}

#[test]
fn withdraw_returns_to_draft_and_is_owner_only() {
    let customer = PartyRef::Customer(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let mut req = draft(RequestKind::FeaturedRequest, customer, agent);
    req.status = RequestStatus::Pending;

    // The counterpart cannot pull the request back.
    assert!(!gate::can(
        &Actor::Party(agent),
        Capability::Transition(TransitionAction::Withdraw),
        &req
    ));
    // Neither can an admin — a draft belongs to its owner.
    assert!(!gate::can(
        &Actor::Party(PartyRef::Admin(Uuid::new_v4())),
        Capability::Transition(TransitionAction::Withdraw),
        &req
    ));

    let (back, _) = step(
        &req,
        TransitionAction::Withdraw,
        &Actor::Party(customer),
        TransitionInput::default(),
    );
    assert_eq!(back.status, RequestStatus::Draft);

    // Resubmission works from the fresh draft.
    let (pending, _) = step(
        &back,
        TransitionAction::Submit,
        &Actor::Party(customer),
        TransitionInput::default(),
    );
    assert_eq!(pending.status, RequestStatus::Pending);
}

#[test]
fn expiry_is_system_driven_and_deadline_bound() {
    let customer = PartyRef::Customer(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let mut req = draft(RequestKind::FeaturedRequest, customer, agent);
    req.status = RequestStatus::Pending;
    req.expires_at = Some(Utc::now() - Duration::minutes(5));

    // The owner cannot force an expiry.
    assert!(!gate::can(
        &Actor::Party(customer),
        Capability::Transition(TransitionAction::Expire),
        &req
    ));

    let (expired, effects) = step(
        &req,
        TransitionAction::Expire,
        &Actor::System,
        TransitionInput::default(),
    );
    assert_eq!(expired.status, RequestStatus::Expired);
    // Expired featured listings vanish from the public caches.
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::InvalidateListings(RequestKind::FeaturedRequest))));

    // A future deadline refuses to expire.
    let mut fresh = draft(RequestKind::FeaturedRequest, customer, agent);
    fresh.status = RequestStatus::Pending;
    fresh.expires_at = Some(Utc::now() + Duration::hours(1));
    assert!(status::transition(
        &fresh,
        TransitionAction::Expire,
        &Actor::System,
        &TransitionInput::default(),
        Utc::now(),
    )
    .is_err());
}

#[tokio::test]
async fn broadcast_reaches_owner_counterpart_and_admin() {
    let customer = PartyRef::Customer(Uuid::new_v4());
    let agent = PartyRef::Agent(Uuid::new_v4());
    let admin = Actor::Party(PartyRef::Admin(Uuid::new_v4()));
    let mut req = draft(RequestKind::Ad, customer, agent);
    req.status = RequestStatus::Pending;

    let (_, effects) = step(
        &req,
        TransitionAction::Approve,
        &admin,
        TransitionInput::default(),
    );
    let event = effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Broadcast(ev) => Some(ev),
            _ => None,
        })
        .unwrap();

    let hub = Hub::new();
    let mut owner_rx = hub.subscribe(&format!("user.{}", customer.id()));
    let mut counterpart_rx = hub.subscribe(&format!("user.{}", agent.id()));
    let mut admin_rx = hub.subscribe("admin");

    let delivered = hub.publish_event(&event);
    assert_eq!(delivered, 3);

    for rx in [&mut owner_rx, &mut counterpart_rx, &mut admin_rx] {
        let raw = rx.recv().await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload["event"], "ad.approved");
        assert_eq!(payload["request"]["id"], serde_json::json!(req.id));
    }
}
