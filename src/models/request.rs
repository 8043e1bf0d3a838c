use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::party::PartyRef;

/// Entity kinds that move through the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RequestKind {
    ServiceRequest,
    FeaturedRequest,
    Ad,
}

impl RequestKind {
    /// Kebab-case prefix used in broadcast event names,
    /// e.g. "featured-request.approved".
    pub fn event_prefix(&self) -> &'static str {
        match self {
            RequestKind::ServiceRequest => "service-request",
            RequestKind::FeaturedRequest => "featured-request",
            RequestKind::Ad => "ad",
        }
    }

    /// Listing kinds feed the public featured/ad caches; their resolved-state
    /// transitions must invalidate those caches.
    pub fn is_listing(&self) -> bool {
        matches!(self, RequestKind::FeaturedRequest | RequestKind::Ad)
    }
}

/// Workflow status. The legal subset varies by kind; `withdrawn` is only
/// reachable for listing kinds (a resolved listing taken offline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Expired,
    Withdrawn,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
            RequestStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Rejected
                | RequestStatus::Expired
                | RequestStatus::Withdrawn
        )
    }
}

/// Actions the status machine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionAction {
    Submit,
    Approve,
    Reject,
    Withdraw,
    Expire,
    Activate,
    Deactivate,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Submit => "submit",
            TransitionAction::Approve => "approve",
            TransitionAction::Reject => "reject",
            TransitionAction::Withdraw => "withdraw",
            TransitionAction::Expire => "expire",
            TransitionAction::Activate => "activate",
            TransitionAction::Deactivate => "deactivate",
        }
    }

    /// Past-tense suffix for broadcast event names.
    pub fn past_tense(&self) -> &'static str {
        match self {
            TransitionAction::Submit => "submitted",
            TransitionAction::Approve => "approved",
            TransitionAction::Reject => "rejected",
            TransitionAction::Withdraw => "withdrawn",
            TransitionAction::Expire => "expired",
            TransitionAction::Activate => "activated",
            TransitionAction::Deactivate => "deactivated",
        }
    }
}

/// A request moving through the approval workflow.
///
/// Mutated only through the status machine; resolution fields
/// (approved_at / rejected_at / rejection_reason) are written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    /// The requester: who created and owns the request.
    pub owner: PartyRef,
    /// The reviewing side (agent for service requests, provider for ads…).
    pub counterpart: PartyRef,
    /// The package/product/listing this request is about.
    pub subject_id: Uuid,
    pub status: RequestStatus,
    pub approver: Option<PartyRef>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    /// Display ordering for featured listings. Higher shows first.
    pub priority: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied input accompanying a transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionInput {
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Fields for creating a new request. Status starts at draft or pending.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub kind: RequestKind,
    pub owner: PartyRef,
    pub counterpart: PartyRef,
    pub subject_id: Uuid,
    #[serde(default)]
    pub submit_immediately: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Draft.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
        assert!(RequestStatus::Withdrawn.is_terminal());
    }

    #[test]
    fn test_listing_kinds() {
        assert!(RequestKind::Ad.is_listing());
        assert!(RequestKind::FeaturedRequest.is_listing());
        assert!(!RequestKind::ServiceRequest.is_listing());
    }

    #[test]
    fn test_event_prefix_is_kebab() {
        assert_eq!(RequestKind::ServiceRequest.event_prefix(), "service-request");
        assert_eq!(RequestKind::Ad.event_prefix(), "ad");
    }
}
