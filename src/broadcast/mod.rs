//! Realtime broadcast hub.
//!
//! Transition events are published to named channels: per-recipient
//! (`user.<id>`), per-resource (`resource.<id>`), and the global `admin`
//! channel. Subscribers attach over WebSocket. Broadcasting is observational:
//! no subscriber affects the underlying transition, and message loss (nobody
//! connected, lagging receiver) is acceptable — the persisted notification
//! record is the durable channel.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::workflow::effects::TransitionEvent;

/// Buffered messages per channel before lagging receivers start losing.
const CHANNEL_CAPACITY: usize = 64;

/// Channel names a transition event is published to.
pub fn channels_for_event(event: &TransitionEvent) -> Vec<String> {
    let request = &event.request;
    let mut channels = vec![
        format!("user.{}", request.owner.id()),
        format!("user.{}", request.counterpart.id()),
        format!("resource.{}", request.id),
        "admin".to_string(),
    ];
    channels.dedup();
    channels
}

/// Flattened snapshot payload. Built field by field so unrelated entity data
/// never leaks to subscribers.
pub fn event_payload(event: &TransitionEvent) -> serde_json::Value {
    let request = &event.request;
    json!({
        "event": event.name(),
        "event_id": event.id,
        "occurred_at": event.occurred_at,
        "action": event.action,
        "request": {
            "id": request.id,
            "kind": request.kind,
            "status": request.status,
            "owner": request.owner,
            "counterpart": request.counterpart,
            "subject_id": request.subject_id,
            "priority": request.priority,
            "notes": request.notes,
            "rejection_reason": request.rejection_reason,
            "approved_at": request.approved_at,
            "rejected_at": request.rejected_at,
            "expires_at": request.expires_at,
        },
    })
}

/// In-process pub/sub hub keyed by channel name.
#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a named channel, creating it on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a raw message to one channel.
    /// Returns the number of receivers it reached.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        match self.channels.get(channel) {
            Some(tx) => tx.send(message.to_string()).unwrap_or(0),
            None => 0, // nobody ever subscribed — fine, broadcast is lossy
        }
    }

    /// Publish a transition event to all of its channels.
    pub fn publish_event(&self, event: &TransitionEvent) -> usize {
        let message = event_payload(event).to_string();
        let mut delivered = 0;
        for channel in channels_for_event(event) {
            delivered += self.publish(&channel, &message);
        }
        if delivered == 0 {
            tracing::debug!(event = %event.name(), "broadcast reached no subscribers");
        }
        delivered
    }

    /// Drop channels that have no remaining receivers. Called periodically to
    /// bound memory usage.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before - self.channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::party::PartyRef;
    use crate::models::request::{
        RequestKind, RequestStatus, TransitionAction, WorkflowRequest,
    };
    use crate::workflow::gate::Actor;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event() -> TransitionEvent {
        let now = Utc::now();
        let request = WorkflowRequest {
            id: Uuid::new_v4(),
            kind: RequestKind::ServiceRequest,
            owner: PartyRef::Customer(Uuid::new_v4()),
            counterpart: PartyRef::Agent(Uuid::new_v4()),
            subject_id: Uuid::new_v4(),
            status: RequestStatus::Approved,
            approver: None,
            notes: None,
            rejection_reason: None,
            priority: 0,
            expires_at: None,
            approved_at: Some(now),
            rejected_at: None,
            created_at: now,
            updated_at: now,
        };
        TransitionEvent::new(request, TransitionAction::Approve, Actor::System, now)
    }

    #[test]
    fn test_channels_cover_parties_resource_and_admin() {
        let event = sample_event();
        let channels = channels_for_event(&event);
        assert!(channels.contains(&format!("user.{}", event.request.owner.id())));
        assert!(channels.contains(&format!("resource.{}", event.request.id)));
        assert!(channels.contains(&"admin".to_string()));
    }

    #[test]
    fn test_publish_without_subscribers_is_lossy_not_fatal() {
        let hub = Hub::new();
        assert_eq!(hub.publish_event(&sample_event()), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event_payload() {
        let hub = Hub::new();
        let mut rx = hub.subscribe("admin");
        let event = sample_event();
        let delivered = hub.publish_event(&event);
        assert!(delivered >= 1);

        let raw = rx.recv().await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload["event"], "service-request.approved");
        assert_eq!(payload["request"]["status"], "approved");
    }

    #[test]
    fn test_subscriber_churn_is_reclaimed_by_prune() {
        let hub = Hub::new();
        for i in 0..1000 {
            let _rx = hub.subscribe(&format!("user.{}", i));
            // receiver dropped at the end of each iteration
        }
        assert_eq!(hub.channel_count(), 1000);

        // One live subscriber survives the sweep, the dead channels do not.
        let _keep = hub.subscribe("admin");
        assert_eq!(hub.prune(), 1000);
        assert_eq!(hub.channel_count(), 1);
    }

    #[test]
    fn test_prune_removes_dead_channels() {
        let hub = Hub::new();
        {
            let _rx = hub.subscribe("user.x");
        } // receiver dropped
        hub.subscribe("admin"); // receiver dropped immediately too
        assert_eq!(hub.channel_count(), 2);
        hub.prune();
        assert_eq!(hub.channel_count(), 0);
    }
}
