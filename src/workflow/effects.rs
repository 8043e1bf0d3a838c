//! Transition effects and the queue they travel on.
//!
//! A successful transition returns its side effects as data instead of firing
//! them from inside the mutation path. The engine enqueues them after the
//! store commit; a worker task drains the queue and performs the actual
//! notification fan-out, cache invalidation, and broadcast. Effect failure
//! never rolls back the transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::request::{RequestKind, TransitionAction, WorkflowRequest};

use super::gate::Actor;

/// A committed transition, carrying everything the fan-out side needs to
/// render both channels without re-reading the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Generated once per transition. Keys idempotent delivery: a queue
    /// retry re-uses the same id and therefore cannot duplicate records.
    pub id: Uuid,
    pub action: TransitionAction,
    pub actor: Actor,
    /// Post-transition snapshot.
    pub request: WorkflowRequest,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(
        request: WorkflowRequest,
        action: TransitionAction,
        actor: Actor,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            actor,
            request,
            occurred_at,
        }
    }

    /// Broadcast event name, e.g. "service-request.approved".
    pub fn name(&self) -> String {
        format!(
            "{}.{}",
            self.request.kind.event_prefix(),
            self.action.past_tense()
        )
    }

    /// Preference category. Recipients opt out of external mail per entity
    /// kind, not per individual action.
    pub fn category(&self) -> &'static str {
        self.request.kind.event_prefix()
    }
}

/// One side effect of a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Effect {
    Notify(TransitionEvent),
    InvalidateListings(RequestKind),
    Broadcast(TransitionEvent),
}

/// Delivery channels for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Durable in-app record. Always written.
    Record,
    /// External mail, subject to recipient preferences.
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Record => "record",
            Channel::Email => "email",
        }
    }
}

/// Static channel table per action. Lifecycle decisions go out by mail too;
/// the listing on/off toggle is record-only noise.
pub fn channels_for(action: TransitionAction) -> &'static [Channel] {
    use TransitionAction::*;
    match action {
        Submit | Approve | Reject | Expire => &[Channel::Record, Channel::Email],
        Withdraw | Activate | Deactivate => &[Channel::Record],
    }
}

/// The engine's only outlet for side effects. Production uses the mpsc-backed
/// queue drained by the worker; tests swap in [`RecordingQueue`].
#[async_trait]
pub trait EffectQueue: Send + Sync {
    async fn enqueue(&self, effect: Effect) -> anyhow::Result<()>;
}

/// mpsc-backed queue handle. Cheap to clone.
#[derive(Clone)]
pub struct MpscEffectQueue {
    tx: mpsc::Sender<Effect>,
}

impl MpscEffectQueue {
    /// Create the queue and hand back the receiver for the worker task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Effect>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EffectQueue for MpscEffectQueue {
    async fn enqueue(&self, effect: Effect) -> anyhow::Result<()> {
        self.tx
            .send(effect)
            .await
            .map_err(|_| anyhow::anyhow!("effect queue closed"))
    }
}

/// Test double: records enqueued effects for assertion.
#[derive(Default)]
pub struct RecordingQueue {
    effects: std::sync::Mutex<Vec<Effect>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Effect> {
        std::mem::take(&mut self.effects.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.effects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EffectQueue for RecordingQueue {
    async fn enqueue(&self, effect: Effect) -> anyhow::Result<()> {
        self.effects.lock().unwrap().push(effect);
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_table() {
        assert_eq!(
            channels_for(TransitionAction::Approve),
            &[Channel::Record, Channel::Email]
        );
        assert_eq!(
            channels_for(TransitionAction::Deactivate),
            &[Channel::Record]
        );
        // Record is always first: the durable write precedes mail.
        for action in [
            TransitionAction::Submit,
            TransitionAction::Approve,
            TransitionAction::Reject,
            TransitionAction::Withdraw,
            TransitionAction::Expire,
            TransitionAction::Activate,
            TransitionAction::Deactivate,
        ] {
            assert_eq!(channels_for(action)[0], Channel::Record);
        }
    }

    #[tokio::test]
    async fn test_mpsc_queue_delivers_in_order() {
        let (queue, mut rx) = MpscEffectQueue::new(8);
        queue
            .enqueue(Effect::InvalidateListings(RequestKind::Ad))
            .await
            .unwrap();
        queue
            .enqueue(Effect::InvalidateListings(RequestKind::FeaturedRequest))
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(Effect::InvalidateListings(RequestKind::Ad))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(Effect::InvalidateListings(RequestKind::FeaturedRequest))
        ));
    }
}
