//! Transition orchestration.
//!
//! Order per call: input validation → gate → pure status machine → guarded
//! store update → effect enqueue. The entity mutation is durable before any
//! effect is enqueued, and effect enqueue failure never rolls the transition
//! back — the queue side is at-least-once, the mutation is the contract.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::request::{NewRequest, TransitionAction, TransitionInput, WorkflowRequest};
use crate::store::postgres::PgStore;

use super::effects::EffectQueue;
use super::gate::{self, Actor, Capability};
use super::status;

#[derive(Clone)]
pub struct WorkflowEngine {
    store: PgStore,
    queue: Arc<dyn EffectQueue>,
}

impl WorkflowEngine {
    pub fn new(store: PgStore, queue: Arc<dyn EffectQueue>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &PgStore {
        &self.store
    }

    /// Create a request in draft, or straight into pending when the caller
    /// submits immediately. Creation itself emits no effects — the submit
    /// transition is what notifies the reviewing side, so an immediate
    /// submission goes through `transition` right after insert.
    pub async fn create(&self, actor: &Actor, new: NewRequest) -> Result<WorkflowRequest, AppError> {
        if actor.party() != Some(new.owner) {
            return Err(AppError::Authorization);
        }

        let submit = new.submit_immediately;
        let mut new = new;
        new.submit_immediately = false;
        let request = self.store.insert_request(&new).await.map_err(AppError::Internal)?;

        if submit {
            return self
                .transition(request.id, TransitionAction::Submit, actor, TransitionInput::default())
                .await;
        }
        Ok(request)
    }

    /// Apply one transition. The caller always learns definitively whether
    /// the transition itself succeeded; notification delivery is eventually
    /// consistent and not part of this result.
    pub async fn transition(
        &self,
        request_id: Uuid,
        action: TransitionAction,
        actor: &Actor,
        input: TransitionInput,
    ) -> Result<WorkflowRequest, AppError> {
        // Malformed input is reported before any state inspection.
        status::validate(action, &input)?;

        let request = self
            .store
            .get_request(request_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::NotFound)?;

        if !gate::can(actor, Capability::Transition(action), &request) {
            tracing::warn!(
                request_id = %request_id,
                actor = %actor,
                action = action.as_str(),
                "transition denied by gate"
            );
            return Err(AppError::Authorization);
        }

        let now = Utc::now();
        let (updated, effects) = status::transition(&request, action, actor, &input, now)?;

        // Guarded on the status we read: a concurrent transition makes this a
        // no-op and the loser reports the state it lost to.
        let won = self
            .store
            .update_request_status(request.status, &updated)
            .await
            .map_err(AppError::Internal)?;
        if !won {
            let current = self
                .store
                .get_request(request_id)
                .await
                .map_err(AppError::Internal)?
                .ok_or(AppError::NotFound)?;
            tracing::info!(
                request_id = %request_id,
                action = action.as_str(),
                current = current.status.as_str(),
                "lost transition race, reporting current state"
            );
            return Err(AppError::IllegalState {
                from: current.status,
                action,
            });
        }

        tracing::info!(
            request_id = %request_id,
            kind = updated.kind.event_prefix(),
            from = request.status.as_str(),
            to = updated.status.as_str(),
            actor = %actor,
            "transition committed"
        );
        crate::metrics::record_transition(updated.kind, action);

        for effect in effects {
            if let Err(e) = self.queue.enqueue(effect).await {
                // The transition already committed; the effect is lost and
                // logged, never surfaced to the caller.
                tracing::error!(request_id = %request_id, error = %e, "failed to enqueue effect");
            }
        }

        Ok(updated)
    }

    /// Fetch a request, gated on view capability.
    pub async fn get(&self, actor: &Actor, request_id: Uuid) -> Result<WorkflowRequest, AppError> {
        let request = self
            .store
            .get_request(request_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::NotFound)?;
        if !gate::can(actor, Capability::View, &request) {
            return Err(AppError::Authorization);
        }
        Ok(request)
    }
}
