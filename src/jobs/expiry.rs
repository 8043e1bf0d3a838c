//! Background job: expire pending requests whose deadline has passed.
//!
//! Runs on an interval. Each overdue request goes through the engine as the
//! System actor, so expiry gets the same gate, guarded update, and effect
//! fan-out as any other transition — a request that was approved between the
//! sweep query and the transition simply loses the race and is skipped.

use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::errors::AppError;
use crate::models::request::{TransitionAction, TransitionInput};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::gate::Actor;

/// Spawn the sweeper. Call this once at startup.
pub fn spawn(engine: WorkflowEngine, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = sweep(&engine).await {
                tracing::error!("expiry sweep failed: {}", e);
            }
        }
    });
}

async fn sweep(engine: &WorkflowEngine) -> anyhow::Result<()> {
    let overdue = engine.store().list_expirable(Utc::now()).await?;
    if overdue.is_empty() {
        return Ok(());
    }

    tracing::info!(count = overdue.len(), "expiring overdue requests");
    for id in overdue {
        match engine
            .transition(id, TransitionAction::Expire, &Actor::System, TransitionInput::default())
            .await
        {
            Ok(_) => {}
            // Resolved concurrently between the query and the transition.
            Err(AppError::IllegalState { .. }) => {
                tracing::debug!(request_id = %id, "request resolved before expiry, skipping");
            }
            Err(e) => {
                tracing::error!(request_id = %id, "failed to expire request: {}", e);
            }
        }
    }
    Ok(())
}
