//! Effect queue worker.
//!
//! Drains the mpsc effect queue and performs the fan-out side of committed
//! transitions: notification dispatch, listing cache invalidation, realtime
//! broadcast. Effects are isolated — one failure is logged and the loop
//! moves on. The mailer owns its own retry and dead-lettering.

use tokio::sync::mpsc;

use crate::broadcast::Hub;
use crate::listings::Listings;
use crate::notify::dispatcher::Dispatcher;

use super::effects::Effect;

/// Spawn the worker task. Call this once at startup with the receiver half
/// of the effect queue. The task runs until every sender is dropped, so a
/// short-lived caller can drop its queue handles and await the returned
/// handle to let pending effects drain.
pub fn spawn(
    mut rx: mpsc::Receiver<Effect>,
    dispatcher: Dispatcher,
    listings: Listings,
    hub: Hub,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            handle(effect, &dispatcher, &listings, &hub).await;
        }
        tracing::info!("effect queue closed, worker exiting");
    })
}

async fn handle(effect: Effect, dispatcher: &Dispatcher, listings: &Listings, hub: &Hub) {
    match effect {
        Effect::Notify(event) => {
            let report = dispatcher.dispatch(&event).await;
            crate::metrics::record_notifications("record", "written", report.records_written);
            crate::metrics::record_notifications("record", "deduped", report.records_deduped);
            crate::metrics::record_notifications("record", "failed", report.failures);
            crate::metrics::record_notifications("email", "dispatched", report.mails_dispatched);
            crate::metrics::record_notifications("email", "skipped", report.mails_skipped_by_pref);
            tracing::debug!(
                event = %event.name(),
                records = report.records_written,
                deduped = report.records_deduped,
                mails = report.mails_dispatched,
                skipped = report.mails_skipped_by_pref,
                failures = report.failures,
                "notification fan-out complete"
            );
        }
        Effect::InvalidateListings(kind) => {
            listings.invalidate_kind(kind).await;
        }
        Effect::Broadcast(event) => {
            let delivered = hub.publish_event(&event);
            crate::metrics::record_broadcast(&event.name());
            tracing::debug!(event = %event.name(), delivered, "broadcast published");
        }
    }
}
