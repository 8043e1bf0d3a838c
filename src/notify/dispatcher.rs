//! Notification fan-out.
//!
//! For each recipient of a transition event: the durable in-app record is
//! written synchronously (and idempotently — queue redelivery cannot
//! duplicate it), then the external mail channel is selected from the static
//! channel table filtered by the recipient's preferences and handed to the
//! mailer fire-and-forget.

use tracing::warn;

use crate::models::party::PartyRef;
use crate::models::request::TransitionAction;
use crate::notify::mailer::{render_mail, MailEnvelope, Mailer};
use crate::store::postgres::{NewNotification, PgStore};
use crate::workflow::effects::{channels_for, Channel, TransitionEvent};

/// Outcome summary of one fan-out. Failures are per-recipient and isolated;
/// the report counts them instead of propagating.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub records_written: usize,
    pub records_deduped: usize,
    pub mails_dispatched: usize,
    pub mails_skipped_by_pref: usize,
    pub failures: usize,
}

/// Who hears about a transition. Submit tells the reviewing side; decisions
/// and expiry tell the requester; the listing toggle is requester-only noise.
pub fn recipients_for(event: &TransitionEvent) -> Vec<PartyRef> {
    use TransitionAction::*;
    match event.action {
        Submit => vec![event.request.counterpart],
        Approve | Reject | Expire => vec![event.request.owner],
        Withdraw | Activate | Deactivate => vec![event.request.owner],
    }
}

/// Build the in-app record for one recipient.
pub fn render_record(event: &TransitionEvent, recipient: PartyRef, base_url: &str) -> NewNotification {
    use TransitionAction::*;

    let request = &event.request;
    let (title, color) = match event.action {
        Submit => ("New request awaiting review".to_string(), "neutral"),
        Approve => ("Your request was approved".to_string(), "success"),
        Reject => ("Your request was rejected".to_string(), "error"),
        Withdraw => ("Request withdrawn".to_string(), "neutral"),
        Expire => ("Your request expired".to_string(), "error"),
        Activate => ("Listing re-activated".to_string(), "success"),
        Deactivate => ("Listing deactivated".to_string(), "neutral"),
    };

    let mut message = format!(
        "{} {} is now {}.",
        match request.kind {
            crate::models::request::RequestKind::ServiceRequest => "Service request",
            crate::models::request::RequestKind::FeaturedRequest => "Featured listing request",
            crate::models::request::RequestKind::Ad => "Ad",
        },
        request.id,
        request.status.as_str()
    );
    if let Some(reason) = &request.rejection_reason {
        message.push_str(&format!(" Reason: {}", reason));
    }

    let icon = match request.kind {
        crate::models::request::RequestKind::ServiceRequest => "briefcase",
        crate::models::request::RequestKind::FeaturedRequest => "star",
        crate::models::request::RequestKind::Ad => "megaphone",
    };

    NewNotification {
        event_id: event.id,
        recipient,
        r#type: event.name(),
        title,
        message,
        payload: serde_json::json!({
            "request_id": request.id,
            "kind": request.kind,
            "action": event.action,
            "status": request.status,
            "subject_id": request.subject_id,
        }),
        action_url: format!("{}/requests/{}", base_url.trim_end_matches('/'), request.id),
        icon: icon.to_string(),
        color: color.to_string(),
    }
}

/// Fans transition events out to recipients and channels.
#[derive(Clone)]
pub struct Dispatcher {
    store: PgStore,
    mailer: Mailer,
    base_url: String,
}

impl Dispatcher {
    pub fn new(store: PgStore, mailer: Mailer, base_url: String) -> Self {
        Self {
            store,
            mailer,
            base_url,
        }
    }

    pub async fn dispatch(&self, event: &TransitionEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let wants_email = channels_for(event.action).contains(&Channel::Email);

        for recipient in recipients_for(event) {
            // Durable record first — the source of truth for in-app lists.
            let record = render_record(event, recipient, &self.base_url);
            match self.store.insert_notification(&record).await {
                Ok(true) => report.records_written += 1,
                Ok(false) => {
                    // Redelivery of an already-fanned-out event. Skip the
                    // external channel too: it already went out.
                    report.records_deduped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        event = %event.name(),
                        recipient = %recipient,
                        error = %e,
                        "failed to persist notification record"
                    );
                    report.failures += 1;
                    continue;
                }
            }

            if !wants_email {
                continue;
            }

            let enabled = match self.store.email_enabled(recipient, event.category()).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "preference lookup failed, defaulting to enabled");
                    true
                }
            };
            if !enabled {
                report.mails_skipped_by_pref += 1;
                continue;
            }

            let envelope = MailEnvelope {
                recipient,
                message: render_mail(event, &self.base_url),
            };
            self.mailer.deliver(envelope);
            report.mails_dispatched += 1;
        }

        report
    }
}

// ── Tests ─────────────────────────────────────────────────────
