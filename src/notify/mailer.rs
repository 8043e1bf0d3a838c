//! External mail channel.
//!
//! Renders a transition event into a templated relay message and POSTs it to
//! the configured mail relay, signed with HMAC-SHA256. Up to 3 retries with
//! exponential back-off (1s → 5s → 25s); exhausted deliveries are parked in
//! the dead_letters table. The in-app record is the durable channel — mail is
//! at-least-once, best-effort.

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::party::PartyRef;
use crate::store::postgres::PgStore;
use crate::workflow::effects::TransitionEvent;

// ── Message Shape ─────────────────────────────────────────────

/// Visual tone hint for the relay's template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Error,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailLine {
    pub label: String,
    pub value: String,
}

/// A fully rendered mail, ready for the relay to template into HTML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub subject: String,
    pub greeting: String,
    /// Ordered facts; optional fields only appear when present.
    pub lines: Vec<MailLine>,
    pub action_label: String,
    pub action_url: String,
    pub closing: String,
    pub tone: Tone,
}

/// Wire envelope POSTed to the relay.
#[derive(Debug, Clone, Serialize)]
pub struct MailEnvelope {
    pub recipient: PartyRef,
    pub message: MailMessage,
}

// ── Rendering ─────────────────────────────────────────────────

/// Render the mail for one recipient of a transition event.
pub fn render_mail(event: &TransitionEvent, base_url: &str) -> MailMessage {
    use crate::models::request::TransitionAction::*;

    let request = &event.request;
    let kind_label = match request.kind {
        crate::models::request::RequestKind::ServiceRequest => "Service request",
        crate::models::request::RequestKind::FeaturedRequest => "Featured listing request",
        crate::models::request::RequestKind::Ad => "Ad",
    };

    let (subject, tone) = match event.action {
        Submit => (format!("{} submitted for review", kind_label), Tone::Neutral),
        Approve => (format!("{} approved", kind_label), Tone::Success),
        Reject => (format!("{} rejected", kind_label), Tone::Error),
        Withdraw => (format!("{} withdrawn", kind_label), Tone::Neutral),
        Expire => (format!("{} expired", kind_label), Tone::Error),
        Activate => (format!("{} re-activated", kind_label), Tone::Success),
        Deactivate => (format!("{} deactivated", kind_label), Tone::Neutral),
    };

    let mut lines = vec![
        MailLine {
            label: "Reference".into(),
            value: request.id.to_string(),
        },
        MailLine {
            label: "Status".into(),
            value: request.status.as_str().to_string(),
        },
    ];
    if let Some(notes) = &request.notes {
        lines.push(MailLine {
            label: "Notes".into(),
            value: notes.clone(),
        });
    }
    if let Some(reason) = &request.rejection_reason {
        lines.push(MailLine {
            label: "Reason".into(),
            value: reason.clone(),
        });
    }
    if let Some(expires) = request.expires_at {
        lines.push(MailLine {
            label: "Expires".into(),
            value: expires.to_rfc3339(),
        });
    }

    MailMessage {
        subject,
        greeting: "Hello,".into(),
        lines,
        action_label: "View request".into(),
        action_url: format!("{}/requests/{}", base_url.trim_end_matches('/'), request.id),
        closing: "— The SeferEt team".into(),
        tone,
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns "sha256=<lowercase hex digest>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    format!("sha256={}", hex::encode(result.into_bytes()))
}

// ── Mailer ────────────────────────────────────────────────────

/// Delivers rendered mail to the relay endpoint with signing and retry.
#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    relay_url: Option<String>,
    signing_secret: Option<String>,
    store: PgStore,
    backoff_secs: Vec<u64>,
}

impl Mailer {
    pub fn new(relay_url: Option<String>, signing_secret: Option<String>, store: PgStore) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("SeferEt-Mailer/1.0")
                .build()
                .expect("failed to build mail relay HTTP client"),
            relay_url,
            signing_secret,
            store,
            // First entry is the initial attempt.
            backoff_secs: vec![0, 1, 5, 25],
        }
    }

    /// Shrink the retry schedule (tests).
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    /// Send one envelope to the relay with retry.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, envelope: &MailEnvelope) -> Result<()> {
        let url = match &self.relay_url {
            Some(u) => u,
            None => {
                debug!("no mail relay configured, skipping delivery");
                return Ok(());
            }
        };

        let payload = serde_json::to_vec(envelope)
            .map_err(|e| anyhow::anyhow!("mail serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        for (attempt, &delay) in self.backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    subject = %envelope.message.subject,
                    "retrying mail delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-seferet-delivery-id", &delivery_id);

            if let Some(ref sig) = signature {
                req = req.header("x-seferet-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        recipient = %envelope.recipient,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "mail delivered to relay"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    warn!(
                        recipient = %envelope.recipient,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        "mail relay returned non-2xx, will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        recipient = %envelope.recipient,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "mail relay request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "mail delivery failed after {} attempts",
            self.backoff_secs.len()
        ))
    }

    /// Fire-and-forget delivery: retries inside the spawned task, then
    /// dead-letters. One recipient's failure never blocks another's.
    pub fn deliver(&self, envelope: MailEnvelope) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&envelope).await {
                warn!(recipient = %envelope.recipient, error = %e, "mail delivery exhausted, dead-lettering");
                let payload = serde_json::to_value(&envelope.message).unwrap_or_default();
                if let Err(e) = mailer
                    .store
                    .insert_dead_letter(
                        "email",
                        envelope.recipient,
                        payload,
                        &e.to_string(),
                        mailer.backoff_secs.len() as i32,
                    )
                    .await
                {
                    tracing::error!(recipient = %envelope.recipient, "failed to write dead letter: {}", e);
                }
            }
        });
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

    fn sample_event(action: TransitionAction, status: RequestStatus) -> TransitionEvent {
        let now = Utc::now();
        let request = WorkflowRequest {
            id: Uuid::new_v4(),
            kind: RequestKind::ServiceRequest,
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
        };
        TransitionEvent::new(request, action, Actor::System, now)
    }

    #[test]
    fn test_approved_mail_has_success_tone() {
        let event = sample_event(TransitionAction::Approve, RequestStatus::Approved);
        let mail = render_mail(&event, "https://seferet.example");
        assert_eq!(mail.tone, Tone::Success);
        assert!(mail.subject.contains("approved"));
        assert!(mail.action_url.contains(&event.request.id.to_string()));
    }

    #[test]
    fn test_rejection_reason_renders_as_conditional_line() {
        let mut event = sample_event(TransitionAction::Reject, RequestStatus::Rejected);
        event.request.rejection_reason = Some("missing license".into());
        let mail = render_mail(&event, "https://seferet.example");
        assert_eq!(mail.tone, Tone::Error);
        assert!(mail
            .lines
            .iter()
            .any(|l| l.label == "Reason" && l.value == "missing license"));
    }

    #[test]
    fn test_no_reason_line_when_absent() {
        let event = sample_event(TransitionAction::Submit, RequestStatus::Pending);
        let mail = render_mail(&event, "https://seferet.example");
        assert!(!mail.lines.iter().any(|l| l.label == "Reason"));
        assert!(!mail.lines.iter().any(|l| l.label == "Notes"));
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload");
        let sig2 = hmac_sha256_hex("secret123", b"payload");
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload");
        let sig2 = hmac_sha256_hex("secret2", b"payload");
        assert_ne!(sig1, sig2);
    }
}
