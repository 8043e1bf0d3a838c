use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::notification::{DeadLetter, Notification, NotificationPref};
use crate::models::party::{PartyKind, PartyRef};
use crate::models::request::{NewRequest, RequestKind, RequestStatus, WorkflowRequest};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Flat row shape for `requests`. Converted to the domain model so the rest
/// of the crate works with `PartyRef` instead of kind/id column pairs.
#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    kind: RequestKind,
    owner_kind: PartyKind,
    owner_id: Uuid,
    counterpart_kind: PartyKind,
    counterpart_id: Uuid,
    subject_id: Uuid,
    status: RequestStatus,
    approver_kind: Option<PartyKind>,
    approver_id: Option<Uuid>,
    notes: Option<String>,
    rejection_reason: Option<String>,
    priority: i32,
    expires_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RequestRow> for WorkflowRequest {
    fn from(r: RequestRow) -> Self {
        WorkflowRequest {
            id: r.id,
            kind: r.kind,
            owner: PartyRef::new(r.owner_kind, r.owner_id),
            counterpart: PartyRef::new(r.counterpart_kind, r.counterpart_id),
            subject_id: r.subject_id,
            status: r.status,
            approver: match (r.approver_kind, r.approver_id) {
                (Some(kind), Some(id)) => Some(PartyRef::new(kind, id)),
                _ => None,
            },
            notes: r.notes,
            rejection_reason: r.rejection_reason,
            priority: r.priority,
            expires_at: r.expires_at,
            approved_at: r.approved_at,
            rejected_at: r.rejected_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const REQUEST_COLUMNS: &str = "id, kind, owner_kind, owner_id, counterpart_kind, counterpart_id, \
     subject_id, status, approver_kind, approver_id, notes, rejection_reason, priority, \
     expires_at, approved_at, rejected_at, created_at, updated_at";

/// Fields for a new persisted notification. The (event, recipient) pair is
/// the idempotency key — redelivery is a no-op.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub event_id: Uuid,
    pub recipient: PartyRef,
    pub r#type: String,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub action_url: String,
    pub icon: String,
    pub color: String,
}

/// Entry in the public featured/ad listing caches.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ListingEntry {
    pub request_id: Uuid,
    pub subject_id: Uuid,
    pub priority: i32,
    pub approved_at: Option<DateTime<Utc>>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Build a store whose connections open on first use. Lets components
    /// that only sometimes touch the database be constructed without one.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Request Operations --

    pub async fn insert_request(&self, new: &NewRequest) -> anyhow::Result<WorkflowRequest> {
        let status = if new.submit_immediately {
            RequestStatus::Pending
        } else {
            RequestStatus::Draft
        };
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"INSERT INTO requests
                   (kind, owner_kind, owner_id, counterpart_kind, counterpart_id,
                    subject_id, status, notes, priority, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(new.kind)
        .bind(new.owner.kind())
        .bind(new.owner.id())
        .bind(new.counterpart.kind())
        .bind(new.counterpart.id())
        .bind(new.subject_id)
        .bind(status)
        .bind(&new.notes)
        .bind(new.priority)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    pub async fn get_request(&self, id: Uuid) -> anyhow::Result<Option<WorkflowRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        kind: Option<RequestKind>,
    ) -> anyhow::Result<Vec<WorkflowRequest>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM requests
               WHERE ($1::varchar IS NULL OR status = $1)
                 AND ($2::varchar IS NULL OR kind = $2)
               ORDER BY created_at ASC"#
        ))
        .bind(status)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Persist a transition, guarded on the status the snapshot was read at.
    ///
    /// Returns false when a concurrent transition got there first; the caller
    /// re-reads and reports the current state. Resolution fields only ever
    /// fill empty columns, so history survives secondary actions.
    pub async fn update_request_status(
        &self,
        expected: RequestStatus,
        updated: &WorkflowRequest,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE requests
               SET status = $1,
                   approver_kind = COALESCE(approver_kind, $2),
                   approver_id = COALESCE(approver_id, $3),
                   notes = $4,
                   rejection_reason = COALESCE(rejection_reason, $5),
                   approved_at = COALESCE(approved_at, $6),
                   rejected_at = COALESCE(rejected_at, $7),
                   updated_at = $8
               WHERE id = $9 AND status = $10"#,
        )
        .bind(updated.status)
        .bind(updated.approver.map(|p| p.kind()))
        .bind(updated.approver.map(|p| p.id()))
        .bind(&updated.notes)
        .bind(&updated.rejection_reason)
        .bind(updated.approved_at)
        .bind(updated.rejected_at)
        .bind(updated.updated_at)
        .bind(updated.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending requests whose deadline has passed. Fed to the expiry sweeper.
    pub async fn list_expirable(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM requests WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= $1 ORDER BY expires_at ASC"
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // -- Notification Operations --

    /// Idempotent insert: returns false when the (event, recipient) pair has
    /// already been delivered (queue redelivery).
    pub async fn insert_notification(&self, n: &NewNotification) -> anyhow::Result<bool> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO notifications
                   (event_id, recipient_kind, recipient_id, type, title, message,
                    payload, action_url, icon, color)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (event_id, recipient_kind, recipient_id) DO NOTHING
               RETURNING id"#,
        )
        .bind(n.event_id)
        .bind(n.recipient.kind())
        .bind(n.recipient.id())
        .bind(&n.r#type)
        .bind(&n.title)
        .bind(&n.message)
        .bind(&n.payload)
        .bind(&n.action_url)
        .bind(&n.icon)
        .bind(&n.color)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.is_some())
    }

    pub async fn list_notifications(
        &self,
        recipient: PartyRef,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"SELECT id, event_id, recipient_kind, recipient_id, type, title, message,
                      payload, action_url, icon, color, is_read, created_at
               FROM notifications
               WHERE recipient_kind = $1 AND recipient_id = $2
               ORDER BY created_at DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_unread_notifications(&self, recipient: PartyRef) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE recipient_kind = $1 AND recipient_id = $2 AND is_read = false"
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn mark_notification_read(
        &self,
        id: Uuid,
        recipient: PartyRef,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE id = $1 AND recipient_kind = $2 AND recipient_id = $3"
        )
        .bind(id)
        .bind(recipient.kind())
        .bind(recipient.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_notifications_read(&self, recipient: PartyRef) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE recipient_kind = $1 AND recipient_id = $2 AND is_read = false"
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -- Preference Operations --

    /// Whether the recipient accepts external mail for this category.
    /// No row means yes.
    pub async fn email_enabled(
        &self,
        recipient: PartyRef,
        category: &str,
    ) -> anyhow::Result<bool> {
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT email_enabled FROM notification_preferences WHERE recipient_kind = $1 AND recipient_id = $2 AND category = $3"
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(enabled.unwrap_or(true))
    }

    pub async fn set_email_pref(
        &self,
        recipient: PartyRef,
        category: &str,
        enabled: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO notification_preferences (recipient_kind, recipient_id, category, email_enabled)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (recipient_kind, recipient_id, category)
               DO UPDATE SET email_enabled = EXCLUDED.email_enabled"#,
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .bind(category)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every stored preference row for a recipient. Categories without a row
    /// default to enabled and do not appear here.
    pub async fn list_email_prefs(
        &self,
        recipient: PartyRef,
    ) -> anyhow::Result<Vec<NotificationPref>> {
        let rows = sqlx::query_as::<_, NotificationPref>(
            r#"SELECT recipient_kind, recipient_id, category, email_enabled
               FROM notification_preferences
               WHERE recipient_kind = $1 AND recipient_id = $2
               ORDER BY category ASC"#,
        )
        .bind(recipient.kind())
        .bind(recipient.id())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Dead Letter Operations --

    pub async fn insert_dead_letter(
        &self,
        channel: &str,
        recipient: PartyRef,
        payload: serde_json::Value,
        error: &str,
        attempts: i32,
    ) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO dead_letters (channel, recipient_kind, recipient_id, payload, error, attempts)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id"#,
        )
        .bind(channel)
        .bind(recipient.kind())
        .bind(recipient.id())
        .bind(payload)
        .bind(error)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Most recent parked deliveries, for operator inspection.
    pub async fn list_dead_letters(&self, limit: i64) -> anyhow::Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetter>(
            r#"SELECT id, channel, recipient_kind, recipient_id, payload, error, attempts, created_at
               FROM dead_letters
               ORDER BY created_at DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Listing Queries (cache recompute source) --

    /// Top-N approved featured requests by priority. Source of truth behind
    /// the `listings:featured:top:{n}` cache key.
    pub async fn list_featured_top(&self, n: i64) -> anyhow::Result<Vec<ListingEntry>> {
        let rows = sqlx::query_as::<_, ListingEntry>(
            r#"SELECT id AS request_id, subject_id, priority, approved_at
               FROM requests
               WHERE kind = 'featured_request' AND status = 'approved'
               ORDER BY priority DESC, approved_at DESC
               LIMIT $1"#,
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All approved (active) ads. Source of truth behind `listings:ads:active`.
    pub async fn list_active_ads(&self) -> anyhow::Result<Vec<ListingEntry>> {
        let rows = sqlx::query_as::<_, ListingEntry>(
            r#"SELECT id AS request_id, subject_id, priority, approved_at
               FROM requests
               WHERE kind = 'ad' AND status = 'approved'
               ORDER BY priority DESC, approved_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
