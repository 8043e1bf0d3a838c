use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::broadcast::Hub;
use crate::errors::AppError;
use crate::models::party::PartyRef;
use crate::models::request::{NewRequest, RequestKind, RequestStatus, TransitionAction, TransitionInput};
use crate::workflow::gate::Actor;
use crate::AppState;

/// Resolve the acting party from the `X-Actor: <kind>:<uuid>` header.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let raw = headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing X-Actor header".into()))?;
    let party = PartyRef::parse(raw)
        .ok_or_else(|| AppError::Validation(format!("malformed X-Actor header: '{}'", raw)))?;
    Ok(Actor::Party(party))
}

// ── Requests ──────────────────────────────────────────────────

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewRequest>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let request = state.engine.create(&actor, body).await?;
    Ok((axum::http::StatusCode::CREATED, Json(request)).into_response())
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let request = state.engine.get(&actor, id).await?;
    Ok(Json(request).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
    pub kind: Option<RequestKind>,
}

/// Admin-only overview of requests.
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListRequestsQuery>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    if !actor.is_admin() {
        return Err(AppError::Authorization);
    }
    let requests = state
        .db
        .list_requests(params.status, params.kind)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(requests).into_response())
}

async fn run_transition(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
    action: TransitionAction,
    input: TransitionInput,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(headers)?;
    let request = state.engine.transition(id, action, &actor, input).await?;
    Ok(Json(request).into_response())
}

pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<TransitionInput>>,
) -> Result<Response, AppError> {
    let input = body.map(|Json(i)| i).unwrap_or_default();
    run_transition(&state, &headers, id, TransitionAction::Submit, input).await
}

pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<TransitionInput>>,
) -> Result<Response, AppError> {
    let input = body.map(|Json(i)| i).unwrap_or_default();
    run_transition(&state, &headers, id, TransitionAction::Approve, input).await
}

pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<TransitionInput>>,
) -> Result<Response, AppError> {
    let input = body.map(|Json(i)| i).unwrap_or_default();
    run_transition(&state, &headers, id, TransitionAction::Reject, input).await
}

pub async fn withdraw_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    run_transition(&state, &headers, id, TransitionAction::Withdraw, TransitionInput::default()).await
}

pub async fn activate_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    run_transition(&state, &headers, id, TransitionAction::Activate, TransitionInput::default()).await
}

pub async fn deactivate_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    run_transition(&state, &headers, id, TransitionAction::Deactivate, TransitionInput::default()).await
}

// ── Notifications ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

const MAX_PAGE: i64 = 100_000;

/// Resolve caller paging input to (page, per_page, offset). Both inputs are
/// clamped so the offset cannot overflow or go negative.
fn page_offset(query: &PageQuery) -> (i64, i64, i64) {
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).clamp(1, MAX_PAGE);
    (page, per_page, (page - 1) * per_page)
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;

    let (page_no, per_page, offset) = page_offset(&page);
    let notifications = state
        .db
        .list_notifications(recipient, per_page, offset)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(json!({
        "page": page_no,
        "per_page": per_page,
        "notifications": notifications,
    }))
    .into_response())
}

pub async fn count_unread_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;
    let count = state
        .db
        .count_unread_notifications(recipient)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "unread": count })).into_response())
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;
    let updated = state
        .db
        .mark_notification_read(id, recipient)
        .await
        .map_err(AppError::Internal)?;
    if !updated {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "ok": true })).into_response())
}

pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;
    let updated = state
        .db
        .mark_all_notifications_read(recipient)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "updated": updated })).into_response())
}

/// Stored preference rows only — categories left at the default (enabled)
/// have no row and are not listed.
pub async fn list_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;
    let prefs = state
        .db
        .list_email_prefs(recipient)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(prefs).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PreferenceBody {
    pub category: String,
    pub email_enabled: bool,
}

pub async fn set_preference(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PreferenceBody>,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(&headers)?;
    let recipient = actor.party().ok_or(AppError::Authorization)?;
    state
        .db
        .set_email_pref(recipient, &body.category, body.email_enabled)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "ok": true })).into_response())
}

// ── Listings ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeaturedQuery {
    pub limit: Option<i64>,
}

pub async fn featured_listings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeaturedQuery>,
) -> Result<Response, AppError> {
    let limit = params.limit.unwrap_or(10);
    if !crate::listings::FEATURED_TOP_SIZES.contains(&limit) {
        return Err(AppError::Validation(format!(
            "unsupported featured limit {}, expected one of {:?}",
            limit,
            crate::listings::FEATURED_TOP_SIZES
        )));
    }
    let entries = state
        .listings
        .featured_top(limit)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(entries).into_response())
}

pub async fn active_ad_listings(
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let entries = state
        .listings
        .active_ads()
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(entries).into_response())
}

// ── Realtime Stream ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated channel names, e.g. "user.<id>,admin".
    pub channels: Option<String>,
}

/// GET /api/v1/stream
///
/// Upgrades to WebSocket and forwards broadcast events for the requested
/// channels. Without an explicit channel list, an actor header subscribes
/// to their own `user.<id>` channel.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let channels: Vec<String> = match params.channels {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => {
            let actor = actor_from_headers(&headers)?;
            let party = actor.party().ok_or(AppError::Authorization)?;
            vec![format!("user.{}", party.id())]
        }
    };
    if channels.is_empty() {
        return Err(AppError::Validation("no channels requested".into()));
    }

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| relay(socket, hub, channels)))
}

async fn relay(socket: axum::extract::ws::WebSocket, hub: Hub, channels: Vec<String>) {
    use axum::extract::ws::Message;

    let subscriptions = channels
        .iter()
        .map(|c| BroadcastStream::new(hub.subscribe(c)))
        .collect::<Vec<_>>();
    let mut events = futures::stream::select_all(subscriptions);

    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Lagged receiver: messages were lost, keep streaming.
                Some(Err(_)) => continue,
                None => break,
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Subscribers are listen-only; ignore anything they send.
                Some(Ok(_)) => continue,
            },
        }
    }

    tracing::debug!(channels = ?channels, "stream subscriber disconnected");
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset_defaults() {
        let (page, per_page, offset) = page_offset(&PageQuery {
            page: None,
            per_page: None,
        });
        assert_eq!((page, per_page, offset), (1, 20, 0));
    }

    #[test]
    fn test_page_offset_hostile_input_cannot_overflow() {
        // i64::MAX page must clamp instead of wrapping into a negative OFFSET.
        let (page, per_page, offset) = page_offset(&PageQuery {
            page: Some(i64::MAX),
            per_page: Some(i64::MAX),
        });
        assert_eq!(page, MAX_PAGE);
        assert_eq!(per_page, 100);
        assert_eq!(offset, (MAX_PAGE - 1) * 100);
        assert!(offset > 0);

        let (page, _, offset) = page_offset(&PageQuery {
            page: Some(i64::MIN),
            per_page: Some(-5),
        });
        assert_eq!(page, 1);
        assert_eq!(offset, 0);
    }
}
