use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod broadcast;
mod cache;
mod cli;
mod config;
mod errors;
mod jobs;
mod listings;
mod metrics;
mod models;
mod notify;
mod store;
mod workflow;

use broadcast::Hub;
use cache::TieredCache;
use listings::Listings;
use models::party::PartyRef;
use models::request::{RequestKind, RequestStatus, TransitionAction, TransitionInput};
use notify::dispatcher::Dispatcher;
use notify::mailer::Mailer;
use store::postgres::PgStore;
use workflow::effects::MpscEffectQueue;
use workflow::engine::WorkflowEngine;
use workflow::gate::Actor;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub cache: TieredCache,
    pub engine: WorkflowEngine,
    pub listings: Listings,
    pub hub: Hub,
    pub config: config::Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "seferet-workflow"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .expect("failed to install OpenTelemetry tracer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "seferet=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Request { command }) => handle_request_command(cfg, command).await,
        Some(cli::Commands::Notification { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_notification_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Wire up the full runtime: store, cache, mailer, effect queue, worker.
/// Returns the shared state and the worker's join handle — a short-lived
/// caller drops the state and awaits the handle to drain pending effects.
async fn build_runtime(
    cfg: config::Config,
) -> anyhow::Result<(Arc<AppState>, tokio::task::JoinHandle<()>)> {
    let db = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to Redis")?;
    let cache = TieredCache::new(redis_conn);

    let mailer = Mailer::new(
        cfg.mail_relay_url.clone(),
        cfg.mail_signing_secret.clone(),
        db.clone(),
    );
    let dispatcher = Dispatcher::new(db.clone(), mailer, cfg.base_url.clone());

    let hub = Hub::new();
    let listings = Listings::new(db.clone(), cache.clone(), cfg.listing_cache_ttl_secs);

    let (queue, rx) = MpscEffectQueue::new(cfg.effect_queue_capacity);
    let worker = workflow::worker::spawn(rx, dispatcher, listings.clone(), hub.clone());

    let engine = WorkflowEngine::new(db.clone(), Arc::new(queue));

    let state = Arc::new(AppState {
        db,
        cache,
        engine,
        listings,
        hub,
        config: cfg,
    });
    Ok((state, worker))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let (state, _worker) = build_runtime(cfg).await?;

    tracing::info!("Running migrations...");
    state.db.migrate().await?;

    jobs::expiry::spawn(state.engine.clone(), state.config.expiry_sweep_interval_secs);
    tracing::info!(
        interval_secs = state.config.expiry_sweep_interval_secs,
        "expiry sweeper started"
    );

    jobs::maintenance::spawn(state.hub.clone(), state.cache.clone());
    tracing::info!("maintenance sweeper started (hub channels + local cache, every 60s)");

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .route(
            "/metrics",
            axum::routing::get(|| async { metrics::encode_metrics() }),
        )
        // Workflow API — nested under /api/v1 (preserves middleware + fallback)
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let site_origin = state.config.base_url.clone();
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == site_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-actor"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("SeferEt workflow service listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with service logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn readiness_check() -> &'static str {
    "ok"
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    if let Ok(v) = "nosniff".parse() {
        headers.insert("X-Content-Type-Options", v);
    }
    if let Ok(v) = "DENY".parse() {
        headers.insert("X-Frame-Options", v);
    }
    if let Ok(v) = "no-store".parse() {
        headers.insert("Cache-Control", v);
    }
    if let Ok(v) = "no-referrer".parse() {
        headers.insert("Referrer-Policy", v);
    }
    headers.remove("Server");

    resp
}

/// The acting party for resolutions made from the operator shell.
fn cli_admin_actor() -> anyhow::Result<Actor> {
    let raw = std::env::var("SEFERET_CLI_ADMIN_ID")
        .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".into());
    let id = raw
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid SEFERET_CLI_ADMIN_ID: {}", raw))?;
    Ok(Actor::Party(PartyRef::Admin(id)))
}

fn parse_status(s: &str) -> anyhow::Result<RequestStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow::anyhow!("invalid status: {}", s))
}

fn parse_kind(s: &str) -> anyhow::Result<RequestKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow::anyhow!("invalid kind: {}", s))
}

async fn handle_request_command(
    cfg: config::Config,
    cmd: cli::RequestCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::RequestCommands::List { status, kind } => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let status = status.as_deref().map(parse_status).transpose()?;
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            let requests = db.list_requests(status, kind).await?;
            if requests.is_empty() {
                println!("No requests found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<18} {:<10} {:<40} UPDATED",
                "ID", "KIND", "STATUS", "OWNER"
            );
            for r in requests {
                println!(
                    "{:<38} {:<18} {:<10} {:<40} {}",
                    r.id,
                    r.kind.event_prefix(),
                    r.status.as_str(),
                    r.owner.to_string(),
                    r.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        cli::RequestCommands::Show { request_id } => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let id = uuid::Uuid::parse_str(&request_id).context("Invalid request ID")?;
            match db.get_request(id).await? {
                None => println!("Request {} not found.", id),
                Some(r) => {
                    println!("ID:          {}", r.id);
                    println!("Kind:        {}", r.kind.event_prefix());
                    println!("Status:      {}", r.status.as_str());
                    println!("Owner:       {}", r.owner);
                    println!("Counterpart: {}", r.counterpart);
                    println!("Subject:     {}", r.subject_id);
                    if let Some(approver) = r.approver {
                        println!("Approver:    {}", approver);
                    }
                    if let Some(reason) = r.rejection_reason {
                        println!("Reason:      {}", reason);
                    }
                    if let Some(expires) = r.expires_at {
                        println!("Expires:     {}", expires);
                    }
                    println!("Updated:     {}", r.updated_at);
                }
            }
        }
        cli::RequestCommands::Approve { request_id, notes } => {
            resolve_from_cli(cfg, &request_id, TransitionAction::Approve, notes, None).await?;
        }
        cli::RequestCommands::Reject { request_id, reason } => {
            resolve_from_cli(cfg, &request_id, TransitionAction::Reject, None, Some(reason))
                .await?;
        }
    }
    Ok(())
}

/// Run one admin transition with the full effect pipeline, then let the
/// worker drain before the process exits.
async fn resolve_from_cli(
    cfg: config::Config,
    request_id: &str,
    action: TransitionAction,
    notes: Option<String>,
    rejection_reason: Option<String>,
) -> anyhow::Result<()> {
    let id = uuid::Uuid::parse_str(request_id).context("Invalid request ID")?;
    let actor = cli_admin_actor()?;

    let (state, worker) = build_runtime(cfg).await?;
    let input = TransitionInput {
        notes,
        rejection_reason,
    };

    let outcome = state.engine.transition(id, action, &actor, input).await;
    // Dropping the state drops the queue sender, letting the worker finish.
    drop(state);
    worker.await.ok();

    match outcome {
        Ok(r) => println!("Request {} is now {}.", r.id, r.status.as_str()),
        Err(errors::AppError::IllegalState { from, .. }) => {
            println!("Request {} is {} — cannot {}.", id, from.as_str(), action.as_str());
        }
        Err(errors::AppError::NotFound) => println!("Request {} not found.", id),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn handle_notification_command(
    db: &PgStore,
    cmd: cli::NotificationCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::NotificationCommands::List { recipient, limit } => {
            let party = PartyRef::parse(&recipient)
                .ok_or_else(|| anyhow::anyhow!("invalid recipient (expected kind:uuid): {}", recipient))?;
            let notifications = db.list_notifications(party, limit, 0).await?;
            if notifications.is_empty() {
                println!("No notifications.");
                return Ok(());
            }
            println!("{:<38} {:<26} {:<6} CREATED", "ID", "TYPE", "READ");
            for n in notifications {
                println!(
                    "{:<38} {:<26} {:<6} {}",
                    n.id,
                    n.r#type,
                    n.is_read,
                    n.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        cli::NotificationCommands::Unread { recipient } => {
            let party = PartyRef::parse(&recipient)
                .ok_or_else(|| anyhow::anyhow!("invalid recipient (expected kind:uuid): {}", recipient))?;
            let count = db.count_unread_notifications(party).await?;
            println!("{} unread.", count);
        }
        cli::NotificationCommands::DeadLetters { limit } => {
            let letters = db.list_dead_letters(limit).await?;
            if letters.is_empty() {
                println!("No dead letters.");
                return Ok(());
            }
            println!(
                "{:<38} {:<8} {:<40} {:<9} ERROR",
                "ID", "CHANNEL", "RECIPIENT", "ATTEMPTS"
            );
            for l in letters {
                println!(
                    "{:<38} {:<8} {:<40} {:<9} {}",
                    l.id,
                    l.channel,
                    format!("{}:{}", l.recipient_kind.as_str(), l.recipient_id),
                    l.attempts,
                    l.error
                );
            }
        }
    }
    Ok(())
}
