//! # gatekeeper-server
//!
//! HTTP API for the action gatekeeper. Provides:
//!
//! - Self-scoped attention profile reads and updates
//! - Admin-scoped company policy reads and updates
//! - Decision log and pending-action review
//! - A manual `POST /test` entry point into `evaluate()`

pub mod auth;
pub mod error;
pub mod metrics;

use axum::{
    Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use gatekeeper_config::ServerConfig;
use gatekeeper_core::{ActionSpec, Actor, FieldError, GateError, Verdict};
use gatekeeper_engine::{Decision, Gatekeeper};
use gatekeeper_store::{
    AttentionProfile, CompanyPolicy, DecisionLog, DecisionRecord, LogFilter, Page, Pagination,
    PolicyPatch, ProfilePatch, Resolution, ResolutionRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use auth::Caller;
use error::{ApiError, ApiResult};

pub const API_PREFIX: &str = "/api/v1/gatekeeper";

/// Shared server state.
pub struct AppState {
    pub gatekeeper: Gatekeeper,
    pub config: ServerConfig,
    /// Prometheus-compatible metrics.
    pub metrics: metrics::Metrics,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

/// Query params for `GET /logs`.
#[derive(Debug, Default, Deserialize)]
struct LogParams {
    action: Option<String>,
    actor_id: Option<String>,
    decision: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

/// Query params for `GET /pending-actions`.
#[derive(Debug, Default, Deserialize)]
struct PageParams {
    limit: Option<String>,
    offset: Option<String>,
}

/// Build the Axum router.
pub fn build_router(config: ServerConfig, gatekeeper: Gatekeeper) -> Router {
    let state = Arc::new(AppState {
        config: config.clone(),
        gatekeeper,
        metrics: metrics::Metrics::new(),
    });

    let api_routes = Router::new()
        .route(
            &format!("{API_PREFIX}/profile"),
            get(get_profile_handler).patch(patch_profile_handler),
        )
        .route(
            &format!("{API_PREFIX}/policy"),
            get(get_policy_handler).patch(patch_policy_handler),
        )
        .route(&format!("{API_PREFIX}/logs"), get(logs_handler))
        .route(&format!("{API_PREFIX}/pending-actions"), get(pending_handler))
        .route(
            &format!("{API_PREFIX}/pending-actions/{{id}}/resolve"),
            post(resolve_handler),
        )
        .route(&format!("{API_PREFIX}/test"), post(test_handler))
        .route(&format!("{API_PREFIX}/actions"), get(actions_handler));

    // Apply API key auth if configured
    let api_routes = if config.api_key.is_some() {
        api_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
    } else {
        api_routes
    };

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Counts every request, and every error and validation failure by status.
async fn track_metrics(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    state.metrics.inc_http_requests();
    let response = next.run(request).await;
    let status = response.status();
    if status == StatusCode::BAD_REQUEST {
        state.metrics.inc_validation_failures();
    }
    if status.is_client_error() || status.is_server_error() {
        state.metrics.inc_http_errors();
    }
    response
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (
    StatusCode,
    [(axum::http::header::HeaderName, &'static str); 1],
    String,
) {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ── Profile & policy ───────────────────────────────────────────

async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
) -> ApiResult<Json<AttentionProfile>> {
    let gk = &state.gatekeeper;
    let ceiling = gk.autonomy_ceiling(&actor.company_id).await?;
    let profile = gk.profiles().get(&actor.user_id, ceiling).await?;
    Ok(Json(profile))
}

async fn patch_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<AttentionProfile>> {
    let Json(body) = body?;
    let patch = ProfilePatch::from_json(&body)?;
    let gk = &state.gatekeeper;
    let ceiling = gk.autonomy_ceiling(&actor.company_id).await?;
    let profile = gk.profiles().patch(&actor.user_id, &patch, ceiling).await?;
    Ok(Json(profile))
}

async fn get_policy_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<CompanyPolicy>> {
    caller.require_admin()?;
    let policy = state.gatekeeper.policies().get(&caller.0.company_id).await?;
    Ok(Json(policy))
}

async fn patch_policy_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<CompanyPolicy>> {
    caller.require_admin()?;
    let Json(body) = body?;
    let gk = &state.gatekeeper;
    let patch = PolicyPatch::from_json(&body, gk.catalog())?;
    let policy = gk.policies().patch(&caller.0.company_id, &patch).await?;
    info!(company_id = %caller.0.company_id, updated_by = %caller.0.user_id, "company policy updated");
    Ok(Json(policy))
}

// ── Audit & review ─────────────────────────────────────────────

async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<Page<DecisionRecord>>> {
    let (filter, page) = log_query(&actor, &params)?;
    let records = state.gatekeeper.log().query(&filter, page).await?;
    Ok(Json(records))
}

async fn pending_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Page<DecisionRecord>>> {
    let mut errors = Vec::new();
    let limit = parse_u32("limit", params.limit.as_deref(), &mut errors);
    let offset = parse_u32("offset", params.offset.as_deref(), &mut errors);
    if !errors.is_empty() {
        return Err(GateError::Validation(errors).into());
    }
    let page = Pagination::new(limit, offset)?;
    let filter = scoped_filter(&actor);
    let records = state.gatekeeper.pending_actions(&filter, page).await?;
    Ok(Json(records))
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ResolutionRecord>> {
    let id = id
        .parse::<Uuid>()
        .map_err(|_| GateError::invalid("id", format!("'{id}' is not a decision id")))?;
    let Json(body) = body?;
    let resolution = match body.get("resolution") {
        Some(Value::String(s)) => Resolution::parse(s).ok_or_else(|| {
            GateError::invalid("resolution", format!("expected 'approved' or 'rejected', got '{s}'"))
        })?,
        Some(_) => return Err(GateError::invalid("resolution", "expected a string").into()),
        None => return Err(GateError::invalid("resolution", "is required").into()),
    };
    let record = state.gatekeeper.resolve(&actor, id, resolution).await?;
    Ok(Json(record))
}

// ── Evaluation ─────────────────────────────────────────────────

async fn test_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Decision>> {
    let Json(body) = body?;
    let (action, params) = test_request(&body)?;
    let decision = state.gatekeeper.evaluate(&actor, &action, &params).await;
    state.metrics.inc_decision(decision.decision);
    if decision.decision == Verdict::Block {
        warn!(action = %action, reason = %decision.reason, "test evaluation blocked");
    }
    Ok(Json(decision))
}

async fn actions_handler(
    State(state): State<Arc<AppState>>,
    Caller(_): Caller,
) -> Json<Vec<ActionSpec>> {
    Json(state.gatekeeper.catalog().iter().cloned().collect())
}

// ── Request parsing ────────────────────────────────────────────

/// A filter that keeps callers inside their company, and non-admins to their own entries.
fn scoped_filter(actor: &Actor) -> LogFilter {
    let mut filter = LogFilter::for_company(actor.company_id.clone());
    if !actor.role.is_admin() {
        filter.actor_id = Some(actor.user_id.clone());
    }
    filter
}

fn log_query(actor: &Actor, params: &LogParams) -> ApiResult<(LogFilter, Pagination)> {
    let mut filter = scoped_filter(actor);
    let mut errors = Vec::new();

    if let Some(requested) = params.actor_id.as_deref().filter(|s| !s.is_empty()) {
        if filter.actor_id.as_deref().is_some_and(|own| own != requested) {
            return Err(GateError::Forbidden("only admins can read other users' decisions".into()).into());
        }
        filter.actor_id = Some(requested.to_string());
    }
    filter.action = params.action.clone().filter(|s| !s.is_empty());
    if let Some(raw) = params.decision.as_deref() {
        match Verdict::parse(raw) {
            Some(v) => filter.decision = Some(v),
            None => errors.push(FieldError::new("decision", format!("unknown decision '{raw}'"))),
        }
    }
    filter.from = parse_time("from", params.from.as_deref(), &mut errors);
    filter.to = parse_time("to", params.to.as_deref(), &mut errors);
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            errors.push(FieldError::new("from", "must not be after 'to'"));
        }
    }
    let limit = parse_u32("limit", params.limit.as_deref(), &mut errors);
    let offset = parse_u32("offset", params.offset.as_deref(), &mut errors);

    if !errors.is_empty() {
        return Err(GateError::Validation(errors).into());
    }
    Ok((filter, Pagination::new(limit, offset)?))
}

fn parse_time(field: &str, raw: Option<&str>, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(field, format!("'{raw}' is not an RFC 3339 timestamp")));
            None
        }
    }
}

fn parse_u32(field: &str, raw: Option<&str>, errors: &mut Vec<FieldError>) -> Option<u32> {
    let raw = raw?;
    match raw.parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(FieldError::new(field, format!("'{raw}' is not a non-negative integer")));
            None
        }
    }
}

/// `{"action": string, "params"?: object}`.
fn test_request(body: &Value) -> gatekeeper_core::Result<(String, Value)> {
    let action = match body.get("action") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(GateError::invalid("action", "is required"));
        }
        Some(_) => return Err(GateError::invalid("action", "expected a string")),
    };
    let params = match body.get("params") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(p @ Value::Object(_)) => p.clone(),
        Some(_) => return Err(GateError::invalid("params", "expected an object")),
    };
    Ok((action, params))
}

/// Start the HTTP server, with a background sweep of expired rate-limit counters.
pub async fn start_server(config: ServerConfig, gatekeeper: Gatekeeper) -> gatekeeper_core::Result<()> {
    let listen = config.listen.clone();
    let sweep_every = std::time::Duration::from_secs(config.sweep_interval_secs.max(1));

    tokio::spawn({
        let gatekeeper = gatekeeper.clone();
        async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match gatekeeper.sweep_counters().await {
                    Ok(0) => {}
                    Ok(n) => info!(removed = n, "swept expired rate-limit counters"),
                    Err(e) => warn!(error = %e, "rate-limit sweep failed"),
                }
            }
        }
    });

    let router = build_router(config, gatekeeper);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| GateError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router).await?;

    Ok(())
}
