//! The actor boundary. Authentication happens upstream; the gateway forwards
//! the authenticated identity in headers and, optionally, a shared API key.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gatekeeper_core::{Actor, GateError, Role};
use std::sync::Arc;
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const ROLE_HEADER: &str = "x-actor-role";

/// The authenticated caller, read from the identity headers.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

impl Caller {
    /// Fail with 403 unless the caller administers their company.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role.is_admin() {
            Ok(())
        } else {
            Err(GateError::Forbidden("company admin role required".into()).into())
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(Caller).map_err(ApiError::from)
    }
}

pub fn actor_from_headers(headers: &HeaderMap) -> gatekeeper_core::Result<Actor> {
    let user_id = header(headers, ACTOR_ID_HEADER)?;
    let company_id = header(headers, COMPANY_ID_HEADER)?;
    let role = header(headers, ROLE_HEADER)?;
    let role = Role::parse(role)
        .ok_or_else(|| GateError::Unauthorized(format!("unknown role '{role}'")))?;
    Ok(Actor::new(user_id, company_id, role))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> gatekeeper_core::Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GateError::Unauthorized(format!("missing or invalid {name} header")))
}

/// Middleware that checks the Authorization header against the configured API key.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(ref expected_key) = state.config.api_key {
        let provided = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(key) if key == expected_key => {}
            _ => {
                warn!("unauthorized API request, invalid or missing API key");
                return ApiError(GateError::Unauthorized("invalid or missing API key".into()))
                    .into_response();
            }
        }
    }
    next.run(request).await
}
