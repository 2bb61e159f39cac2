// src/service.rs

use crate::authz::AuthorizationGate;
use crate::claims::TokenClaims;
use crate::config::{ServerSettings, TrustConfig};
use crate::error::ConfigError;
use crate::verifier::TokenVerifier;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, warn};

/// Shared state for the HTTP entry point.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrustConfig>,
    pub verifier: TokenVerifier,
    pub gate: AuthorizationGate,
}

impl AppState {
    pub fn new(config: Arc<TrustConfig>) -> Result<Self, ConfigError> {
        let verifier = TokenVerifier::from_config(Arc::clone(&config))?;
        Ok(Self {
            gate: AuthorizationGate::from_config(&config),
            verifier,
            config,
        })
    }
}

/// Why a request was turned away. Clients learn only which of the two
/// classes applies, never which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No usable credential: missing header, other scheme, or any verification failure.
    Unauthorized,
    /// A valid identity without the required role.
    Forbidden,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: &'static str,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                Json(ErrorBody { detail: "Unauthorized" }),
            )
                .into_response(),
            Rejection::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(ErrorBody { detail: "Insufficient role" }),
            )
                .into_response(),
        }
    }
}

/// Claims of a caller that passed verification and holds the required role.
#[derive(Debug, Clone)]
pub struct Authorized(pub TokenClaims);

#[async_trait]
impl<S> FromRequestParts<S> for Authorized
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers)?.to_owned();

        let claims = state.verifier.verify(&token).await.map_err(|err| {
            warn!(error = %err, "Rejected bearer token");
            Rejection::Unauthorized
        })?;

        state
            .gate
            .authorize(&claims, &state.config.required_role)
            .map_err(|err| {
                warn!(error = %err, sub = ?claims.subject(), "Authenticated caller lacks role");
                Rejection::Forbidden
            })?;

        Ok(Authorized(claims))
    }
}

/// Extracts the credential from `Authorization: Bearer <token>`. The scheme
/// is matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Result<&str, Rejection> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(Rejection::Unauthorized)?
        .to_str()
        .map_err(|_| Rejection::Unauthorized)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(Rejection::Unauthorized)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(Rejection::Unauthorized);
    }
    Ok(token)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsResponse {
    pub report_data: Vec<ReportItem>,
}

#[derive(Debug, Serialize)]
pub struct ReportItem {
    pub id: u32,
    pub value: String,
}

async fn get_reports(Authorized(claims): Authorized) -> Json<ReportsResponse> {
    debug!(sub = ?claims.subject(), "Serving reports");
    Json(ReportsResponse {
        report_data: (1..=2)
            .map(|id| ReportItem {
                id,
                value: format!("Report item {id}"),
            })
            .collect(),
    })
}

/// Routes without CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/reports", get(get_reports))
        .with_state(state)
}

/// Browser access for the configured origins, with credentials. Methods and
/// headers are mirrored from the preflight, since wildcards cannot be
/// combined with credentials.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// The full application: routes plus CORS.
pub fn app(state: AppState, settings: &ServerSettings) -> Router {
    router(state).layer(cors_layer(&settings.cors_allowed_origins))
}
