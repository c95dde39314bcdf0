use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request, State},
    http::{request::Parts, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::Identity;
use crate::AppState;

pub mod handlers;

/// Header the authentication proxy sets to the verified username.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Build the API router. Routes are relative; [`app`] mounts them under `/api`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/users/me/approvals/:kind",
            get(handlers::list_approvals).post(handlers::request_approval),
        )
        .route(
            "/users/me/approvals/:kind/:approval_id",
            get(handlers::get_approval),
        )
        .route(
            "/users/:username/approvals/:kind/:subject_id/grant",
            post(handlers::grant_approval),
        )
        .route(
            "/users/me/settings",
            get(handlers::get_settings)
                .post(handlers::set_own_settings)
                .put(handlers::set_own_settings),
        )
        .route("/users/:username/settings", put(handlers::set_user_settings))
        .layer(middleware::from_fn_with_state(state, require_api_key))
        .fallback(fallback_404)
}

/// The full application: health and metrics endpoints plus `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(|origin, _| {
                    let origin = origin.to_str().unwrap_or("");
                    origin.starts_with("http://localhost:") || origin.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static(REMOTE_USER_HEADER),
                    HeaderName::from_static(API_KEY_HEADER),
                ]),
        )
        .layer(middleware::from_fn(request_id_middleware))
}

async fn fallback_404() -> Response {
    AppError::NotFound("no such route".into()).into_response()
}

async fn metrics_handler() -> String {
    crate::metrics::encode_metrics()
}

/// Middleware: when an API key is configured, `x-api-key` must match it.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    match req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // Never log the full provided key.
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!(provided = %masked, "api: invalid key");
            Err(AppError::Unauthenticated("invalid api key".into()))
        }
        None => {
            tracing::warn!("api: missing x-api-key header");
            Err(AppError::Unauthenticated("missing api key".into()))
        }
    }
}

/// Middleware: tags every response with a fresh `x-request-id`.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// The verified caller identity, taken from [`REMOTE_USER_HEADER`].
#[derive(Debug, Clone)]
pub struct RemoteUser(pub Identity);

/// `axum::Json` whose rejections render as [`AppError::InvalidArgument`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S> FromRequestParts<S> for RemoteUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(REMOTE_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("missing x-remote-user header".into()))?;
        let identity = Identity::new(raw)
            .map_err(|_| AppError::Unauthenticated("malformed x-remote-user header".into()))?;
        Ok(RemoteUser(identity))
    }
}
