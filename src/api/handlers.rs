use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiJson, ApiPath, ApiQuery, RemoteUser};
use crate::errors::AppError;
use crate::models::{ApprovalRequest, ApprovalView, Grant, SubjectKind, UserSettings};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    pub offset: Option<usize>,
    pub count: Option<usize>,
}

#[derive(Deserialize)]
pub struct RequestApprovalBody {
    pub subject_id: String,
    pub reason: String,
    /// Advisory list of identities asked to review.
    #[serde(default)]
    pub approvers: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct GrantApprovalBody {
    pub justification: Option<String>,
}

// ── Approvals ────────────────────────────────────────────────

/// GET /api/users/me/approvals/:kind
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiPath(kind): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<ApprovalView>>, AppError> {
    let views = state
        .gatekeeper
        .list_approvals(user.as_str(), &kind, params.offset.unwrap_or(0), params.count)
        .await?;
    Ok(Json(views))
}

/// POST /api/users/me/approvals/:kind
pub async fn request_approval(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiPath(kind): ApiPath<String>,
    ApiJson(body): ApiJson<RequestApprovalBody>,
) -> Result<(StatusCode, Json<ApprovalRequest>), AppError> {
    let request = state
        .gatekeeper
        .request_approval(&kind, &body.subject_id, user.as_str(), &body.reason, &body.approvers)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /api/users/me/approvals/:kind/:approval_id
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiPath((kind, approval_id)): ApiPath<(String, String)>,
) -> Result<Json<ApprovalView>, AppError> {
    let kind: SubjectKind = kind.parse()?;
    let id = Uuid::parse_str(&approval_id)
        .map_err(|_| AppError::InvalidArgument(format!("malformed approval id: {:?}", approval_id)))?;

    let view = state.gatekeeper.get_approval(user.as_str(), id).await?;
    if view.subject.kind != kind {
        return Err(AppError::NotFound(format!("approval {}", id)));
    }
    Ok(Json(view))
}

/// POST /api/users/:username/approvals/:kind/:subject_id/grant
///
/// The caller grants the latest request `username` filed for the subject.
pub async fn grant_approval(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiPath((requestor, kind, subject_id)): ApiPath<(String, String, String)>,
    body: Option<Json<GrantApprovalBody>>,
) -> Result<Json<Grant>, AppError> {
    let Json(body) = body.unwrap_or_default();
    let grant = state
        .gatekeeper
        .grant_approval(
            &kind,
            &subject_id,
            &requestor,
            user.as_str(),
            body.justification.as_deref(),
        )
        .await?;
    Ok(Json(grant))
}

// ── Settings ─────────────────────────────────────────────────

/// GET /api/users/me/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
) -> Result<Json<UserSettings>, AppError> {
    Ok(Json(state.gatekeeper.get_settings(user.as_str()).await?))
}

/// POST or PUT /api/users/me/settings
pub async fn set_own_settings(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiJson(settings): ApiJson<UserSettings>,
) -> Result<Json<Value>, AppError> {
    state
        .gatekeeper
        .set_settings(user.as_str(), user.as_str(), settings)
        .await?;
    Ok(Json(json!({ "status": "OK" })))
}

/// PUT /api/users/:username/settings (admins only, unless `username` is the caller)
pub async fn set_user_settings(
    State(state): State<Arc<AppState>>,
    RemoteUser(user): RemoteUser,
    ApiPath(username): ApiPath<String>,
    ApiJson(settings): ApiJson<UserSettings>,
) -> Result<Json<Value>, AppError> {
    state
        .gatekeeper
        .set_settings(user.as_str(), &username, settings)
        .await?;
    Ok(Json(json!({ "status": "OK" })))
}
