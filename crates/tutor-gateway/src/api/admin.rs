//! Admin/debug endpoints: inspect and clear persisted state for a session
//! without touching the production student-facing surface.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use tutor_context::build_context_structured;

use crate::state::AppState;

/// Bearer-token gate for `/admin/*`. Mirrors the same "absent hash means dev
/// mode" semantics as the rest of the service's admin auth: when no token
/// env var was set at startup, every request passes unauthenticated.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_token_hash {
            Some(h) => h,
            None => return Ok(AdminGuard),
        };

        let provided = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "invalid admin token" }))));
        }
        Ok(AdminGuard)
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: String,
}

pub async fn get_stroke_logs(_guard: AdminGuard, State(state): State<AppState>, Query(q): Query<SessionQuery>) -> impl IntoResponse {
    let Some(session) = state.sessions.get(&q.session_id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown session" }))).into_response();
    };
    let page = session.question_number.unwrap_or(1);
    match state.pipeline_repo.list_stroke_log(&q.session_id, page).await {
        Ok(entries) => Json(serde_json::json!({ "count": entries.len() })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list stroke log");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" }))).into_response()
        }
    }
}

pub async fn delete_stroke_logs(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> impl IntoResponse {
    let page = state.sessions.get(&q.session_id).and_then(|s| s.question_number).unwrap_or(1);
    match state.pipeline_repo.delete_stroke_log(&q.session_id, page).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete stroke log");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionPageQuery {
    session_id: String,
    page: i32,
}

pub async fn get_reasoning_logs(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<SessionPageQuery>,
) -> impl IntoResponse {
    match state.context_repo.get_recent_reasoning_logs(&q.session_id, q.page, 50).await {
        Ok(logs) => Json(serde_json::json!({ "logs": logs.into_iter().map(|l| serde_json::json!({
            "action": l.action,
            "message": l.message,
            "internal_reasoning": l.internal_reasoning,
            "source": l.source,
            "is_error_flag": l.is_error_flag,
        })).collect::<Vec<_>>() }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list reasoning logs");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" }))).into_response()
        }
    }
}

pub async fn get_page_transcription(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<SessionPageQuery>,
) -> impl IntoResponse {
    match state.context_repo.get_page_transcription(&q.session_id, q.page).await {
        Ok(Some(row)) => Json(serde_json::json!({ "text": row.text, "line_data": row.line_data })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no transcription for that page" }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read page transcription");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" }))).into_response()
        }
    }
}

pub async fn get_reasoning_preview(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Query(q): Query<SessionPageQuery>,
) -> impl IntoResponse {
    let Some(session) = state.sessions.get(&q.session_id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown session" }))).into_response();
    };
    let erase_snapshots = state.transcription.erase_snapshots(&q.session_id, q.page);
    match build_context_structured(state.context_repo.as_ref(), &session, q.page, &erase_snapshots).await {
        Ok(sections) => Json(serde_json::json!({
            "sections": sections.into_iter().map(|s| serde_json::json!({ "title": s.title, "content": s.content })).collect::<Vec<_>>()
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to build reasoning preview");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" }))).into_response()
        }
    }
}
