//! Stroke ingestion: `Connect`, `Disconnect`, stroke events, and `Clear`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use tutor_adapters::Stroke;
use tutor_pipeline::{StrokeEventType, StrokeLogEntry};
use tutor_sessions::{ConnectMeta, ContentMode};

use crate::state::AppState;

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn not_found(message: impl Into<String>) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    session_id: String,
    document_name: Option<String>,
    question_number: Option<i32>,
}

pub async fn connect(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> impl IntoResponse {
    if req.session_id.trim().is_empty() {
        return bad_request("session_id is required");
    }
    let evicted = state.sessions.connect(
        &req.session_id,
        ConnectMeta {
            document_ref: req.document_name,
            question_number: req.question_number,
        },
    );
    Json(serde_json::json!({ "ok": true, "evicted": evicted })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    session_id: String,
}

pub async fn disconnect(State(state): State<AppState>, Json(req): Json<DisconnectRequest>) -> impl IntoResponse {
    let pages = state.take_active_pages(&req.session_id);
    state.transcription.purge_session(&req.session_id, &pages);
    state.reasoning.purge_session(&req.session_id, &pages);
    state.sessions.disconnect(&req.session_id);
    Json(serde_json::json!({ "ok": true })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeEventKind {
    Draw,
    Erase,
}

#[derive(Debug, Deserialize)]
pub struct StrokeRequest {
    session_id: String,
    page: i32,
    strokes: Vec<Stroke>,
    event_type: StrokeEventKind,
    part_label: Option<String>,
    content_mode: Option<ContentMode>,
}

pub async fn post_strokes(State(state): State<AppState>, Json(req): Json<StrokeRequest>) -> impl IntoResponse {
    if !state.sessions.is_connected(&req.session_id) {
        return not_found("unknown session");
    }

    state.sessions.set_active_part(&req.session_id, req.part_label);
    state.sessions.set_content_mode(&req.session_id, req.content_mode);
    state.sessions.touch(&req.session_id);
    state.record_active_page(&req.session_id, req.page);

    let event_type = match req.event_type {
        StrokeEventKind::Draw => StrokeEventType::Draw,
        StrokeEventKind::Erase => StrokeEventType::Erase,
    };

    if let Err(e) = state
        .pipeline_repo
        .append_stroke_log(
            &req.session_id,
            req.page,
            StrokeLogEntry {
                event_type,
                strokes: req.strokes,
                received_at: Utc::now(),
            },
        )
        .await
    {
        tracing::error!(error = %e, "failed to append stroke log");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" })))
            .into_response();
    }

    state.transcription.on_stroke_event(req.session_id.clone(), req.page);
    state.reasoning.schedule_reasoning(req.session_id, req.page);

    Json(serde_json::json!({ "ok": true })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    session_id: String,
    page: i32,
}

pub async fn clear(State(state): State<AppState>, Json(req): Json<ClearRequest>) -> impl IntoResponse {
    let key_pages = [req.page];
    state.transcription.purge_session(&req.session_id, &key_pages);
    state.reasoning.purge_session(&req.session_id, &key_pages);
    if let Err(e) = state.pipeline_repo.delete_stroke_log(&req.session_id, req.page).await {
        tracing::error!(error = %e, "failed to clear stroke log");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal error" })))
            .into_response();
    }
    Json(serde_json::json!({ "ok": true })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_event_kind_lowercase() {
        let draw: StrokeEventKind = serde_json::from_str("\"draw\"").unwrap();
        let erase: StrokeEventKind = serde_json::from_str("\"erase\"").unwrap();
        assert!(matches!(draw, StrokeEventKind::Draw));
        assert!(matches!(erase, StrokeEventKind::Erase));
        assert!(serde_json::from_str::<StrokeEventKind>("\"Draw\"").is_err());
    }

    #[test]
    fn connect_request_optional_fields_default_to_none() {
        let req: ConnectRequest = serde_json::from_str(r#"{"session_id": "abc"}"#).unwrap();
        assert_eq!(req.session_id, "abc");
        assert!(req.document_name.is_none());
        assert!(req.question_number.is_none());
    }

    #[test]
    fn bad_request_carries_message() {
        let response = bad_request("session_id is required");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
