//! Scripted-scenario harness: set up a problem, write work, ask a question,
//! and tear it all down again, without a handwriting device or HRR in the
//! loop. Kept behind the admin gate; useful for replaying a fixed transcript
//! against the live reasoning/voice pipelines during development.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use tutor_context::{AnswerKeyRow, ProblemPart};
use tutor_pipeline::TranscriptionUpdate;
use tutor_sessions::ConnectMeta;

use crate::api::admin::AdminGuard;
use crate::state::AppState;

fn error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AnswerKeyEntry {
    #[serde(default)]
    part_label: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
pub struct PartEntry {
    label: String,
    text: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    problem_text: String,
    #[serde(default)]
    answer_key: Vec<AnswerKeyEntry>,
    #[serde(default)]
    parts: Vec<PartEntry>,
    #[serde(default = "default_label")]
    label: String,
    #[serde(default = "default_question_number")]
    question_number: i32,
}

fn default_label() -> String {
    "Problem 1".into()
}

fn default_question_number() -> i32 {
    1
}

pub async fn start(_guard: AdminGuard, State(state): State<AppState>, Json(req): Json<StartRequest>) -> impl IntoResponse {
    let session_id = format!("sim_{}", uuid::Uuid::new_v4().simple());
    let document_ref = session_id.clone();

    let parts: Vec<ProblemPart> = req.parts.into_iter().map(|p| ProblemPart { label: p.label, text: p.text }).collect();
    let answer_key: Vec<AnswerKeyRow> = req
        .answer_key
        .into_iter()
        .map(|a| AnswerKeyRow { part_label: a.part_label, answer: a.answer })
        .collect();

    if let Err(e) = state
        .db
        .insert_simulated_problem(&document_ref, req.question_number, &req.label, &req.problem_text, &parts, &answer_key)
        .await
    {
        tracing::error!(error = %e, "failed to seed simulated problem");
        return error(StatusCode::INTERNAL_SERVER_ERROR, "failed to seed problem");
    }

    state.sessions.connect(
        &session_id,
        ConnectMeta {
            document_ref: Some(document_ref),
            question_number: Some(req.question_number),
        },
    );

    Json(serde_json::json!({ "session_id": session_id, "status": "ready" })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    session_id: String,
    transcription: String,
}

pub async fn write(_guard: AdminGuard, State(state): State<AppState>, Json(req): Json<WriteRequest>) -> impl IntoResponse {
    if !state.sessions.is_connected(&req.session_id) {
        return error(StatusCode::NOT_FOUND, format!("unknown session: {}", req.session_id));
    }

    if let Err(e) = state
        .pipeline_repo
        .upsert_transcription(
            &req.session_id,
            1,
            TranscriptionUpdate {
                latex: req.transcription.clone(),
                text: req.transcription,
                confidence: Some(1.0),
                line_data: serde_json::json!({}),
                classified_diagram: false,
            },
        )
        .await
    {
        tracing::error!(error = %e, "failed to write simulated transcription");
        return error(StatusCode::INTERNAL_SERVER_ERROR, "failed to write transcription");
    }

    state.reasoning.schedule_reasoning(req.session_id, 1);
    Json(serde_json::json!({ "status": "scheduled" })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    session_id: String,
    question: String,
}

pub async fn ask(_guard: AdminGuard, State(state): State<AppState>, Json(req): Json<AskRequest>) -> impl IntoResponse {
    if !state.sessions.is_connected(&req.session_id) {
        return error(StatusCode::NOT_FOUND, format!("unknown session: {}", req.session_id));
    }
    let tts_id = state.voice.clone().ask_question(req.session_id, 1, req.question);
    Json(serde_json::json!({ "status": "scheduled", "tts_id": tts_id })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    session_id: String,
}

pub async fn reset(_guard: AdminGuard, State(state): State<AppState>, Json(req): Json<ResetRequest>) -> impl IntoResponse {
    let Some(session) = state.sessions.get(&req.session_id) else {
        return error(StatusCode::NOT_FOUND, format!("unknown session: {}", req.session_id));
    };
    let document_ref = session.document_ref.unwrap_or_else(|| req.session_id.clone());

    state.transcription.purge_session(&req.session_id, &[1]);
    state.reasoning.purge_session(&req.session_id, &[1]);
    state.sessions.disconnect(&req.session_id);

    if let Err(e) = state.db.delete_simulation_data(&req.session_id, &document_ref).await {
        tracing::error!(error = %e, "failed to clean up simulation data");
        return error(StatusCode::INTERNAL_SERVER_ERROR, "failed to clean up");
    }

    Json(serde_json::json!({ "status": "cleaned up" })).into_response()
}
