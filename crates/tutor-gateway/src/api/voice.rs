//! Voice endpoints: plain transcription, and the transcribe-then-ask
//! shortcut that kicks off [`tutor_pipeline::VoiceQuestionPipeline`].

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

#[derive(Debug)]
struct VoiceUpload {
    audio: Vec<u8>,
    session_id: String,
    page: i32,
}

async fn read_multipart(mut multipart: Multipart) -> Result<VoiceUpload, String> {
    let mut audio = None;
    let mut session_id = None;
    let mut page = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        match field.name().unwrap_or_default() {
            "audio" => audio = Some(field.bytes().await.map_err(|e| e.to_string())?.to_vec()),
            "session_id" => session_id = Some(field.text().await.map_err(|e| e.to_string())?),
            "page" => {
                let text = field.text().await.map_err(|e| e.to_string())?;
                page = Some(text.parse::<i32>().map_err(|_| "page must be an integer".to_string())?);
            }
            _ => {}
        }
    }

    Ok(VoiceUpload {
        audio: audio.ok_or("missing audio field")?,
        session_id: session_id.ok_or("missing session_id field")?,
        page: page.ok_or("missing page field")?,
    })
}

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn transcribe(State(state): State<AppState>, multipart: Multipart) -> impl IntoResponse {
    let upload = match read_multipart(multipart).await {
        Ok(u) => u,
        Err(e) => return bad_request(e),
    };

    match state.stt.transcribe(&upload.audio).await {
        Ok(text) => Json(serde_json::json!({ "transcription": text })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "transcription failed");
            (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": "transcription failed" }))).into_response()
        }
    }
}

pub async fn question(State(state): State<AppState>, multipart: Multipart) -> impl IntoResponse {
    let upload = match read_multipart(multipart).await {
        Ok(u) => u,
        Err(e) => return bad_request(e),
    };

    if !state.sessions.is_connected(&upload.session_id) {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown session" }))).into_response();
    }

    let transcription = match state.stt.transcribe(&upload.audio).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "transcription failed");
            return (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": "transcription failed" })))
                .into_response();
        }
    };

    state
        .voice
        .clone()
        .ask_question(upload.session_id, upload.page, transcription.clone());

    Json(serde_json::json!({ "transcription": transcription })).into_response()
}
