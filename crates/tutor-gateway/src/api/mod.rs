pub mod admin;
pub mod events;
pub mod simulation;
pub mod strokes;
pub mod tts;
pub mod voice;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn health() -> &'static str {
    "ok"
}

/// Student-facing routes (session lifecycle, ink, voice, event/audio
/// delivery) merged with the admin-gated debug and simulation routes.
pub fn router() -> Router<AppState> {
    let student = Router::new()
        .route("/health", get(health))
        .route("/strokes/connect", post(strokes::connect))
        .route("/strokes/disconnect", post(strokes::disconnect))
        .route("/strokes", post(strokes::post_strokes))
        .route("/strokes/clear", post(strokes::clear))
        .route("/voice/transcribe", post(voice::transcribe))
        .route("/voice/question", post(voice::question))
        .route("/events", get(events::stream))
        .route("/tts/stream/:tts_id", get(tts::stream));

    let admin = Router::new()
        .route("/admin/stroke-logs", get(admin::get_stroke_logs).delete(admin::delete_stroke_logs))
        .route("/admin/reasoning-logs", get(admin::get_reasoning_logs))
        .route("/admin/page-transcription", get(admin::get_page_transcription))
        .route("/admin/reasoning-preview", get(admin::get_reasoning_preview))
        .route("/simulation/start", post(simulation::start))
        .route("/simulation/write", post(simulation::write))
        .route("/simulation/ask", post(simulation::ask))
        .route("/simulation/reset", post(simulation::reset));

    student.merge(admin).layer(TraceLayer::new_for_http())
}
