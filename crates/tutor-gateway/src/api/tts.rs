//! Synthesized audio fetch. Consumes a handle registered by the reasoning
//! scheduler or the voice-question pipeline, synthesizing on demand so no
//! audio bytes are held in memory longer than the request that wants them.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream;

use tutor_pipeline::{SentenceEvent, TtsPayload};

use crate::state::AppState;

fn pcm_headers() -> [(header::HeaderName, &'static str); 4] {
    [
        (header::CONTENT_TYPE, "application/octet-stream"),
        (header::HeaderName::from_static("x-sample-rate"), "24000"),
        (header::HeaderName::from_static("x-channels"), "1"),
        (header::HeaderName::from_static("x-sample-width"), "2"),
    ]
}

pub async fn stream(State(state): State<AppState>, Path(tts_id): Path<String>) -> Response {
    let Some(payload) = state.tts.take(&tts_id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown or already consumed tts_id" })))
            .into_response();
    };

    match payload {
        TtsPayload::Fixed(text) => match state.tts_adapter.synthesize(&text).await {
            Ok(pcm) => (pcm_headers(), pcm).into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed");
                (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": "synthesis failed" }))).into_response()
            }
        },
        TtsPayload::Stream(rx) => {
            let adapter = state.tts_adapter.clone();
            let body_stream = stream::unfold(rx, move |mut rx| {
                let adapter = adapter.clone();
                async move {
                    loop {
                        match rx.recv().await {
                            Some(SentenceEvent::Sentence(sentence)) => {
                                if sentence.trim().is_empty() {
                                    continue;
                                }
                                return match adapter.synthesize(&sentence).await {
                                    Ok(pcm) => Some((Ok::<_, std::io::Error>(pcm), rx)),
                                    Err(e) => {
                                        tracing::warn!(error = %e, "synthesis failed mid-stream");
                                        Some((Ok(Vec::new()), rx))
                                    }
                                };
                            }
                            Some(SentenceEvent::Done) | None => return None,
                        }
                    }
                }
            });

            let body = Body::from_stream(body_stream);
            (pcm_headers(), body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_headers_describe_24khz_mono_16bit() {
        let headers = pcm_headers();
        assert_eq!(headers[0], (header::CONTENT_TYPE, "application/octet-stream"));
        assert_eq!(headers[1].1, "24000");
        assert_eq!(headers[2].1, "1");
        assert_eq!(headers[3].1, "2");
    }
}
