//! Handwriting recognition adapter (strokes → LaTeX + confidence).

use crate::traits::{HrrAdapter, HrrRecognition, HrrSession, Stroke};
use crate::util::{from_reqwest, from_status};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::time::Duration;
use tutor_domain::config::HrrConfig;
use tutor_domain::error::{AdapterError, AdapterResult};

pub struct HttpHrrAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    session_ttl: ChronoDuration,
}

impl HttpHrrAdapter {
    pub fn new(cfg: &HrrConfig, api_key: String) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| from_reqwest("hrr", e))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            session_ttl: ChronoDuration::seconds(cfg.session_ttl_secs as i64),
        })
    }
}

#[async_trait::async_trait]
impl HrrAdapter for HttpHrrAdapter {
    async fn open_session(&self) -> AdapterResult<HrrSession> {
        let url = format!("{}/sessions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| from_reqwest("hrr", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest("hrr", e))?;
        if !status.is_success() {
            return Err(from_status("hrr", status, &text));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| AdapterError::BadRequest {
            service: "hrr".into(),
            message: format!("invalid session response: {e}"),
        })?;
        let handle = body
            .get("handle")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::BadRequest {
                service: "hrr".into(),
                message: "missing 'handle' in session response".into(),
            })?
            .to_string();

        Ok(HrrSession {
            handle,
            expires_at: Utc::now() + self.session_ttl,
        })
    }

    async fn recognize(&self, handle: &str, strokes: &[Stroke]) -> AdapterResult<HrrRecognition> {
        let url = format!("{}/sessions/{handle}/recognize", self.base_url);
        let body = serde_json::json!({ "strokes": strokes_to_json(strokes) });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("hrr", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest("hrr", e))?;
        if !status.is_success() {
            return Err(from_status("hrr", status, &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| AdapterError::BadRequest {
            service: "hrr".into(),
            message: format!("invalid recognize response: {e}"),
        })?;

        Ok(HrrRecognition {
            latex: parsed.get("latex").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            text: parsed.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            confidence: parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
            line_data: parsed.get("line_data").cloned().unwrap_or(Value::Null),
            is_handwritten: parsed
                .get("is_handwritten")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            error: parsed.get("error").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

fn strokes_to_json(strokes: &[Stroke]) -> Value {
    serde_json::to_value(strokes).unwrap_or(Value::Array(Vec::new()))
}
