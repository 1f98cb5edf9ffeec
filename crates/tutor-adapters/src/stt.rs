//! Speech-to-text adapter.

use crate::traits::SttAdapter;
use crate::util::{from_reqwest, from_status};
use serde_json::Value;
use std::time::Duration;
use tutor_domain::config::SttConfig;
use tutor_domain::error::{AdapterError, AdapterResult};

pub struct HttpSttAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpSttAdapter {
    pub fn new(cfg: &SttConfig, api_key: String) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| from_reqwest("stt", e))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait::async_trait]
impl SttAdapter for HttpSttAdapter {
    async fn transcribe(&self, audio_bytes: &[u8]) -> AdapterResult<String> {
        let url = format!("{}/transcriptions", self.base_url);
        let part = reqwest::multipart::Part::bytes(audio_bytes.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| from_reqwest("stt", e))?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| from_reqwest("stt", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest("stt", e))?;
        if !status.is_success() {
            return Err(from_status("stt", status, &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| AdapterError::BadRequest {
            service: "stt".into(),
            message: format!("invalid transcription response: {e}"),
        })?;
        parsed
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::BadRequest {
                service: "stt".into(),
                message: "missing 'text' in transcription response".into(),
            })
    }
}
