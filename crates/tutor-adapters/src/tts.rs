//! Text-to-speech adapter: one sentence in, mono 24kHz PCM16 out.

use crate::traits::TtsAdapter;
use crate::util::{from_reqwest, from_status};
use std::time::Duration;
use tutor_domain::config::TtsConfig;
use tutor_domain::error::AdapterResult;

pub struct HttpTtsAdapter {
    base_url: String,
    api_key: String,
    voice: String,
    speed: f32,
    client: reqwest::Client,
}

impl HttpTtsAdapter {
    pub fn new(cfg: &TtsConfig, api_key: String) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| from_reqwest("tts", e))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            voice: cfg.voice.clone(),
            speed: cfg.speed,
            client,
        })
    }
}

#[async_trait::async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn synthesize(&self, sentence: &str) -> AdapterResult<Vec<u8>> {
        let body = serde_json::json!({
            "text": sentence,
            "voice": self.voice,
            "speed": self.speed,
            "sample_rate": 24_000,
            "output_format": "pcm",
        });

        let resp = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("tts", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(from_status("tts", status, &text));
        }

        let bytes = resp.bytes().await.map_err(|e| from_reqwest("tts", e))?;
        Ok(bytes.to_vec())
    }
}
