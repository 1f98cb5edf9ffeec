//! Reasoning/voice-question LLM adapter, OpenAI-compatible wire format.
//!
//! Works with OpenAI and any other endpoint that follows the OpenAI chat
//! completions contract. Only unary generation and token streaming are
//! exposed — no tool-calling, no embeddings: the tutoring pipeline asks the
//! model for one JSON object per call (a decision, or a streamed one).

use crate::traits::{GenerateRequest, LlmAdapter};
use crate::util::{from_reqwest, from_status};
use serde_json::Value;
use std::time::Duration;
use tutor_domain::config::LlmConfig;
use tutor_domain::error::{AdapterError, AdapterResult};
use tutor_domain::stream::{BoxStream, StreamEvent, Usage};

pub struct OpenAiCompatLlm {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    stream_idle_timeout: Duration,
}

impl OpenAiCompatLlm {
    pub fn new(cfg: &LlmConfig, api_key: String) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.unary_timeout_secs))
            .build()
            .map_err(|e| from_reqwest("llm", e))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            stream_idle_timeout: Duration::from_secs(cfg.stream_idle_timeout_secs),
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let mut content: Vec<Value> = vec![serde_json::json!({
            "type": "text",
            "text": req.user,
        })];
        for image in &req.images {
            let encoded = base64_encode(image);
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{encoded}")},
            }));
        }

        let messages = serde_json::json!([
            {"role": "system", "content": req.system},
            {"role": "user", "content": content},
        ]);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "stream": stream,
        });

        if let Some(schema) = &req.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "tutor_response",
                    "strict": true,
                    "schema": schema,
                },
            });
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmAdapter for OpenAiCompatLlm {
    async fn generate(&self, req: GenerateRequest) -> AdapterResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, false);

        tracing::debug!(url = %url, model = %req.model, "llm generate request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("llm", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest("llm", e))?;
        if !status.is_success() {
            return Err(from_status("llm", status, &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| AdapterError::BadRequest {
            service: "llm".into(),
            message: format!("invalid JSON response: {e}"),
        })?;
        extract_content(&parsed)
    }

    async fn generate_stream(
        &self,
        req: GenerateRequest,
    ) -> AdapterResult<BoxStream<'static, AdapterResult<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, true);

        tracing::debug!(url = %url, model = %req.model, "llm stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest("llm", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(from_status("llm", status, &text));
        }

        let _idle_timeout = self.stream_idle_timeout;
        Ok(crate::sse::sse_response_stream(resp, parse_sse_data_vec))
    }
}

fn extract_content(body: &Value) -> AdapterResult<String> {
    body.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AdapterError::BadRequest {
            service: "llm".into(),
            message: "no content in response".into(),
        })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_sse_data_vec(data: &str) -> Vec<AdapterResult<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(AdapterError::BadRequest {
                service: "llm".into(),
                message: format!("malformed SSE chunk: {e}"),
            })]
        }
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let choice = match choice {
        Some(c) => c,
        None => {
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        }
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_usage);
        return vec![Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        })];
    }

    if let Some(text) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        if !text.is_empty() {
            return vec![Ok(StreamEvent::Token {
                text: text.to_string(),
            })];
        }
    }

    Vec::new()
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[((b0 & 0x03) << 4 | b1 >> 4) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[((b1 & 0x0f) << 2 | b2 >> 6) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}
