use serde::{Deserialize, Serialize};

/// Handwriting recognition service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrrConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "d_hrr_timeout_secs")]
    pub timeout_secs: u64,
    /// How long an opened HRR session stays reusable before being treated
    /// as expired (the source service advertises ~4m30s).
    #[serde(default = "d_hrr_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for HrrConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: "HRR_API_KEY".into(),
            timeout_secs: d_hrr_timeout_secs(),
            session_ttl_secs: d_hrr_session_ttl_secs(),
        }
    }
}

fn d_hrr_timeout_secs() -> u64 {
    30
}
fn d_hrr_session_ttl_secs() -> u64 {
    270
}

/// Speech-to-text service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "d_stt_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: "STT_API_KEY".into(),
            timeout_secs: d_stt_timeout_secs(),
        }
    }
}

fn d_stt_timeout_secs() -> u64 {
    60
}

/// Reasoning LLM. Separate model ids for coaching decisions vs. voice
/// question answers so each can be tuned (or overridden for benchmarking)
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "d_reasoning_model")]
    pub reasoning_model: String,
    #[serde(default = "d_voice_model")]
    pub voice_model: String,
    #[serde(default = "d_unary_timeout_secs")]
    pub unary_timeout_secs: u64,
    #[serde(default = "d_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// Overrides `reasoning_model` and `voice_model` for benchmarking runs.
    #[serde(default)]
    pub model_override: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: "LLM_API_KEY".into(),
            reasoning_model: d_reasoning_model(),
            voice_model: d_voice_model(),
            unary_timeout_secs: d_unary_timeout_secs(),
            stream_idle_timeout_secs: d_stream_idle_timeout_secs(),
            model_override: None,
        }
    }
}

impl LlmConfig {
    pub fn effective_reasoning_model(&self) -> &str {
        self.model_override.as_deref().unwrap_or(&self.reasoning_model)
    }

    pub fn effective_voice_model(&self) -> &str {
        self.model_override.as_deref().unwrap_or(&self.voice_model)
    }
}

fn d_reasoning_model() -> String {
    "gpt-4o-mini".into()
}
fn d_voice_model() -> String {
    "gpt-4o-mini".into()
}
fn d_unary_timeout_secs() -> u64 {
    60
}
fn d_stream_idle_timeout_secs() -> u64 {
    30
}

/// Neural text-to-speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "d_tts_voice")]
    pub voice: String,
    #[serde(default = "d_tts_speed")]
    pub speed: f32,
    #[serde(default = "d_tts_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: "TTS_API_KEY".into(),
            voice: d_tts_voice(),
            speed: d_tts_speed(),
            timeout_secs: d_tts_timeout_secs(),
        }
    }
}

fn d_tts_voice() -> String {
    "af_heart".into()
}
fn d_tts_speed() -> f32 {
    0.95
}
fn d_tts_timeout_secs() -> u64 {
    30
}
