use serde::{Deserialize, Serialize};

/// Timing parameters for the reasoning scheduler. Overridable for scripted
/// test runs (e.g. a debounce of a few milliseconds instead of 1.5s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "d_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "d_reasoning_wait_ceiling_ms")]
    pub reasoning_wait_ceiling_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u32,
    #[serde(default = "d_tts_handle_ttl_secs")]
    pub tts_handle_ttl_secs: u64,
    #[serde(default = "d_event_keepalive_secs")]
    pub event_keepalive_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: d_debounce_ms(),
            reasoning_wait_ceiling_ms: d_reasoning_wait_ceiling_ms(),
            max_delay_ms: d_max_delay_ms(),
            tts_handle_ttl_secs: d_tts_handle_ttl_secs(),
            event_keepalive_secs: d_event_keepalive_secs(),
        }
    }
}

fn d_debounce_ms() -> u64 {
    1_500
}
fn d_reasoning_wait_ceiling_ms() -> u64 {
    10_000
}
fn d_max_delay_ms() -> u32 {
    15_000
}
fn d_tts_handle_ttl_secs() -> u64 {
    300
}
fn d_event_keepalive_secs() -> u64 {
    25
}
