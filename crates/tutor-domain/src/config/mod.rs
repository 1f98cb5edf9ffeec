mod adapters;
mod database;
mod server;
mod timing;

pub use adapters::*;
pub use database::*;
pub use server::*;
pub use timing::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub hrr: HrrConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Load a TOML config file if it exists, otherwise start from defaults.
    /// Either way, environment variables named below overlay the result:
    /// secrets and per-deployment URLs never live in the file.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Config::default()
        };
        cfg.overlay_env();
        Ok(cfg)
    }

    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var("HRR_BASE_URL") {
            self.hrr.base_url = url;
        }
        if let Ok(url) = std::env::var("STT_BASE_URL") {
            self.stt.base_url = url;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(url) = std::env::var("TTS_BASE_URL") {
            self.tts.base_url = url;
        }
        if let Ok(model) = std::env::var("TUTOR_MODEL_OVERRIDE") {
            self.llm.model_override = Some(model);
        }
        if let Ok(ms) = std::env::var("TUTOR_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse() {
                self.timing.debounce_ms = ms;
            }
        }
    }

    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks runnable.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.database.url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "database.url".into(),
                message: "no database url; set DATABASE_URL".into(),
            });
        }
        for (name, base_url) in [
            ("hrr", &self.hrr.base_url),
            ("stt", &self.stt.base_url),
            ("llm", &self.llm.base_url),
            ("tts", &self.tts.base_url),
        ] {
            if base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("{name}.base_url"),
                    message: "not configured; this adapter will report Unavailable".into(),
                });
            } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{name}.base_url"),
                    message: format!("must start with http:// or https:// (got \"{base_url}\")"),
                });
            }
        }
        if self.timing.debounce_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "timing.debounce_ms".into(),
                message: "debounce of 0 disables coalescing of rapid strokes".into(),
            });
        }

        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable_but_warn_about_missing_services() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "database.url" && e.severity == ConfigSeverity::Error));
        assert!(errors
            .iter()
            .any(|e| e.field == "hrr.base_url" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut cfg = Config::default();
        cfg.hrr.base_url = "ftp://example.com".into();
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "hrr.base_url" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn model_override_wins_over_reasoning_and_voice_models() {
        let mut cfg = Config::default();
        cfg.llm.model_override = Some("bench-model".into());
        assert_eq!(cfg.llm.effective_reasoning_model(), "bench-model");
        assert_eq!(cfg.llm.effective_voice_model(), "bench-model");
    }

    #[test]
    fn toml_roundtrip_preserves_overrides() {
        let mut cfg = Config::default();
        cfg.server.port = 9090;
        cfg.timing.debounce_ms = 50;
        let raw = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.server.port, 9090);
        assert_eq!(parsed.timing.debounce_ms, 50);
    }
}
