//! Reasoning decision parsing, normalization, and the schema sent to the
//! LLM adapter's structured-output path.

use serde::Deserialize;
use serde_json::json;
use tutor_domain::error::{Error, Result};

use crate::prompts::VERDICT_PASS_MARKER;

#[derive(Debug, Clone, Deserialize)]
pub struct RawDecision {
    pub internal_reasoning: String,
    pub action: String,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub delay_ms: u32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Silent,
    Speak,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub internal_reasoning: String,
    pub action: Action,
    pub level: Option<u8>,
    pub error_type: Option<String>,
    pub delay_ms: u32,
    pub message: String,
}

impl Decision {
    pub fn is_error_flag(&self) -> bool {
        self.action == Action::Speak && self.error_type.is_some()
    }
}

/// Parse, normalize legacy `delayed_speak`, and apply the verdict safeguard.
pub fn parse_decision(json_text: &str) -> Result<Decision> {
    let raw: RawDecision = serde_json::from_str(json_text)
        .map_err(|e| Error::BadRequest(format!("malformed reasoning decision: {e}")))?;

    let (mut action, mut delay_ms) = match raw.action.as_str() {
        "silent" => (Action::Silent, raw.delay_ms),
        "speak" => (Action::Speak, raw.delay_ms),
        "delayed_speak" => (Action::Speak, raw.delay_ms.max(10_000)),
        other => {
            return Err(Error::BadRequest(format!("unknown reasoning action: {other}")));
        }
    };

    // Trigger-2 reinforcement gate: a model that says "silent" but whose own
    // reasoning concludes PASS, with a non-empty message, is forced to speak.
    if action == Action::Silent
        && raw.internal_reasoning.contains(VERDICT_PASS_MARKER)
        && !raw.message.trim().is_empty()
    {
        action = Action::Speak;
        delay_ms = 0;
    }

    Ok(Decision {
        internal_reasoning: raw.internal_reasoning,
        action,
        level: raw.level,
        error_type: raw.error_type,
        delay_ms,
        message: raw.message,
    })
}

/// The fixed response schema for reasoning calls, built with
/// `additionalProperties: false` and every property required recursively,
/// per this codebase's strict-schema convention for structured LLM output.
pub fn reasoning_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["internal_reasoning", "action", "level", "error_type", "delay_ms", "message"],
        "properties": {
            "internal_reasoning": { "type": "string" },
            "action": { "type": "string", "enum": ["silent", "speak"] },
            "level": { "type": ["integer", "null"], "enum": [1, 2, 3, 4, null] },
            "error_type": {
                "type": ["string", "null"],
                "enum": ["procedural", "conceptual", "strategic", null]
            },
            "delay_ms": { "type": "integer", "minimum": 0, "maximum": 15000 },
            "message": { "type": "string" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_silent_decision() {
        let d = parse_decision(
            r#"{"internal_reasoning":"looks fine. VERDICT: CONTINUE","action":"silent","level":null,"error_type":null,"delay_ms":0,"message":""}"#,
        )
        .unwrap();
        assert_eq!(d.action, Action::Silent);
    }

    #[test]
    fn legacy_delayed_speak_maps_to_speak_with_floor() {
        let d = parse_decision(
            r#"{"internal_reasoning":"x","action":"delayed_speak","level":2,"error_type":"procedural","delay_ms":500,"message":"check your sign"}"#,
        )
        .unwrap();
        assert_eq!(d.action, Action::Speak);
        assert_eq!(d.delay_ms, 10_000);
    }

    #[test]
    fn legacy_delayed_speak_keeps_larger_requested_delay() {
        let d = parse_decision(
            r#"{"internal_reasoning":"x","action":"delayed_speak","level":2,"error_type":null,"delay_ms":12000,"message":"m"}"#,
        )
        .unwrap();
        assert_eq!(d.delay_ms, 12_000);
    }

    #[test]
    fn verdict_pass_safeguard_forces_speak() {
        let d = parse_decision(
            r#"{"internal_reasoning":"Fully correct. VERDICT: PASS","action":"silent","level":null,"error_type":null,"delay_ms":0,"message":"Nice work!"}"#,
        )
        .unwrap();
        assert_eq!(d.action, Action::Speak);
        assert_eq!(d.delay_ms, 0);
    }

    #[test]
    fn verdict_pass_with_empty_message_stays_silent() {
        let d = parse_decision(
            r#"{"internal_reasoning":"Fully correct. VERDICT: PASS","action":"silent","level":null,"error_type":null,"delay_ms":0,"message":""}"#,
        )
        .unwrap();
        assert_eq!(d.action, Action::Silent);
    }

    #[test]
    fn unknown_action_is_a_bad_request() {
        let err = parse_decision(
            r#"{"internal_reasoning":"x","action":"shout","level":null,"error_type":null,"delay_ms":0,"message":""}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn is_error_flag_requires_speak_and_error_type() {
        let speak_with_error = Decision {
            internal_reasoning: "x".into(),
            action: Action::Speak,
            level: Some(2),
            error_type: Some("procedural".into()),
            delay_ms: 0,
            message: "m".into(),
        };
        assert!(speak_with_error.is_error_flag());

        let silent = Decision {
            error_type: Some("procedural".into()),
            action: Action::Silent,
            ..speak_with_error.clone()
        };
        assert!(!silent.is_error_flag());
    }

    #[test]
    fn schema_forbids_additional_properties() {
        let schema = reasoning_schema();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"].as_array().unwrap().len(), 6);
    }
}
