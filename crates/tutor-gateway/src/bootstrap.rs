//! `AppState` construction extracted from `main.rs`, so `serve` and any
//! future CLI command that needs the full runtime share one boot path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use tutor_adapters::{HttpHrrAdapter, HttpSttAdapter, HttpTtsAdapter, OpenAiCompatLlm};
use tutor_domain::config::{Config, ConfigSeverity};
use tutor_pipeline::{EventPublisher, ReasoningScheduler, TranscriptionScheduler, TtsRegistry, VoiceQuestionPipeline};
use tutor_sessions::SessionRegistry;

use crate::db::PgRepository;
use crate::state::AppState;

fn read_api_key(env_var: &str) -> String {
    std::env::var(env_var).unwrap_or_default()
}

/// Validate config, wire every adapter and scheduler, and return a fully
/// built [`AppState`]. Does not bind a listener.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Database ─────────────────────────────────────────────────────
    let repo = Arc::new(
        PgRepository::connect(&config.database.url, config.database.max_connections)
            .await
            .context("connecting to database")?,
    );
    repo.ensure_schema().await.context("ensuring pipeline schema")?;
    tracing::info!("database ready");

    // ── Adapters ─────────────────────────────────────────────────────
    let hrr = Arc::new(
        HttpHrrAdapter::new(&config.hrr, read_api_key(&config.hrr.api_key_env))
            .context("building HRR adapter")?,
    );
    let stt = Arc::new(
        HttpSttAdapter::new(&config.stt, read_api_key(&config.stt.api_key_env))
            .context("building STT adapter")?,
    );
    let llm = Arc::new(
        OpenAiCompatLlm::new(&config.llm, read_api_key(&config.llm.api_key_env))
            .context("building LLM adapter")?,
    );
    let tts_adapter = Arc::new(
        HttpTtsAdapter::new(&config.tts, read_api_key(&config.tts.api_key_env))
            .context("building TTS adapter")?,
    );
    tracing::info!("adapters ready");

    // ── Sessions and schedulers ──────────────────────────────────────
    let sessions = Arc::new(SessionRegistry::new());
    let publisher = Arc::new(EventPublisher::new());
    let tts = Arc::new(TtsRegistry::new(Duration::from_secs(config.timing.tts_handle_ttl_secs)));

    let transcription = Arc::new(TranscriptionScheduler::new(
        repo.clone(),
        hrr.clone(),
        sessions.clone(),
        Duration::from_secs(config.hrr.timeout_secs),
    ));

    let reasoning = Arc::new(ReasoningScheduler::new(
        transcription.clone(),
        repo.clone(),
        repo.clone(),
        llm.clone(),
        tts.clone(),
        publisher.clone(),
        sessions.clone(),
        config.timing.clone(),
        Duration::from_secs(config.llm.unary_timeout_secs),
    ));

    let voice = Arc::new(VoiceQuestionPipeline::new(
        transcription.clone(),
        repo.clone(),
        repo.clone(),
        llm,
        tts.clone(),
        publisher.clone(),
        sessions.clone(),
    ));

    // ── TTS handle sweeper ───────────────────────────────────────────
    {
        let tts = tts.clone();
        tokio::spawn(async move {
            tts.spawn_sweeper(Duration::from_secs(30)).await;
        });
    }

    // ── Admin token (read once, hash for constant-time comparison) ───
    let admin_token_hash = match std::env::var(&config.admin.token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.admin.token_env, "admin bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.admin.token_env,
                "admin bearer-token auth DISABLED — set {} to enable", config.admin.token_env
            );
            None
        }
    };

    Ok(AppState {
        config,
        active_pages: Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new())),
        sessions,
        context_repo: repo.clone(),
        pipeline_repo: repo.clone(),
        db: repo,
        hrr,
        stt,
        tts_adapter,
        publisher,
        tts,
        transcription,
        reasoning,
        voice,
        admin_token_hash,
    })
}
