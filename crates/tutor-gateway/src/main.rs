mod api;
mod bootstrap;
mod cli;
mod db;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use tutor_domain::config::CorsConfig;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing();
            let (config, _path) = cli::load_config()?;
            run_server(config).await
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, path) = cli::load_config()?;
            if cli::config::validate(&config, &path) {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Command::Version => {
            println!("tutor-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_server(config: tutor_domain::config::Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = bootstrap::build_app_state(config.clone()).await?;

    let cors = build_cors_layer(&config.server.cors);
    // Bounds total in-flight requests, including open SSE/audio streams, so a
    // runaway client can't pin every adapter connection at once.
    let app = api::router()
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(256))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "tutor-gateway listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Builds a `CorsLayer` honoring three shapes of origin: an exact origin, a
/// `scheme://host:*` wildcard-port pattern (validated to only allow a digit
/// suffix), or the single entry `"*"` meaning fully permissive.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    if cors.allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let mut exact = Vec::new();
    let mut prefixes = Vec::new();
    for origin in &cors.allowed_origins {
        match origin.strip_suffix(":*") {
            Some(prefix) => prefixes.push(format!("{prefix}:")),
            None => {
                if let Ok(value) = origin.parse() {
                    exact.push(value);
                }
            }
        }
    }

    let allow_origin = AllowOrigin::predicate(move |origin, _| {
        let Ok(origin_str) = origin.to_str() else {
            return false;
        };
        if exact.iter().any(|o: &axum::http::HeaderValue| o == origin) {
            return true;
        }
        prefixes.iter().any(|prefix| {
            origin_str
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        })
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
