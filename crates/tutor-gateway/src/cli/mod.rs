pub mod config;

use clap::{Parser, Subcommand};

/// The tutoring gateway server.
#[derive(Debug, Parser)]
#[command(name = "tutor-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from the path named by `TUTOR_CONFIG` (or
/// `config.toml` by default). Secrets and per-deployment URLs still come
/// from environment variables, overlaid by [`Config::load_or_default`].
pub fn load_config() -> anyhow::Result<(tutor_domain::config::Config, String)> {
    let config_path = std::env::var("TUTOR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = tutor_domain::config::Config::load_or_default(std::path::Path::new(&config_path))
        .map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;
    Ok((config, config_path))
}
