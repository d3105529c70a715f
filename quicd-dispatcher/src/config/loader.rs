//! Configuration loading and parsing.
//!
//! Loads configuration from files, environment variables and command-line
//! arguments, with proper precedence handling.

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use config::Config as ConfigLoader;
use std::path::Path;

use super::ServerConfig;

/// Command-line interface for the server.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, short = 'c', default_value = "quicd.toml")]
    pub config: String,

    /// Host address to bind to (overrides config file)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,

    /// Print default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,
}

/// Load and parse server configuration from the process arguments.
///
/// Precedence, lowest to highest:
/// 1. Default values
/// 2. Configuration file
/// 3. Environment variables (QUICD_ prefix)
/// 4. Command-line arguments
///
/// `--print-default-config` and `--validate` exit the process.
pub fn load_config() -> Result<ServerConfig> {
    let matches = CliArgs::command().get_matches();
    let cli =
        CliArgs::from_arg_matches(&matches).context("Failed to parse command-line arguments")?;

    if cli.print_default_config {
        print_default_config()?;
        std::process::exit(0);
    }

    let config = resolve_config(&cli)?;

    if cli.validate {
        println!("✓ Configuration is valid");
        std::process::exit(0);
    }

    Ok(config)
}

/// Build the effective configuration for `cli` and validate it.
pub fn resolve_config(cli: &CliArgs) -> Result<ServerConfig> {
    let mut config = load_config_file(&cli.config)?;
    apply_env_overrides(&mut config)?;
    apply_cli_overrides(&mut config, cli);

    config.validate().map_err(|errors| {
        anyhow::anyhow!("Configuration validation failed:\n{}", errors.join("\n"))
    })?;

    Ok(config)
}

/// Load configuration from a TOML file, or defaults if it does not exist.
pub(crate) fn load_config_file(path: &str) -> Result<ServerConfig> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        tracing::warn!(
            config_path = %path,
            "Configuration file not found, using defaults"
        );
        return Ok(ServerConfig::default());
    }

    let config_str = std::fs::read_to_string(path_obj)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    toml::from_str(&config_str).with_context(|| format!("Failed to parse TOML config: {}", path))
}

/// Apply environment variable overrides.
///
/// Environment variables are prefixed with `QUICD_` and use `__` as a separator.
///
/// Examples:
/// - `QUICD_GLOBAL__NETWORK__HOST=0.0.0.0`
/// - `QUICD_GLOBAL__LOGGING__LEVEL=debug`
/// - `QUICD_GLOBAL__DISPATCHER__MAX_SESSIONS=50000`
fn apply_env_overrides(config: &mut ServerConfig) -> Result<()> {
    let env_config = ConfigLoader::builder()
        .add_source(config::Environment::with_prefix("QUICD").separator("__"))
        .build()
        .context("Failed to load environment variables")?;

    if let Ok(host) = env_config.get_string("global.network.host") {
        config.global.network.host = host;
    }
    if let Ok(port) = env_config.get_int("global.network.port") {
        config.global.network.port = u16::try_from(port)
            .with_context(|| format!("QUICD_GLOBAL__NETWORK__PORT out of range: {}", port))?;
    }
    if let Ok(level) = env_config.get_string("global.logging.level") {
        if let Ok(parsed_level) = level.parse() {
            config.global.logging.level = parsed_level;
        }
    }
    if let Ok(max) = env_config.get_int("global.dispatcher.max_sessions") {
        config.global.dispatcher.max_sessions = usize::try_from(max).with_context(|| {
            format!("QUICD_GLOBAL__DISPATCHER__MAX_SESSIONS out of range: {}", max)
        })?;
    }
    if let Ok(period) = env_config.get_int("global.dispatcher.time_wait_period_ms") {
        config.global.dispatcher.time_wait_period_ms = u64::try_from(period).with_context(|| {
            format!("QUICD_GLOBAL__DISPATCHER__TIME_WAIT_PERIOD_MS out of range: {}", period)
        })?;
    }

    Ok(())
}

/// Apply command-line argument overrides.
fn apply_cli_overrides(config: &mut ServerConfig, cli: &CliArgs) {
    if let Some(ref host) = cli.host {
        config.global.network.host = host.clone();
    }

    if let Some(port) = cli.port {
        config.global.network.port = port;
    }

    if let Some(ref level_str) = cli.log_level {
        if let Ok(level) = level_str.parse() {
            config.global.logging.level = level;
        } else {
            tracing::warn!(level = %level_str, "Invalid log level specified, ignoring");
        }
    }
}

/// Print the default configuration in TOML format.
fn print_default_config() -> Result<()> {
    let default_config = ServerConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;
    println!("{}", toml_str);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = ServerConfig::default();
        let cli = CliArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(4433),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        apply_cli_overrides(&mut config, &cli);

        assert_eq!(config.global.network.host, "127.0.0.1");
        assert_eq!(config.global.network.port, 4433);
        assert_eq!(config.global.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_cli_log_level_is_ignored() {
        let mut config = ServerConfig::default();
        let cli = CliArgs {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.global.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_default_config_survives_toml_round_trip() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert!(parsed.validate().is_ok());
        assert!(parsed.applications.contains_key("echo"));
    }
}
