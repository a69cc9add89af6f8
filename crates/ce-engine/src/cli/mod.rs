pub mod config;

use clap::{Parser, Subcommand};

/// clinical-extractor — the extraction engine (§1, §4.13/§4.14).
#[derive(Debug, Parser)]
#[command(name = "clinical-extractor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the engine's HTTP surface (default when no subcommand is given).
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

/// Load configuration from the path named by `CE_CONFIG` (`config.toml` by
/// default), falling back to defaults when the file is absent — shared by
/// `serve` and `config` subcommands the way the donor's `load_config`
/// serves `serve`/`doctor`/`config`.
pub fn load_config() -> anyhow::Result<(ce_domain::config::EngineConfig, String)> {
    let config_path = std::env::var("CE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        ce_domain::config::EngineConfig::default()
    };

    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        std::env::set_var("CE_CONFIG", "/nonexistent/path/to/config.toml");
        let (config, path) = load_config().unwrap();
        assert_eq!(path, "/nonexistent/path/to/config.toml");
        assert_eq!(config.server.port, ce_domain::config::EngineConfig::default().server.port);
        std::env::remove_var("CE_CONFIG");
    }
}
