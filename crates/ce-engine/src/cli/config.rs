use ce_domain::config::{ConfigSeverity, EngineConfig};

/// Parse and validate the config, printing any issues (§4.13).
///
/// Returns `true` when valid (0 errors); the caller exits non-zero
/// otherwise.
pub fn validate(config: &EngineConfig, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &EngineConfig) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&EngineConfig::default(), "config.toml"));
    }

    #[test]
    fn empty_state_dir_fails_validation() {
        let mut config = EngineConfig::default();
        config.storage.state_dir = String::new();
        assert!(!validate(&config, "config.toml"));
    }
}
