//! Configuration loading

use anyhow::Result;
use tracing::info;

use crate::Config;

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. `explicit` (command line)
/// 2. `WALLVIEW_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to environment variables only
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let exists = |p: &String| std::path::Path::new(p).exists();
    let config_path = explicit
        .map(str::to_string)
        .filter(exists)
        .or_else(|| std::env::var("WALLVIEW_CONFIG_PATH").ok().filter(exists))
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!(
        displays = config.engine.display_count,
        devices = config.devices.len(),
        "Configuration loaded and validated successfully"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_file_wins() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "engine:\n  display_count: 3\n").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.engine.display_count, 3);
    }

    #[test]
    fn test_invalid_file_fails_fast() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "engine:\n  display_count: 9\n").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("display_count"));
    }
}
