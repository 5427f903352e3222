//! Configuration loading from `~/.classrpc/config.toml` with defaults.

use classrpc_types::config::BridgeConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load bridge configuration from a TOML file, with defaults.
///
/// Any read or parse failure is logged and the defaults are used instead.
pub fn load_config(path: Option<&Path>) -> BridgeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return BridgeConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<BridgeConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                BridgeConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            BridgeConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    classrpc_home().join("config.toml")
}

/// Get the default classrpc home directory.
pub fn classrpc_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".classrpc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "sync_suffix = \"Now\"").unwrap();
        writeln!(f, "sync_call_timeout_ms = 1500").unwrap();
        writeln!(f, "listen_addr = \"0.0.0.0:9000\"").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.sync_suffix, "Now");
        assert_eq!(config.private_prefix, "_");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.sync_call_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_message_size = \"lots\"").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_default_path_under_home() {
        let path = default_config_path();
        assert!(path.ends_with(".classrpc/config.toml"));
    }
}
