//! Daemon bootstrap configuration.
//!
//! A small `toml`-backed config, following the `dirs`/`toml` loading
//! pattern used elsewhere in the source this project grew out of:
//! defaults baked in, overridden by a config file if one is present at
//! the platform config directory, itself overridable by an explicit
//! path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scheduler_quantum_ms() -> u64 {
    10
}

fn default_epoll_timeout_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log_level: String,
    pub scheduler_quantum_ms: u64,
    pub epoll_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduler_quantum_ms: default_scheduler_quantum_ms(),
            epoll_timeout_ms: default_epoll_timeout_ms(),
        }
    }
}

impl DaemonConfig {
    /// The platform config directory's `streamcored/config.toml`, if one
    /// exists (`dirs::config_dir()` is `None` on platforms without a
    /// notion of one, in which case there is nothing to load).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamcored").join("config.toml"))
    }

    /// Load from `path` if given, else from `default_path()` if that
    /// file exists, else fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        match resolved {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .map_err(|e| anyhow::anyhow!("reading config {}: {e}", p.display()))?;
                let config: DaemonConfig = toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_falls_back_to_defaults() {
        let config = DaemonConfig::load(Some(Path::new("/nonexistent/streamcored.toml")));
        // An explicitly-given path that doesn't exist is a hard error,
        // not a silent fallback -- only the absence of *any* path given
        // falls back.
        assert!(config.is_err());

        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn parses_partial_overrides() {
        let text = "log_level = \"debug\"\n";
        let config: DaemonConfig = toml::from_str(text).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scheduler_quantum_ms, default_scheduler_quantum_ms());
    }
}
