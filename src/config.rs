//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Origins allowed by the CORS layer when `AGENT_HUB_ALLOWED_ORIGINS` is unset.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:8000",
    "http://127.0.0.1:8000",
    "http://localhost:8001",
    "http://localhost:8081",
];

/// Server configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port for the HTTP + WebSocket listener.
    pub port: u16,
    /// Root under which per-user scratch directories are created.
    pub files_root: PathBuf,
    /// Origins accepted by the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            files_root: PathBuf::from("./data/files"),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl HubConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::var("AGENT_HUB_PORT") {
            Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "AGENT_HUB_PORT".to_string(),
                message: format!("{raw:?} is not a port number ({e})"),
            })?,
            Err(_) => defaults.port,
        };

        let files_root = std::env::var("AGENT_HUB_FILES_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.files_root);

        let allowed_origins = std::env::var("AGENT_HUB_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or(defaults.allowed_origins);

        Ok(Self {
            port,
            files_root,
            allowed_origins,
        })
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_local_ui_ports() {
        let config = HubConfig::default();
        assert_eq!(config.port, 8081);
        assert_eq!(config.allowed_origins.len(), 4);
        assert!(config
            .allowed_origins
            .iter()
            .any(|o| o == "http://127.0.0.1:8000"));
    }

    #[test]
    fn parse_origins_trims_and_skips_blanks() {
        let origins = parse_origins(" http://a.test , ,http://b.test,");
        assert_eq!(origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn parse_origins_empty() {
        assert!(parse_origins("").is_empty());
    }
}
