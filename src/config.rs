//! Ambient configuration (§10.3): defaults, then an optional
//! `agentmux.toml` under the home directory, then `AGENTMUX_`-prefixed
//! environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AgentMuxError;

/// Backend-wide configuration consumed directly by the Registration Engine
/// and the Continuation Analyzer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentMuxConfig {
    pub home_dir: PathBuf,
    pub default_role_timeout_secs: u64,
    pub delivery_max_retries: u32,
    pub continuation_max_iterations: u32,
    pub api_url_template: String,
    pub backend_port: u16,
}

impl Default for AgentMuxConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            default_role_timeout_secs: 120,
            delivery_max_retries: 3,
            continuation_max_iterations: 25,
            api_url_template: "http://127.0.0.1:{port}".to_string(),
            backend_port: 3000,
        }
    }
}

fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentmux")
}

impl AgentMuxConfig {
    /// Loads defaults, layers `<home>/agentmux.toml` if present (the home
    /// directory itself is resolved from defaults/env before the file
    /// layer, since the file's own location depends on it), then applies
    /// `AGENTMUX_*` environment overrides.
    pub fn load() -> Result<Self, AgentMuxError> {
        let provisional_home = std::env::var("AGENTMUX_HOME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home_dir());
        let config_file = provisional_home.join("agentmux.toml");

        let mut builder = config::Config::builder()
            .set_default("home_dir", provisional_home.display().to_string())
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?
            .set_default("default_role_timeout_secs", 120i64)
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?
            .set_default("delivery_max_retries", 3i64)
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?
            .set_default("continuation_max_iterations", 25i64)
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?
            .set_default("api_url_template", "http://127.0.0.1:{port}")
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?
            .set_default("backend_port", 3000i64)
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?;

        if config_file.is_file() {
            builder = builder.add_source(config::File::from(config_file));
        }

        builder = builder.add_source(config::Environment::with_prefix("AGENTMUX").separator("_"));

        let raw = builder
            .build()
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))?;
        raw.try_deserialize()
            .map_err(|e| AgentMuxError::ConfigMissing(e.to_string()))
    }

    pub fn default_role_timeout(&self) -> Duration {
        Duration::from_secs(self.default_role_timeout_secs)
    }

    pub fn api_url_for_port(&self, port: u16) -> String {
        self.api_url_template.replace("{port}", &port.to_string())
    }

    /// §6: `http://localhost:<backendPort>`, rendered from `backend_port`.
    pub fn api_url(&self) -> String {
        self.api_url_for_port(self.backend_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AgentMuxConfig::default();
        assert_eq!(cfg.default_role_timeout_secs, 120);
        assert_eq!(cfg.delivery_max_retries, 3);
        assert!(cfg.home_dir.ends_with(".agentmux"));
    }

    #[test]
    fn api_url_template_substitutes_port() {
        let cfg = AgentMuxConfig::default();
        assert_eq!(cfg.api_url_for_port(4567), "http://127.0.0.1:4567");
    }

    #[test]
    fn api_url_uses_configured_backend_port() {
        let mut cfg = AgentMuxConfig::default();
        cfg.backend_port = 8080;
        assert_eq!(cfg.api_url(), "http://127.0.0.1:8080");
    }
}
