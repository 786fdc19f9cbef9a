//! Gateway configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use chatgw_core::{GatewayError, GatewayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub backend: BackendSection,
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_notification_cap")]
    pub notification_cap: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            port: default_port(),
            command_timeout_secs: default_command_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            notification_cap: default_notification_cap(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// `[backend]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_backend_host() -> String {
    "localhost".to_string()
}
fn default_backend_port() -> u16 {
    5000
}
fn default_command_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_notification_cap() -> usize {
    256
}
fn default_max_sessions() -> usize {
    100
}

/// Resolved gateway configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    pub command_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub notification_cap: usize,
    pub max_sessions: usize,
}

impl GatewayConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_backend_host: Option<&str>,
        cli_backend_port: Option<u16>,
        cli_max_sessions: Option<usize>,
    ) -> GatewayResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile {
                    gateway: GatewaySection::default(),
                    backend: BackendSection::default(),
                }
            }
        } else {
            ConfigFile {
                gateway: GatewaySection::default(),
                backend: BackendSection::default(),
            }
        };

        Ok(Self {
            port: cli_port.unwrap_or(file_config.gateway.port),
            backend_host: cli_backend_host
                .map(|s| s.to_string())
                .unwrap_or(file_config.backend.host),
            backend_port: cli_backend_port.unwrap_or(file_config.backend.port),
            command_timeout_secs: file_config.gateway.command_timeout_secs,
            idle_timeout_secs: file_config.gateway.idle_timeout_secs,
            notification_cap: file_config.gateway.notification_cap,
            max_sessions: cli_max_sessions.unwrap_or(file_config.gateway.max_sessions),
        })
    }

    /// `host:port` string for the backend chat server.
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend_host, self.backend_port)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_deployment() {
        let config = GatewayConfig::load(None, None, None, None, None).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.backend_addr(), "localhost:5000");
        assert_eq!(config.command_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[test]
    fn cli_overrides_win() {
        let config =
            GatewayConfig::load(None, Some(8080), Some("chat.internal"), Some(6000), Some(5))
                .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backend_addr(), "chat.internal:6000");
        assert_eq!(config.max_sessions, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [backend]
            port = 7000
            "#,
        )
        .unwrap();
        assert_eq!(file.backend.port, 7000);
        assert_eq!(file.backend.host, "localhost");
        assert_eq!(file.gateway.port, 3000);
        assert_eq!(file.gateway.notification_cap, 256);
    }
}
