use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ZapError;

/// Top-level zapmux configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Shared database holding credentials and group snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:zapmux.db`.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Protocol-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Known-good version triple used when the live fetch fails and no
    /// cached value exists. Operator-updatable on purpose: the literal
    /// goes stale as the remote protocol evolves.
    #[serde(default = "default_version_fallback")]
    pub version_fallback: (u32, u32, u32),
    /// How long a fetched version stays fresh.
    #[serde(default = "default_version_ttl_secs")]
    pub version_ttl_secs: u64,
    /// Hard deadline on the version fetch; never blocks session startup
    /// longer than this.
    #[serde(default = "default_version_fetch_timeout_secs")]
    pub version_fetch_timeout_secs: u64,
    /// Deadline on a group sync round-trip.
    #[serde(default = "default_group_sync_timeout_secs")]
    pub group_sync_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            version_fallback: default_version_fallback(),
            version_ttl_secs: default_version_ttl_secs(),
            version_fetch_timeout_secs: default_version_fetch_timeout_secs(),
            group_sync_timeout_secs: default_group_sync_timeout_secs(),
        }
    }
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Minimum delay between reconnect attempts. Never retry faster.
    #[serde(default = "default_reconnect_floor_ms")]
    pub floor_ms: u64,
    /// Delay ceiling once backoff has grown.
    #[serde(default = "default_reconnect_cap_ms")]
    pub cap_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            floor_ms: default_reconnect_floor_ms(),
            cap_ms: default_reconnect_cap_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_database_url() -> String {
    "sqlite:zapmux.db".to_string()
}

fn default_version_fallback() -> (u32, u32, u32) {
    (2, 3000, 1023223821)
}

fn default_version_ttl_secs() -> u64 {
    3600
}

fn default_version_fetch_timeout_secs() -> u64 {
    5
}

fn default_group_sync_timeout_secs() -> u64 {
    30
}

fn default_reconnect_floor_ms() -> u64 {
    2_000
}

fn default_reconnect_cap_ms() -> u64 {
    60_000
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Falls back to defaults if the file does not exist. `DATABASE_URL` and
/// `ZAPMUX_PORT` win over whatever the file says, so containerized
/// deployments need no config file at all.
pub fn load(path: &str) -> Result<Config, ZapError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ZapError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ZapError::Config(format!("failed to parse config: {}", e)))?
    } else {
        tracing::info!("Config file not found at {}, using defaults", path.display());
        Config::default()
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            config.database.url = url;
        }
    }
    if let Ok(port) = std::env::var("ZAPMUX_PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| ZapError::Config(format!("invalid ZAPMUX_PORT: {port}")))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 3002);
        assert_eq!(cfg.reconnect.floor_ms, 2_000);
        assert_eq!(cfg.reconnect.cap_ms, 60_000);
        assert_eq!(cfg.whatsapp.version_fetch_timeout_secs, 5);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            [server]
            port = 4010

            [whatsapp]
            version_fallback = [2, 3000, 99]
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.port, 4010);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.whatsapp.version_fallback, (2, 3000, 99));
        assert_eq!(cfg.whatsapp.version_ttl_secs, 3600);
        assert_eq!(cfg.database.url, "sqlite:zapmux.db");
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.whatsapp.version_fallback, (2, 3000, 1023223821));
    }
}
