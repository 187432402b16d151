//! Server configuration sourced from `PAPER_TIGER_*` environment variables,
//! with an optional YAML override file (`PAPER_TIGER_CONFIG`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_WEBHOOK_WORKERS: usize = 4;
/// Ephemeral range probed when no port is configured.
pub const PORT_RANGE: std::ops::RangeInclusive<u16> = 59_000..=60_000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Explicit port; `None` means probe the ephemeral range.
    pub port: Option<u16>,
    /// Whether the binary should serve at all (legacy embedding affordance).
    pub start: bool,
    /// Strict mode requires `sk_test_`/`sk_live_` key shapes.
    pub strict_keys: bool,
    /// Periodic billing poller; disable for fully test-driven billing.
    pub billing_poll: bool,
    pub webhook_workers: usize,
    /// Optional Prometheus exposition listener.
    pub metrics_bind: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            start: true,
            strict_keys: false,
            billing_poll: true,
            webhook_workers: DEFAULT_WEBHOOK_WORKERS,
            metrics_bind: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerConfigOverride {
    port: Option<u16>,
    strict_keys: Option<bool>,
    billing_poll: Option<bool>,
    webhook_workers: Option<usize>,
    metrics_bind: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("PAPER_TIGER_PORT") {
            config.port = Some(value.parse().with_context(|| "parse PAPER_TIGER_PORT")?);
        }
        // The canonical variable wins; the legacy alias is consulted only
        // when it is unset.
        config.start = match std::env::var("PAPER_TIGER_START") {
            Ok(value) => parse_bool(&value).with_context(|| "parse PAPER_TIGER_START")?,
            Err(_) => match std::env::var("PAPER_TIGER_AUTO_START") {
                Ok(value) => parse_bool(&value).with_context(|| "parse PAPER_TIGER_AUTO_START")?,
                Err(_) => true,
            },
        };
        if let Ok(value) = std::env::var("PAPER_TIGER_STRICT_KEYS") {
            config.strict_keys =
                parse_bool(&value).with_context(|| "parse PAPER_TIGER_STRICT_KEYS")?;
        }
        if let Ok(value) = std::env::var("PAPER_TIGER_DISABLE_BILLING_POLL") {
            config.billing_poll =
                !parse_bool(&value).with_context(|| "parse PAPER_TIGER_DISABLE_BILLING_POLL")?;
        }
        if let Ok(value) = std::env::var("PAPER_TIGER_METRICS_BIND") {
            config.metrics_bind =
                Some(value.parse().with_context(|| "parse PAPER_TIGER_METRICS_BIND")?);
        }
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("PAPER_TIGER_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read PAPER_TIGER_CONFIG: {path}"))?;
            let override_cfg: ServerConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse server config yaml")?;
            if config.port.is_none() {
                config.port = override_cfg.port;
            }
            if let Some(value) = override_cfg.strict_keys {
                config.strict_keys = value;
            }
            if let Some(value) = override_cfg.billing_poll {
                config.billing_poll = value;
            }
            if let Some(value) = override_cfg.webhook_workers {
                config.webhook_workers = value.max(1);
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
            }
        }
        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected a boolean, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn clear_paper_tiger_env() {
        for (key, _) in env::vars() {
            if key.starts_with("PAPER_TIGER_") {
                env::remove_var(key);
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_paper_tiger_env();
        let config = ServerConfig::from_env().expect("from_env");
        assert_eq!(config.port, None);
        assert!(config.start);
        assert!(!config.strict_keys);
        assert!(config.billing_poll);
        assert_eq!(config.webhook_workers, DEFAULT_WEBHOOK_WORKERS);
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_paper_tiger_env();
        env::set_var("PAPER_TIGER_PORT", "59123");
        env::set_var("PAPER_TIGER_START", "false");
        env::set_var("PAPER_TIGER_STRICT_KEYS", "true");
        env::set_var("PAPER_TIGER_DISABLE_BILLING_POLL", "true");

        let config = ServerConfig::from_env().expect("from_env");
        assert_eq!(config.port, Some(59_123));
        assert!(!config.start);
        assert!(config.strict_keys);
        assert!(!config.billing_poll);
        clear_paper_tiger_env();
    }

    #[serial]
    #[test]
    fn legacy_auto_start_applies_only_when_canonical_unset() {
        clear_paper_tiger_env();
        env::set_var("PAPER_TIGER_AUTO_START", "false");
        let config = ServerConfig::from_env().expect("from_env");
        assert!(!config.start);

        env::set_var("PAPER_TIGER_START", "true");
        let config = ServerConfig::from_env().expect("from_env");
        assert!(config.start, "canonical variable wins");
        clear_paper_tiger_env();
    }

    #[serial]
    #[test]
    fn invalid_port_fails() {
        clear_paper_tiger_env();
        env::set_var("PAPER_TIGER_PORT", "not-a-port");
        assert!(ServerConfig::from_env().is_err());
        clear_paper_tiger_env();
    }

    #[serial]
    #[test]
    fn yaml_override_fills_unset_port_but_env_wins() {
        clear_paper_tiger_env();
        let tmpdir = TempDir::new().expect("tempdir");
        let path = tmpdir.path().join("config.yml");
        std::fs::write(&path, "port: 59555\nstrict_keys: true\nwebhook_workers: 8\n")
            .expect("write");
        env::set_var("PAPER_TIGER_CONFIG", path.to_str().expect("utf8"));

        let config = ServerConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.port, Some(59_555));
        assert!(config.strict_keys);
        assert_eq!(config.webhook_workers, 8);

        env::set_var("PAPER_TIGER_PORT", "59001");
        let config = ServerConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.port, Some(59_001), "env takes precedence over yaml");
        clear_paper_tiger_env();
    }

    #[serial]
    #[test]
    fn missing_yaml_file_fails() {
        clear_paper_tiger_env();
        env::set_var("PAPER_TIGER_CONFIG", "/nonexistent/paper-tiger.yml");
        assert!(ServerConfig::from_env_or_yaml().is_err());
        clear_paper_tiger_env();
    }

    #[serial]
    #[test]
    fn invalid_yaml_fails() {
        clear_paper_tiger_env();
        let tmpdir = TempDir::new().expect("tempdir");
        let path = tmpdir.path().join("bad.yml");
        std::fs::write(&path, "port: [not a port").expect("write");
        env::set_var("PAPER_TIGER_CONFIG", path.to_str().expect("utf8"));
        assert!(ServerConfig::from_env_or_yaml().is_err());
        clear_paper_tiger_env();
    }
}
