use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use murmur_gateway::RouterConfig;

/// Secrets that ship in sample files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub typing_ttl: Duration,
    pub typing_sweep: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = get("MURMUR_HOST", "0.0.0.0");
        let port: u16 = get("MURMUR_PORT", "3000")
            .parse()
            .context("MURMUR_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        let jwt_secret = lookup("MURMUR_JWT_SECRET").context("MURMUR_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("MURMUR_JWT_SECRET is a placeholder; set the secret shared with the auth service");
        }

        let typing_ttl = millis(&get("MURMUR_TYPING_TTL_MS", "3000"), "MURMUR_TYPING_TTL_MS")?;
        let typing_sweep = millis(&get("MURMUR_TYPING_SWEEP_MS", "250"), "MURMUR_TYPING_SWEEP_MS")?;

        Ok(Self {
            addr,
            db_path: PathBuf::from(get("MURMUR_DB_PATH", "murmur.db")),
            jwt_secret,
            typing_ttl,
            typing_sweep,
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            typing_ttl: self.typing_ttl,
            typing_sweep_interval: self.typing_sweep,
        }
    }
}

fn millis(raw: &str, key: &str) -> Result<Duration> {
    let ms: u64 = raw
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds", key))?;
    if ms == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let cfg = config(&[("MURMUR_JWT_SECRET", "a-real-shared-secret")]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("murmur.db"));
        assert_eq!(cfg.typing_ttl, Duration::from_millis(3000));
        assert_eq!(cfg.typing_sweep, Duration::from_millis(250));
    }

    #[test]
    fn missing_or_placeholder_secret_is_fatal() {
        assert!(config(&[]).is_err());
        assert!(config(&[("MURMUR_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(config(&[("MURMUR_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let secret = ("MURMUR_JWT_SECRET", "a-real-shared-secret");
        assert!(config(&[secret, ("MURMUR_PORT", "http")]).is_err());
        assert!(config(&[secret, ("MURMUR_TYPING_TTL_MS", "0")]).is_err());

        let cfg = config(&[secret, ("MURMUR_HOST", "127.0.0.1"), ("MURMUR_PORT", "8080")]).unwrap();
        assert_eq!(cfg.addr.port(), 8080);
    }
}
