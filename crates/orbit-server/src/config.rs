use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use orbit_gateway::presence::{DEFAULT_FRIENDS_TTL, DEFAULT_ONLINE_TTL};

/// Server settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    /// In-memory presence when unset.
    pub redis_url: Option<String>,
    pub presence_ttl: Duration,
    pub friend_cache_ttl: Duration,
    /// Promoted to admin at startup if the account exists.
    pub admin_username: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match get("ORBIT_PORT") {
            Some(port) => port.parse().with_context(|| format!("ORBIT_PORT '{}' is not a port", port))?,
            None => 3000,
        };

        Ok(Self {
            host: get("ORBIT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("ORBIT_DB_PATH").unwrap_or_else(|| "orbit.db".into())),
            jwt_secret: get("ORBIT_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            jwt_refresh_secret: get("ORBIT_JWT_REFRESH_SECRET").unwrap_or_else(|| "dev-refresh-secret-change-me".into()),
            redis_url: get("ORBIT_REDIS_URL").filter(|url| !url.is_empty()),
            presence_ttl: secs(&get, "ORBIT_PRESENCE_TTL_SECS", DEFAULT_ONLINE_TTL)?,
            friend_cache_ttl: secs(&get, "ORBIT_FRIEND_CACHE_TTL_SECS", DEFAULT_FRIENDS_TTL)?,
            admin_username: get("ORBIT_ADMIN_USERNAME").filter(|name| !name.is_empty()),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    match get(key) {
        Some(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{} '{}' is not a number of seconds", key, value))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("orbit.db"));
        assert!(config.redis_url.is_none());
        assert_eq!(config.presence_ttl, DEFAULT_ONLINE_TTL);
        assert_eq!(config.friend_cache_ttl, DEFAULT_FRIENDS_TTL);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("ORBIT_PORT", "8080"),
            ("ORBIT_REDIS_URL", "redis://localhost:6379"),
            ("ORBIT_PRESENCE_TTL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.presence_ttl, Duration::from_secs(60));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(config(&[("ORBIT_PORT", "http")]).is_err());
        assert!(config(&[("ORBIT_FRIEND_CACHE_TTL_SECS", "-1")]).is_err());
    }
}
