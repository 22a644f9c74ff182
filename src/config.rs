use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub routes: Vec<RouteConfig>,
    pub default_backend: DefaultBackendConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// A single dispatch rule. Routes are matched in the order they appear
/// in the configuration file; the first matching prefix wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub name: String,
    pub prefix: String,
    #[serde(default = "default_backend_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub strip_prefix: bool,
}

/// Backend used when no route prefix matches the request path.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultBackendConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    pub port: u16,
}

/// Outbound connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "duration_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde", default = "default_pool_idle_timeout")]
    pub pool_idle_timeout: Duration,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_pool_max_idle_per_host() -> usize {
    20
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be zero");
        }

        if self.default_backend.port == 0 {
            anyhow::bail!("Default backend port cannot be zero");
        }

        let mut names = HashSet::new();
        for route in &self.routes {
            if route.name.is_empty() {
                anyhow::bail!("Route name cannot be empty");
            }
            if !names.insert(route.name.as_str()) {
                anyhow::bail!("Duplicate route name: {}", route.name);
            }
            if !route.prefix.starts_with('/') {
                anyhow::bail!(
                    "Route '{}' prefix must start with '/': {}",
                    route.name,
                    route.prefix
                );
            }
            if route.port == 0 {
                anyhow::bail!("Route '{}' port cannot be zero", route.name);
            }
        }

        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", millis / 1000))
        } else {
            serializer.serialize_str(&format!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(
        s: &str,
    ) -> std::result::Result<Duration, Box<dyn std::error::Error + Send + Sync>> {
        if s.ends_with("ms") {
            let num: u64 = s.trim_end_matches("ms").parse()?;
            Ok(Duration::from_millis(num))
        } else if s.ends_with('s') {
            let num: u64 = s.trim_end_matches('s').parse()?;
            Ok(Duration::from_secs(num))
        } else if s.ends_with('m') {
            let num: u64 = s.trim_end_matches('m').parse()?;
            Ok(Duration::from_secs(num * 60))
        } else if s.ends_with('h') {
            let num: u64 = s.trim_end_matches('h').parse()?;
            Ok(Duration::from_secs(num * 3600))
        } else {
            let num: u64 = s.parse()?;
            Ok(Duration::from_secs(num))
        }
    }
}
