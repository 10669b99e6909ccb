//! Configuration management for the relay guard.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::abuse::AbusePolicy;
use crate::error::{GuardError, Result};
use crate::throttle::ThrottleConfig;

/// Environment variable holding the listen port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable holding the throttle window in milliseconds.
pub const ENV_WINDOW_MS: &str = "RATE_LIMIT_WINDOW_MS";
/// Environment variable holding the per-window request budget.
pub const ENV_MAX_REQUESTS: &str = "RATE_LIMIT_MAX_REQUESTS";

/// Main configuration for the relay guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Request throttle configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Abuse tracker thresholds
    #[serde(default)]
    pub abuse: AbusePolicy,

    /// Background maintenance
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client identifier from `X-Forwarded-For` instead of the
    /// peer address. The right-most entry is used, i.e. the hop appended by
    /// the nearest proxy; only enable this behind exactly one trusted proxy.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_proxy: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Optional reaping of idle throttle windows and expired abuse records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between reaping passes; unset disables reaping
    #[serde(default)]
    pub reap_interval_secs: Option<u64>,
}

impl GuardConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load configuration with environment lookups going through `env`.
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let mut config: GuardConfig = builder.build()?.try_deserialize()?;

        // Only the port comes from the environment; the configured host stays
        if let Some(port) = env_value::<u16, _>(&env, ENV_PORT) {
            config.server.http_addr.set_port(port);
        }
        if let Some(window_ms) = env_value::<u64, _>(&env, ENV_WINDOW_MS) {
            config.throttle.window_ms = window_ms;
        }
        if let Some(max_requests) = env_value::<u64, _>(&env, ENV_MAX_REQUESTS) {
            config.throttle.max_requests = max_requests;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the components reject.
    pub fn validate(&self) -> Result<()> {
        self.throttle.validate()?;
        self.abuse.validate()?;
        if self.maintenance.reap_interval_secs == Some(0) {
            return Err(GuardError::InvalidConfig(
                "maintenance reap_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read an environment variable as `T`; anything that does not parse as `T`
/// (including out-of-range numbers) counts as unset.
fn env_value<T, F>(env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring invalid environment value");
            None
        }
    }
}
