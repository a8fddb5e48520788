// src/config/models.rs
use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// How the dispatcher picks a backend for a fresh binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    /// Picks the backend with the most in-flight requests. Liveness is not
    /// consulted.
    #[value(alias = "least-conns")]
    LeastConnections,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::RoundRobin => write!(f, "round-robin"),
            SelectionPolicy::LeastConnections => write!(f, "least-connections"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub servers: Vec<Url>,
    pub policy: SelectionPolicy,
    pub health_check: HealthCheckConfig,
    pub retry: RetryConfig,
    /// Largest request body buffered for replay; bigger ones get 413.
    pub max_body_bytes: usize,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            servers: Vec::new(),
            policy: SelectionPolicy::default(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
            max_body_bytes: 10 * 1024 * 1024,
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            bail!("at least one backend server must be configured");
        }

        for server in &self.servers {
            match server.scheme() {
                "http" | "https" => {}
                other => bail!("backend {} has unsupported scheme '{}'", server, other),
            }
            if server.host_str().map_or(true, str::is_empty) {
                bail!("backend {} has no host", server);
            }
        }

        if self.health_check.interval_secs == 0 {
            bail!("health_check.interval_secs must be greater than zero");
        }
        if self.health_check.timeout_secs == 0 {
            bail!("health_check.timeout_secs must be greater than zero");
        }
        if self.health_check.timeout_secs >= self.health_check.interval_secs {
            bail!(
                "health_check.timeout_secs ({}) must be shorter than interval_secs ({})",
                self.health_check.timeout_secs,
                self.health_check.interval_secs
            );
        }
        if self.retry.forward_timeout_secs == 0 {
            bail!("retry.forward_timeout_secs must be greater than zero");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be greater than zero");
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            bail!("metrics port {} collides with the proxy port", self.metrics.port);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 5,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-binding retry behaviour. A binding gets `max_retries + 1` forward
/// attempts before its backend is marked dead.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub forward_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 50,
            forward_timeout_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}
