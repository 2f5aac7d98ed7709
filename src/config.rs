use serde::Deserialize;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_secs: u64,
    pub openapi_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8100,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_secs: 30,
            openapi_path: "openapi.json".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| defaults.port.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            breaker_failure_threshold: std::env::var("BREAKER_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| defaults.breaker_failure_threshold.to_string())
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("BREAKER_FAILURE_THRESHOLD must be a positive integer"))
                .and_then(|threshold| {
                    if threshold == 0 {
                        anyhow::bail!("BREAKER_FAILURE_THRESHOLD cannot be zero");
                    }
                    Ok(threshold)
                })?,
            breaker_reset_timeout_secs: std::env::var("BREAKER_RESET_TIMEOUT_SECS")
                .unwrap_or_else(|_| defaults.breaker_reset_timeout_secs.to_string())
                .parse::<u64>()
                .map_err(|_| {
                    anyhow::anyhow!("BREAKER_RESET_TIMEOUT_SECS must be a positive integer")
                })
                .and_then(|secs| {
                    if secs == 0 {
                        anyhow::bail!("BREAKER_RESET_TIMEOUT_SECS cannot be zero");
                    }
                    Ok(secs)
                })?,
            openapi_path: std::env::var("OPENAPI_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.openapi_path),
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "Circuit breaker: threshold={}, reset_timeout={}s",
            config.breaker_failure_threshold,
            config.breaker_reset_timeout_secs
        );
        tracing::debug!("OpenAPI document path: {}", config.openapi_path);

        Ok(config)
    }

    /// Breaker settings for the lead processor.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_secs),
        }
    }
}
