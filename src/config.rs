/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* This file defines the operator's runtime configuration and how it is loaded.
*
* Precedence (lowest to highest):
* 1. Programmatic defaults.
* 2. An optional YAML file whose path is given by `KEYCLOAK_OPERATOR_CONFIG`.
* 3. Environment variables prefixed with `KEYCLOAK_OPERATOR_`, using `__` to
*    reach nested keys (e.g. `KEYCLOAK_OPERATOR_BACKOFF__MAX_SECS=600`).
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::controllers::backoff::FailureBackoff;
use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "KEYCLOAK_OPERATOR_";
const CONFIG_PATH_ENV: &str = "KEYCLOAK_OPERATOR_CONFIG";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid backoff factor: {0}. Must be at least 1")]
    InvalidBackoffFactor(u32),

    #[error("Invalid backoff configuration: base_ms ({0}) must not exceed max_secs ({1}s)")]
    InvalidBackoffBounds(u64, u64),

    #[error("Invalid metrics address '{0}'")]
    InvalidMetricsAddr(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2,
            max_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorConfig {
    /// Requeue interval after a successful cycle. Zero waits for the next change.
    pub success_requeue_secs: u64,
    pub backoff: BackoffConfig,
    pub metrics_addr: String,
    /// `json` or `pretty`.
    pub log_format: String,
    /// Timeout applied to every Keycloak admin API request.
    pub http_timeout_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            success_requeue_secs: 0,
            backoff: BackoffConfig::default(),
            metrics_addr: "0.0.0.0:9090".to_string(),
            log_format: "json".to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl OperatorConfig {
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(OperatorConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: OperatorConfig = figment
            .extract()
            .context("Failed to extract operator configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff.factor < 1 {
            return Err(ConfigError::InvalidBackoffFactor(self.backoff.factor));
        }
        if self.backoff.base_ms > self.backoff.max_secs.saturating_mul(1000) {
            return Err(ConfigError::InvalidBackoffBounds(
                self.backoff.base_ms,
                self.backoff.max_secs,
            ));
        }
        if self.metrics_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidMetricsAddr(self.metrics_addr.clone()));
        }
        match self.log_format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ConfigError::InvalidLogFormat(other.to_string())),
        }
    }

    pub fn metrics_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics_addr
            .parse()
            .map_err(|_| ConfigError::InvalidMetricsAddr(self.metrics_addr.clone()))
    }

    pub fn failure_backoff(&self) -> FailureBackoff {
        FailureBackoff::new(
            Duration::from_millis(self.backoff.base_ms),
            self.backoff.factor,
            Duration::from_secs(self.backoff.max_secs),
        )
    }

    pub fn success_requeue(&self) -> Option<Duration> {
        (self.success_requeue_secs > 0).then(|| Duration::from_secs(self.success_requeue_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.success_requeue(), None);
        assert_eq!(config.failure_backoff().delay(0), Duration::from_millis(500));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let figment = Figment::new()
            .merge(Serialized::defaults(OperatorConfig::default()))
            .merge(Yaml::string(
                "success_requeue_secs: 120\nbackoff:\n  max_secs: 60\nlog_format: pretty\n",
            ));

        let config = OperatorConfig::from_figment(figment).unwrap();
        assert_eq!(config.success_requeue(), Some(Duration::from_secs(120)));
        assert_eq!(config.backoff.max_secs, 60);
        assert_eq!(config.backoff.factor, 2);
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn rejects_unknown_log_format() {
        let config = OperatorConfig {
            log_format: "xml".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogFormat("xml".to_string()))
        );
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let config = OperatorConfig {
            backoff: BackoffConfig {
                base_ms: 120_000,
                factor: 2,
                max_secs: 60,
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBackoffBounds(120_000, 60))
        );
    }

    #[test]
    fn rejects_unparseable_metrics_addr() {
        let config = OperatorConfig {
            metrics_addr: "metrics:port".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMetricsAddr(_))
        ));
    }
}
