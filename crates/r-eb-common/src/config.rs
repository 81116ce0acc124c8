//! ---
//! eb_section: "04-configuration-orchestration"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Engine configuration loading and validation."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9797))
}

fn default_threads() -> usize {
    1
}

fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_burst_ratio() -> f64 {
    1.1
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

/// Primary configuration object for the engine and its command line tools.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub defaults: ActivityDefaults,
    /// Upper bound on how long `stop` waits for workers before aborting them.
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub shutdown_grace: Duration,
}

/// Metadata describing where an [`EngineConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedEngineConfig {
    pub config: EngineConfig,
    pub source: Option<PathBuf>,
}

impl EngineConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EB_CONFIG";

    /// Load configuration from disk, respecting the `R_EB_CONFIG` override.
    ///
    /// Unlike a daemon, the engine is useful without any file at all, so when
    /// no candidate exists the defaults are returned.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedEngineConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedEngineConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedEngineConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no engine configuration file found, using defaults");
        Ok(LoadedEngineConfig {
            config: Self::default(),
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<EngineConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate()?;
        if self.shutdown_grace.is_zero() {
            return Err(anyhow!("shutdown_grace must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            defaults: ActivityDefaults::default(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl std::str::FromStr for EngineConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: EngineConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Values applied to activities whose parameters leave them unset.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDefaults {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    /// Burst ratio used when a rate spec names only a rate.
    #[serde(default = "default_burst_ratio")]
    pub burst_ratio: f64,
}

impl Default for ActivityDefaults {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            interval: default_interval(),
            burst_ratio: default_burst_ratio(),
        }
    }
}

impl ActivityDefaults {
    pub fn validate(&self) -> Result<()> {
        if !(self.burst_ratio.is_finite() && self.burst_ratio >= 1.0) {
            return Err(anyhow!(
                "defaults.burst_ratio must be at least 1.0, got {}",
                self.burst_ratio
            ));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("defaults.interval must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Emit the rolling JSON file in addition to stdout.
    #[serde(default)]
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_output: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: EngineConfig = "".parse().unwrap();
        assert_eq!(config.defaults.threads, 1);
        assert_eq!(config.defaults.interval, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn durations_are_milliseconds() {
        let config: EngineConfig = r#"
            shutdown_grace = 250

            [defaults]
            threads = 8
            interval = 2000
            burst_ratio = 1.5

            [metrics]
            enabled = true
            listen = "127.0.0.1:9100"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
        assert_eq!(config.defaults.threads, 8);
        assert_eq!(config.defaults.interval, Duration::from_secs(2));
        assert_eq!(config.metrics.listen.port(), 9100);
    }

    #[test]
    fn burst_ratio_below_one_is_rejected() {
        let err = "[defaults]\nburst_ratio = 0.5\n"
            .parse::<EngineConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("burst_ratio"));
    }
}
