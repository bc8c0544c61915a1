//! ---
//! opcsim_section: "01-core-functionality"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Shared primitives and utilities for the simulation runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_catalog_path() -> PathBuf {
    PathBuf::from("configs/catalog.json")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_random_seed() -> u64 {
    0xA11CEu64
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_idle_tick() -> Duration {
    Duration::from_secs(1)
}

/// Primary configuration object for the OPC-Sim daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Location of the operator-editable server/node catalog.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "OPCSIM_CONFIG";

    /// Load configuration from disk, respecting the `OPCSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.catalog_path.as_os_str().is_empty() {
            return Err(anyhow!("catalog_path must not be empty"));
        }
        self.simulation.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            logging: LoggingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Logging sink configuration for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// File prefix for the rolling log; defaults to the service name.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Tunables for the waveform update loops.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed for the per-server random engines, kept deterministic so a
    /// restarted daemon replays the same random walk.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// Grace period a restart waits between releasing and rebinding the
    /// endpoint; also the quiet window between binding and the update
    /// loop's first tick.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_settle_delay", rename = "settle_delay_ms")]
    pub settle_delay: Duration,
    /// Tick period used when no node carries an active variation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_idle_tick", rename = "idle_tick_ms")]
    pub idle_tick: Duration,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle_tick.is_zero() {
            return Err(anyhow!("simulation.idle_tick_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            random_seed: default_random_seed(),
            settle_delay: default_settle_delay(),
            idle_tick: default_idle_tick(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_an_empty_document() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.catalog_path, PathBuf::from("configs/catalog.json"));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert_eq!(config.simulation.random_seed, 0xA11CE);
        assert_eq!(config.simulation.settle_delay, Duration::from_millis(250));
        assert_eq!(config.simulation.idle_tick, Duration::from_secs(1));
    }

    #[test]
    fn durations_parse_from_milliseconds() {
        let config: AppConfig = toml::from_str(
            r#"
            catalog_path = "data/catalog.json"

            [simulation]
            settle_delay_ms = 50
            idle_tick_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(config.simulation.settle_delay, Duration::from_millis(50));
        assert_eq!(config.simulation.idle_tick, Duration::from_secs(2));
    }

    #[test]
    fn zero_idle_tick_is_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [simulation]
            idle_tick_ms = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_prefers_the_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        std::fs::write(&path, "catalog_path = \"override/catalog.json\"").unwrap();

        std::env::set_var(AppConfig::ENV_CONFIG_PATH, &path);
        let loaded = AppConfig::load_with_source(&["missing.toml"]).unwrap();
        std::env::remove_var(AppConfig::ENV_CONFIG_PATH);

        assert_eq!(loaded.source, path);
        assert_eq!(
            loaded.config.catalog_path,
            PathBuf::from("override/catalog.json")
        );
    }
}
