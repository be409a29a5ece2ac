//! Settings file loading
//!
//! Settings come from a JSON file whose path is taken from
//! `ANIMATRONIC_CONFIG` (default `animatronics.json`). Every field is
//! optional; durations are written as milliseconds.

use crate::connection::ConnectionConfig;
use crate::service::ServiceConfig;
use animatronic_shared::{defaults, AnimatronicSystem};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the settings file
pub const CONFIG_PATH_ENV: &str = "ANIMATRONIC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "animatronics.json";

/// Which remote transport to drive systems through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Run commands on this host (development)
    #[default]
    Local,
    /// Real SSH sessions (requires the `ssh` feature)
    Ssh,
}

/// Top-level application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub systems: Vec<AnimatronicSystem>,
    pub transport: TransportMode,
    pub connection: ConnectionConfig,
    #[serde(rename = "health_check_interval_ms", with = "millis")]
    pub health_check_interval: Duration,
    pub service: ServiceConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            systems: Vec::new(),
            transport: TransportMode::default(),
            connection: ConnectionConfig::default(),
            health_check_interval: Duration::from_millis(defaults::HEALTH_CHECK_INTERVAL_MS),
            service: ServiceConfig::default(),
        }
    }
}

impl Settings {
    /// Load from the path in `ANIMATRONIC_CONFIG`, or the default file.
    ///
    /// A missing default file yields default settings; a missing file that
    /// was named explicitly is an error.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    warn!(
                        "No {} found and {} not set, starting with no systems",
                        DEFAULT_CONFIG_PATH, CONFIG_PATH_ENV
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load and validate settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::from_json(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        info!(
            "Loaded {} systems from {}",
            settings.systems.len(),
            path.display()
        );
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(content).context("Malformed JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for system in &self.systems {
            if system.id.trim().is_empty() {
                bail!("System `{}` has an empty id", system.name);
            }
            if system.host.trim().is_empty() {
                bail!("System `{}` has an empty host", system.id);
            }
            if !seen.insert(system.id.as_str()) {
                bail!("Duplicate system id `{}`", system.id);
            }
        }
        if self.connection.retry.max_retries == 0 {
            bail!("connection.retry.max_retries must be at least 1");
        }
        Ok(())
    }
}

/// Serde helper storing a `Duration` as whole milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
