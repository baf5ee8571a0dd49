//! TOML config file loading, validation, and seeding of the settings store.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::sensor::DEFAULT_TIMEOUT;
use crate::settings::{SettingsStore, Thresholds};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Written to the settings store only when nothing is saved yet.
    pub thresholds: Option<Thresholds>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub base_url: String,
    pub timeout_sec: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.10".to_string(),
            timeout_sec: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub background_enabled: bool,
    pub background_every_min: u64,
    pub retry_backoff_sec: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            background_enabled: true,
            background_every_min: 15,
            retry_backoff_sec: 30,
        }
    }
}

impl MonitorConfig {
    pub fn background_every(&self) -> Duration {
        Duration::from_secs(self.background_every_min.saturating_mul(60))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_sec)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_monitor(&mut errors);

        if let Some(t) = &self.thresholds {
            if let Err(e) = t.validate() {
                errors.extend(e.0.into_iter().map(|m| format!("thresholds: {m}")));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let url = self.device.base_url.trim();
        if url.is_empty() {
            errors.push("device: base_url is empty".to_string());
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "device: base_url '{url}' must start with http:// or https://"
            ));
        }

        if self.device.timeout_sec == 0 {
            errors.push("device: timeout_sec must be positive".to_string());
        }
    }

    fn validate_monitor(&self, errors: &mut Vec<String>) {
        if self.monitor.background_every_min == 0 {
            errors.push("monitor: background_every_min must be positive".to_string());
        }
        if self.monitor.retry_backoff_sec == 0 {
            errors.push("monitor: retry_backoff_sec must be positive".to_string());
        }
    }

    /// Apply deployment overrides (currently only the device URL).
    pub fn apply_overrides(&mut self, device_url: Option<String>) {
        if let Some(url) = device_url.filter(|u| !u.trim().is_empty()) {
            self.device.base_url = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Load + seed
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.  A missing file yields the
/// defaults.  `DEVICE_URL` overrides `device.base_url`.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::info!(path, "config file not found, using defaults");
        Config::default()
    };

    config.apply_overrides(std::env::var("DEVICE_URL").ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Save the configured thresholds if the store is still empty.  Returns
/// whether anything was written.
pub async fn seed(config: &Config, settings: &SettingsStore) -> Result<bool> {
    let Some(t) = &config.thresholds else {
        return Ok(false);
    };

    if settings.get_latest().await?.is_some() {
        tracing::debug!("settings already present, seed skipped");
        return Ok(false);
    }

    settings
        .save(t)
        .await
        .context("failed to seed thresholds")?;
    tracing::info!("thresholds seeded from config");
    Ok(true)
}

// ===========================================================================
// Tests
// ===========================================================================
