//! Threshold configuration and the settings store.
//!
//! The store is the single writer of the `settings` row.  Every successful
//! [`SettingsStore::save`] is pushed to subscribers, which is how the control
//! loop learns about interval and mode changes without polling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::db::Db;

/// The loop never polls faster than this, whatever the settings say.
pub const MIN_READING_INTERVAL_SEC: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub temp_min: f64,
    pub temp_max: f64,
    pub wet_min: f64,
    pub wet_max: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    pub reading_interval_sec: i64,
    pub automatic_irrigation: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_min: 18.0,
            temp_max: 30.0,
            wet_min: 40.0,
            wet_max: 80.0,
            ph_min: 6.0,
            ph_max: 8.0,
            reading_interval_sec: 60,
            automatic_irrigation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid thresholds: {}", .0.join("; "))]
pub struct ThresholdError(pub Vec<String>);

impl Thresholds {
    /// Polling period, floored at [`MIN_READING_INTERVAL_SEC`].
    pub fn reading_interval(&self) -> Duration {
        Duration::from_secs(self.reading_interval_sec.max(MIN_READING_INTERVAL_SEC) as u64)
    }

    /// Reports every violation, not just the first one.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let mut errors = Vec::new();

        for (name, min, max) in [
            ("temperature", self.temp_min, self.temp_max),
            ("humidity", self.wet_min, self.wet_max),
            ("ph", self.ph_min, self.ph_max),
        ] {
            if !min.is_finite() || !max.is_finite() {
                errors.push(format!("{name}: bounds must be finite numbers"));
            } else if min >= max {
                errors.push(format!(
                    "{name}: min ({min}) must be less than max ({max})"
                ));
            }
        }

        if self.reading_interval_sec < MIN_READING_INTERVAL_SEC {
            errors.push(format!(
                "reading_interval_sec must be at least {MIN_READING_INTERVAL_SEC}, got {}",
                self.reading_interval_sec
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ThresholdError(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SettingsStore {
    db: Db,
    tx: Arc<watch::Sender<Option<Thresholds>>>,
}

impl SettingsStore {
    /// Seeds the subscription channel with whatever is persisted.
    pub async fn open(db: Db) -> Result<Self> {
        let current = db.load_settings().await?;
        let (tx, _rx) = watch::channel(current);
        Ok(Self {
            db,
            tx: Arc::new(tx),
        })
    }

    /// Pull the persisted settings.  `None` until something was saved.
    pub async fn get_latest(&self) -> Result<Option<Thresholds>> {
        self.db.load_settings().await
    }

    /// Push stream of settings; the receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<Thresholds>> {
        self.tx.subscribe()
    }

    /// Validate, persist, then notify subscribers.  Invalid input surfaces as
    /// a [`ThresholdError`] inside the returned `anyhow::Error`.
    pub async fn save(&self, t: &Thresholds) -> Result<()> {
        t.validate()?;
        self.db.upsert_settings(t).await?;

        info!(
            interval_sec = t.reading_interval_sec,
            automatic = t.automatic_irrigation,
            wet_min = t.wet_min,
            wet_max = t.wet_max,
            "settings saved"
        );

        self.tx.send_replace(Some(t.clone()));
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.db.clear_settings().await?;
        self.tx.send_replace(None);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_settings;

    fn assert_invalid(t: &Thresholds, needle: &str) {
        let err = t.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(needle), "expected {needle:?} in: {msg}");
    }

    #[test]
    fn defaults_match_factory_values() {
        let t = Thresholds::default();
        assert_eq!((t.temp_min, t.temp_max), (18.0, 30.0));
        assert_eq!((t.wet_min, t.wet_max), (40.0, 80.0));
        assert_eq!((t.ph_min, t.ph_max), (6.0, 8.0));
        assert_eq!(t.reading_interval_sec, 60);
        assert!(!t.automatic_irrigation);
        t.validate().unwrap();
    }

    #[test]
    fn interval_is_floored_at_five_seconds() {
        let mut t = Thresholds::default();
        t.reading_interval_sec = 1;
        assert_eq!(t.reading_interval(), Duration::from_secs(5));
        t.reading_interval_sec = -30;
        assert_eq!(t.reading_interval(), Duration::from_secs(5));
        t.reading_interval_sec = 90;
        assert_eq!(t.reading_interval(), Duration::from_secs(90));
    }

    #[test]
    fn inverted_humidity_band_rejected() {
        let t = Thresholds {
            wet_min: 80.0,
            wet_max: 40.0,
            ..Thresholds::default()
        };
        assert_invalid(&t, "humidity: min (80) must be less than max (40)");
    }

    #[test]
    fn equal_bounds_rejected() {
        let t = Thresholds {
            ph_min: 7.0,
            ph_max: 7.0,
            ..Thresholds::default()
        };
        assert_invalid(&t, "ph: min");
    }

    #[test]
    fn non_finite_bounds_rejected() {
        let t = Thresholds {
            temp_max: f64::NAN,
            ..Thresholds::default()
        };
        assert_invalid(&t, "temperature: bounds must be finite");
    }

    #[test]
    fn short_interval_rejected() {
        let t = Thresholds {
            reading_interval_sec: 4,
            ..Thresholds::default()
        };
        assert_invalid(&t, "reading_interval_sec must be at least 5");
    }

    #[test]
    fn every_violation_is_reported() {
        let t = Thresholds {
            temp_min: 40.0,
            wet_min: 90.0,
            reading_interval_sec: 0,
            ..Thresholds::default()
        };
        let err = t.validate().unwrap_err();
        assert_eq!(err.0.len(), 3, "got: {err}");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let t: Thresholds = toml::from_str("wet_min = 35.0\nautomatic_irrigation = true").unwrap();
        assert_eq!(t.wet_min, 35.0);
        assert_eq!(t.wet_max, 80.0);
        assert!(t.automatic_irrigation);
    }

    #[tokio::test]
    async fn save_persists_and_notifies() {
        let (_db, store) = memory_settings().await;
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_none());

        let t = Thresholds {
            reading_interval_sec: 10,
            ..Thresholds::default()
        };
        store.save(&t).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&t));
        assert_eq!(store.get_latest().await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn invalid_save_is_not_persisted() {
        let (_db, store) = memory_settings().await;
        let rx = store.subscribe();

        let bad = Thresholds {
            wet_min: 90.0,
            ..Thresholds::default()
        };
        let err = store.save(&bad).await.unwrap_err();
        assert!(err.downcast_ref::<ThresholdError>().is_some());

        assert!(store.get_latest().await.unwrap().is_none());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn open_picks_up_persisted_settings() {
        let (db, store) = memory_settings().await;
        store.save(&Thresholds::default()).await.unwrap();

        let reopened = SettingsStore::open(db).await.unwrap();
        assert_eq!(*reopened.subscribe().borrow(), Some(Thresholds::default()));
    }

    #[tokio::test]
    async fn clear_publishes_none() {
        let (_db, store) = memory_settings().await;
        store.save(&Thresholds::default()).await.unwrap();
        let mut rx = store.subscribe();

        store.clear().await.unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert!(store.get_latest().await.unwrap().is_none());
    }
}
