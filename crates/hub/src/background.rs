//! One-shot monitoring job plus the periodic host that drives it.
//!
//! [`BackgroundRunner::run_once`] performs a single fetch → alert → irrigation
//! pass and reports [`JobOutcome::Retry`] on failure instead of erroring.
//! [`schedule`] plays the role of the host job scheduler: a fixed period
//! after success, exponential backoff after a retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::alerts;
use crate::irrigation::Irrigation;
use crate::sensor::SensorClient;
use crate::settings::SettingsStore;
use crate::state::StateHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Retry,
}

/// Destination for alert notifications raised outside the interactive loop.
pub trait AlertSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Logs each alert and records it in the monitor event feed.
pub struct LogSink {
    state: StateHandle,
}

impl LogSink {
    pub fn new(state: StateHandle) -> Self {
        Self { state }
    }
}

impl AlertSink for LogSink {
    fn notify(&self, message: &str) {
        warn!(alert = %message, "greenhouse alert");
        let message = message.to_string();
        self.state.update(|s| s.record_alert(message));
    }
}

pub struct BackgroundRunner {
    settings: SettingsStore,
    client: SensorClient,
    irrigation: Irrigation,
    sink: Arc<dyn AlertSink>,
}

impl BackgroundRunner {
    pub fn new(
        settings: SettingsStore,
        client: SensorClient,
        irrigation: Irrigation,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            settings,
            client,
            irrigation,
            sink,
        }
    }

    pub async fn run_once(&self) -> JobOutcome {
        match self.try_run().await {
            Ok(()) => JobOutcome::Success,
            Err(e) => {
                error!("background job failed, asking for retry: {e:#}");
                JobOutcome::Retry
            }
        }
    }

    async fn try_run(&self) -> Result<()> {
        let Some(t) = self
            .settings
            .get_latest()
            .await
            .context("failed to load settings")?
        else {
            info!("background job: no settings saved yet, nothing to compare");
            return Ok(());
        };

        let reading = self.client.fetch_all().await;

        let alerts = alerts::evaluate(&t, &reading);
        if alerts.is_empty() {
            debug!("background job: all metrics within range");
        }
        for a in &alerts {
            self.sink.notify(&a.message);
        }

        self.irrigation
            .auto_step(reading.humidity, &t, "background")
            .await;

        Ok(())
    }
}

/// Run `runner` every `every` until `shutdown` fires.  After a retry the
/// next attempt comes after `backoff`, doubling per consecutive retry and
/// capped at `every`.
pub async fn schedule(
    runner: BackgroundRunner,
    every: Duration,
    backoff: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(
        every_sec = every.as_secs(),
        backoff_sec = backoff.as_secs(),
        "background scheduler started"
    );

    let mut retries: u32 = 0;
    loop {
        let delay = match runner.run_once().await {
            JobOutcome::Success => {
                retries = 0;
                every
            }
            JobOutcome::Retry => {
                retries += 1;
                retry_delay(backoff, retries, every)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown => {
                info!("background scheduler stopped");
                return;
            }
        }
    }
}

fn retry_delay(backoff: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    backoff.saturating_mul(factor).min(cap)
}

// ===========================================================================
// Tests
// ===========================================================================
