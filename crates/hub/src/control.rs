//! Interactive polling loop.
//!
//! One cycle: settings snapshot → device reading → range alerts →
//! irrigation step → observable state → history (complete readings only).
//! Cycles are strictly sequential.  Between cycles the loop sleeps for the
//! configured interval; a settings push cancels the sleep and starts the next
//! cycle at once with the new interval.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::{self, Alert};
use crate::db::{Db, HistoryRecord};
use crate::irrigation::{Decision, Irrigation};
use crate::sensor::{Reading, SensorClient};
use crate::settings::{SettingsStore, Thresholds};
use crate::state::StateHandle;

/// Interval used while no settings have been saved.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct CycleReport {
    pub reading: Reading,
    pub alerts: Vec<Alert>,
    pub decision: Option<Decision>,
    pub persisted: bool,
}

#[derive(Clone)]
pub struct ControlLoop {
    settings: SettingsStore,
    db: Db,
    client: SensorClient,
    irrigation: Irrigation,
    state: StateHandle,
}

enum Wake {
    Elapsed,
    Restart,
    Shutdown,
}

impl ControlLoop {
    pub fn new(
        settings: SettingsStore,
        db: Db,
        client: SensorClient,
        irrigation: Irrigation,
        state: StateHandle,
    ) -> Self {
        Self {
            settings,
            db,
            client,
            irrigation,
            state,
        }
    }

    /// Execute a single cycle.  Errors are left to the caller.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let thresholds = self
            .settings
            .get_latest()
            .await
            .context("failed to load settings")?;

        let reading = self.client.fetch_all().await;

        let (alerts, decision, automatic) = match &thresholds {
            Some(t) => (
                alerts::evaluate(t, &reading),
                self.irrigation
                    .auto_step(reading.humidity, t, "interactive")
                    .await,
                t.automatic_irrigation,
            ),
            None => {
                debug!("control loop: no settings saved, skipping alerts and irrigation");
                (Vec::new(), None, false)
            }
        };

        for a in &alerts {
            warn!(metric = %a.metric, value = a.value, "{}", a.message);
        }

        {
            let reading = reading.clone();
            let alerts = alerts.clone();
            self.state
                .update(move |s| s.record_cycle(reading, alerts, automatic));
        }

        let persisted = match HistoryRecord::from_reading(&reading) {
            Some(rec) => {
                self.db
                    .insert_history(&rec)
                    .await
                    .context("failed to persist history")?;
                true
            }
            None => {
                debug!("control loop: partial reading, history skipped");
                false
            }
        };

        Ok(CycleReport {
            reading,
            alerts,
            decision,
            persisted,
        })
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self) -> TaskHandle {
        TaskHandle::spawn(move |shutdown| self.run(shutdown))
    }

    /// Loop until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut settings_rx = self.settings.subscribe();
        let mut subscribed = true;
        let mut interval = interval_for(settings_rx.borrow_and_update().as_ref());

        info!(
            interval_sec = interval.as_secs(),
            device = self.client.base_url(),
            "control loop started"
        );
        self.state
            .update(|s| s.record_system(format!("control loop started ({}s)", interval.as_secs())));

        loop {
            match self.run_cycle().await {
                Ok(report) => debug!(
                    humidity = ?report.reading.humidity,
                    alerts = report.alerts.len(),
                    command = ?report.decision.map(|d| d.command),
                    persisted = report.persisted,
                    "control loop: cycle complete"
                ),
                Err(e) => {
                    error!("control loop: cycle failed: {e:#}");
                    self.state.update(|s| s.record_error(format!("{e:#}")));
                }
            }

            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);

            let wake = loop {
                tokio::select! {
                    _ = &mut sleep => break Wake::Elapsed,
                    res = settings_rx.changed(), if subscribed => match res {
                        Ok(()) => break Wake::Restart,
                        Err(_) => {
                            warn!(
                                interval_sec = interval.as_secs(),
                                "control loop: settings subscription closed, keeping interval"
                            );
                            subscribed = false;
                        }
                    },
                    _ = &mut shutdown => break Wake::Shutdown,
                }
            };

            match wake {
                Wake::Elapsed => {}
                Wake::Restart => {
                    interval = interval_for(settings_rx.borrow_and_update().as_ref());
                    info!(
                        interval_sec = interval.as_secs(),
                        "control loop: settings changed, restarting"
                    );
                }
                Wake::Shutdown => {
                    info!("control loop stopped");
                    return;
                }
            }
        }
    }
}

fn interval_for(t: Option<&Thresholds>) -> Duration {
    t.map(Thresholds::reading_interval).unwrap_or(DEFAULT_INTERVAL)
}

// ---------------------------------------------------------------------------
// Task handle
// ---------------------------------------------------------------------------

/// A spawned loop that can be stopped between cycles.  Dropping the handle
/// also stops the loop.
pub struct TaskHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(f(rx));
        Self { shutdown: tx, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("task ended abnormally: {e}");
        }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
