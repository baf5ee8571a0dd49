use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::alerts::Alert;
use crate::sensor::{now_timestamp, Reading};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Everything an observer can see about the monitor.  Consumers never mutate
/// this directly; all changes go through [`StateHandle::update`].
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub started_at: Instant,
    pub reading: Option<Reading>,
    pub alerts: Vec<Alert>,
    pub device_on: bool,
    pub automatic_irrigation: bool,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub last_cycle_at: Option<String>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub ts: String,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Irrigation,
    Alert,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub reading: Option<Reading>,
    pub alerts: Vec<Alert>,
    pub device_on: bool,
    pub automatic_irrigation: bool,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub last_cycle_at: Option<String>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Mutation helpers (only reachable through StateHandle::update)
// ---------------------------------------------------------------------------

impl MonitorState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            reading: None,
            alerts: Vec::new(),
            device_on: false,
            automatic_irrigation: false,
            last_error: None,
            cycles: 0,
            last_cycle_at: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record the outcome of a successful cycle.  Clears any previous error.
    pub fn record_cycle(&mut self, reading: Reading, alerts: Vec<Alert>, automatic: bool) {
        let detail = format!(
            "t={} h={} ph={}",
            fmt_metric(reading.temperature, 1),
            fmt_metric(reading.humidity, 1),
            fmt_metric(reading.ph, 2),
        );

        self.last_cycle_at = Some(reading.timestamp.clone());
        self.reading = Some(reading);
        self.alerts = alerts;
        self.automatic_irrigation = automatic;
        self.last_error = None;
        self.cycles += 1;

        self.push_event(EventKind::Reading, detail);
    }

    /// Record an actuator command.
    pub fn record_actuator(&mut self, on: bool, detail: String) {
        self.device_on = on;
        self.push_event(EventKind::Irrigation, detail);
    }

    /// Record an alert routed to the notification sink.
    pub fn record_alert(&mut self, detail: String) {
        self.push_event(EventKind::Alert, detail);
    }

    /// Record a failed cycle; the message stays visible until the next
    /// successful cycle overwrites it.
    pub fn record_error(&mut self, detail: String) {
        self.last_error = Some(detail.clone());
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            reading: self.reading.clone(),
            alerts: self.alerts.clone(),
            device_on: self.device_on,
            automatic_irrigation: self.automatic_irrigation,
            last_error: self.last_error.clone(),
            cycles: self.cycles,
            last_cycle_at: self.last_cycle_at.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: now_timestamp(),
            kind,
            detail,
        });
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_metric(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared handle to the monitor state.  Cloning is cheap; every clone feeds
/// the same watch channel.
#[derive(Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<MonitorState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MonitorState::new());
        Self { tx: Arc::new(tx) }
    }

    /// The single mutation path.  Subscribers are notified after `f` runs.
    pub fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        self.tx.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> MonitorState {
        self.tx.borrow().clone()
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(t: Option<f64>, h: Option<f64>, p: Option<f64>) -> Reading {
        Reading {
            temperature: t,
            humidity: h,
            ph: p,
            timestamp: "2026-01-01 12:00:00".into(),
        }
    }

    #[test]
    fn record_cycle_clears_error_and_counts() {
        let mut st = MonitorState::new();
        st.record_error("device unreachable".into());
        assert_eq!(st.last_error.as_deref(), Some("device unreachable"));

        st.record_cycle(reading(Some(24.3), Some(55.0), None), vec![], true);
        assert!(st.last_error.is_none());
        assert_eq!(st.cycles, 1);
        assert!(st.automatic_irrigation);
        assert_eq!(st.last_cycle_at.as_deref(), Some("2026-01-01 12:00:00"));
        assert_eq!(st.events.back().unwrap().detail, "t=24.3 h=55.0 ph=-");
    }

    #[test]
    fn record_actuator_tracks_device_state() {
        let mut st = MonitorState::new();
        st.record_actuator(true, "on".into());
        assert!(st.device_on);
        st.record_actuator(false, "off".into());
        assert!(!st.device_on);
        assert_eq!(st.events.len(), 2);
        assert_eq!(st.events[0].kind, EventKind::Irrigation);
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = MonitorState::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = MonitorState::new();
        st.record_system("first".into());
        st.record_system("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let handle = StateHandle::new();
        let mut rx = handle.subscribe();

        handle.update(|s| s.record_actuator(true, "on".into()));

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().device_on);
        assert!(handle.snapshot().device_on);
    }
}
