#[cfg(feature = "sim")]
mod sim;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::env;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
    Ph,
}

/// How readings are rendered on the wire.
#[derive(Debug, Clone, Copy, Default)]
struct WireOptions {
    /// Send values as JSON strings instead of numbers.
    string_values: bool,
    /// Answer `/ph` with an empty data object.
    drop_ph: bool,
}

impl WireOptions {
    fn from_env() -> Self {
        Self {
            string_values: env_flag("SIM_STRING_VALUES"),
            drop_ph: env_flag("SIM_DROP_PH"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

struct Device {
    #[cfg(feature = "sim")]
    sim: sim::GreenhouseSim,
    #[cfg(not(feature = "sim"))]
    irrigating: bool,
}

impl Device {
    #[cfg(feature = "sim")]
    fn new() -> Self {
        let scenario = sim::Scenario::from_str_lossy(
            &env::var("SIM_SCENARIO").unwrap_or_else(|_| "stable".to_string()),
        );
        let period: f64 = env::var("SIM_DIURNAL_PERIOD_S")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600.0);
        info!(%scenario, diurnal_period_s = period, "simulator initialised");
        Self {
            sim: sim::GreenhouseSim::new(scenario, period),
        }
    }

    #[cfg(feature = "sim")]
    fn sample(&mut self, metric: Metric) -> f64 {
        self.sim.sample(metric)
    }

    #[cfg(feature = "sim")]
    fn set_irrigating(&mut self, on: bool) {
        self.sim.set_irrigating(on);
    }

    // Without the simulator every metric sits at a fixed mid-range value.
    #[cfg(not(feature = "sim"))]
    fn new() -> Self {
        Self { irrigating: false }
    }

    #[cfg(not(feature = "sim"))]
    fn sample(&mut self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => 24.0,
            Metric::Humidity if self.irrigating => 70.0,
            Metric::Humidity => 55.0,
            Metric::Ph => 6.8,
        }
    }

    #[cfg(not(feature = "sim"))]
    fn set_irrigating(&mut self, on: bool) {
        self.irrigating = on;
    }
}

#[derive(Clone)]
struct AppState {
    device: Arc<Mutex<Device>>,
    wire: WireOptions,
}

impl AppState {
    fn new(wire: WireOptions) -> Self {
        Self {
            device: Arc::new(Mutex::new(Device::new())),
            wire,
        }
    }

    fn sample(&self, metric: Metric) -> f64 {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        device.sample(metric)
    }

    fn set_irrigating(&self, on: bool) {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        device.set_irrigating(on);
    }
}

// ---------------------------------------------------------------------------
// Wire bodies
// ---------------------------------------------------------------------------

fn reading_body(value: f64, wire: WireOptions) -> Value {
    if wire.string_values {
        json!({ "data": { "value": value.to_string() } })
    } else {
        json!({ "data": { "value": value } })
    }
}

fn command_body(on: bool) -> Value {
    json!({ "ok": true, "irrigation": if on { "on" } else { "off" } })
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/temperature",
            get(|State(s): State<AppState>| reading(s, Metric::Temperature)),
        )
        .route(
            "/humidity",
            get(|State(s): State<AppState>| reading(s, Metric::Humidity)),
        )
        .route("/ph", get(|State(s): State<AppState>| reading(s, Metric::Ph)))
        .route("/on", get(|State(s): State<AppState>| command(s, true)))
        .route("/off", get(|State(s): State<AppState>| command(s, false)))
        .with_state(state)
}

async fn reading(state: AppState, metric: Metric) -> impl IntoResponse {
    if metric == Metric::Ph && state.wire.drop_ph {
        debug!("pH dropped");
        return Json(json!({ "data": {} }));
    }
    let value = state.sample(metric);
    debug!(?metric, value, "reading served");
    Json(reading_body(value, state.wire))
}

async fn command(state: AppState, on: bool) -> impl IntoResponse {
    state.set_irrigating(on);
    info!(on, "irrigation command");
    Json(command_body(on))
}

// ---------------------------------------------------------------------------
// Entry-point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: u16 = env::var("DEVICE_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8081);
    let wire = WireOptions::from_env();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device port {port}"))?;

    info!(
        string_values = wire.string_values,
        drop_ph = wire.drop_ph,
        "device simulator listening on http://{addr}"
    );

    axum::serve(listener, router(AppState::new(wire)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("device server error")
}

// ===========================================================================
// Tests
// ===========================================================================
