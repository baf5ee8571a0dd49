//! In-process stand-in for the greenhouse device, served by axum on an
//! ephemeral localhost port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;

use crate::db::Db;
use crate::settings::SettingsStore;

#[derive(Default)]
struct DeviceInner {
    responses: HashMap<String, (StatusCode, String)>,
    commands: Vec<String>,
    hits: HashMap<String, usize>,
    delay: Duration,
}

#[derive(Clone)]
pub(crate) struct FakeDevice {
    inner: Arc<Mutex<DeviceInner>>,
    pub(crate) base_url: String,
}

impl FakeDevice {
    /// Start a device reporting 24.3 °C, 55 % humidity and pH 6.8.
    pub(crate) async fn start() -> Self {
        let inner = Arc::new(Mutex::new(DeviceInner::default()));
        let app = Router::new()
            .route("/{path}", get(handle))
            .with_state(Arc::clone(&inner));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let device = Self {
            inner,
            base_url: format!("http://{addr}"),
        };
        device.set_value("temperature", 24.3);
        device.set_value("humidity", 55.0);
        device.set_value("ph", 6.8);
        device
    }

    /// A URL nothing listens on.
    pub(crate) fn unreachable_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    pub(crate) fn set_value(&self, path: &str, value: f64) {
        let body = json!({ "data": { "value": value } }).to_string();
        self.set_body(path, StatusCode::OK, &body);
    }

    pub(crate) fn set_body(&self, path: &str, status: StatusCode, body: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = delay;
    }

    /// Actuator commands received so far, in order (`"on"` / `"off"`).
    pub(crate) fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

async fn handle(
    Path(path): Path<String>,
    State(inner): State<Arc<Mutex<DeviceInner>>>,
) -> (StatusCode, String) {
    let delay = inner.lock().unwrap().delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut dev = inner.lock().unwrap();
    *dev.hits.entry(path.clone()).or_default() += 1;

    if path == "on" || path == "off" {
        dev.commands.push(path.clone());
    }

    match dev.responses.get(&path) {
        Some((status, body)) => (*status, body.clone()),
        None if path == "on" || path == "off" => (
            StatusCode::OK,
            json!({ "ok": true, "irrigation": path }).to_string(),
        ),
        None => (StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

/// Fresh in-memory database with migrations applied.
pub(crate) async fn memory_db() -> Db {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

pub(crate) async fn memory_settings() -> (Db, SettingsStore) {
    let db = memory_db().await;
    let settings = SettingsStore::open(db.clone()).await.unwrap();
    (db, settings)
}
