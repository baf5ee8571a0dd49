mod alerts;
mod background;
mod config;
mod control;
mod db;
mod irrigation;
mod sensor;
mod settings;
mod state;
#[cfg(test)]
mod testutil;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use background::{BackgroundRunner, LogSink};
use control::{ControlLoop, TaskHandle};
use db::Db;
use irrigation::Irrigation;
use sensor::SensorClient;
use settings::SettingsStore;
use state::StateHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:greenhouse.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;

    // ── Database + settings ─────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    let settings = SettingsStore::open(db.clone()).await?;
    config::seed(&cfg, &settings).await?;
    if settings.get_latest().await?.is_none() {
        warn!("no thresholds saved yet; alerts and automatic irrigation stay idle until configured");
    }

    // ── Device + shared state ───────────────────────────────────────
    let client = SensorClient::new(&cfg.device.base_url, cfg.device.timeout())?;
    let monitor = StateHandle::new();
    monitor.update(|s| s.record_system("hub started".to_string()));

    // One actuator owner for every execution context.
    let irrigation = Irrigation::new(client.clone(), monitor.clone());

    info!(
        device = client.base_url(),
        timeout_sec = cfg.device.timeout_sec,
        db = %db_url,
        "hub ready"
    );

    // ── Interactive control loop ────────────────────────────────────
    let control = ControlLoop::new(
        settings.clone(),
        db.clone(),
        client.clone(),
        irrigation.clone(),
        monitor.clone(),
    )
    .spawn();

    // ── Background job host ─────────────────────────────────────────
    let background = if cfg.monitor.background_enabled {
        let runner = BackgroundRunner::new(
            settings.clone(),
            client.clone(),
            irrigation.clone(),
            Arc::new(LogSink::new(monitor.clone())),
        );
        let every = cfg.monitor.background_every();
        let backoff = cfg.monitor.retry_backoff();
        Some(TaskHandle::spawn(move |shutdown| {
            background::schedule(runner, every, backoff, shutdown)
        }))
    } else {
        info!("background job disabled");
        None
    };

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        monitor: monitor.clone(),
        settings,
        db: db.clone(),
        irrigation,
    };
    let web_task = tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("{e:#}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    web_task.abort();
    control.stop().await;
    if let Some(bg) = background {
        bg.stop().await;
    }
    db.close().await;

    Ok(())
}
