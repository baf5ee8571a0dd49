use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::sensor::Reading;
use crate::settings::Thresholds;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// A complete reading, the only kind that is ever persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub timestamp: String,
}

impl HistoryRecord {
    /// `None` unless temperature, humidity and pH are all present.
    pub fn from_reading(r: &Reading) -> Option<Self> {
        Some(Self {
            temperature: r.temperature?,
            humidity: r.humidity?,
            ph: r.ph?,
            timestamp: r.timestamp.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    pub recorded_at: String,
}

#[derive(FromRow)]
struct SettingsRow {
    temp_min: f64,
    temp_max: f64,
    wet_min: f64,
    wet_max: f64,
    ph_min: f64,
    ph_max: f64,
    reading_interval_sec: i64,
    automatic_irrigation: bool,
}

impl From<SettingsRow> for Thresholds {
    fn from(r: SettingsRow) -> Self {
        Thresholds {
            temp_min: r.temp_min,
            temp_max: r.temp_max,
            wet_min: r.wet_min,
            wet_max: r.wet_max,
            ph_min: r.ph_min,
            ph_max: r.ph_max,
            reading_interval_sec: r.reading_interval_sec,
            automatic_irrigation: r.automatic_irrigation,
        }
    }
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/greenhouse/greenhouse.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Each in-memory connection is its own database; pin to one.
        let pool_options = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Wait for in-flight queries, then close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Settings (single row, id = 1)
    // ----------------------------

    pub async fn load_settings(&self) -> Result<Option<Thresholds>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT temp_min, temp_max,
                   wet_min, wet_max,
                   ph_min, ph_max,
                   reading_interval_sec, automatic_irrigation
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("load_settings failed")?;

        Ok(row.map(Thresholds::from))
    }

    pub async fn upsert_settings(&self, t: &Thresholds) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (
              id,
              temp_min, temp_max,
              wet_min, wet_max,
              ph_min, ph_max,
              reading_interval_sec, automatic_irrigation
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              temp_min=excluded.temp_min,
              temp_max=excluded.temp_max,
              wet_min=excluded.wet_min,
              wet_max=excluded.wet_max,
              ph_min=excluded.ph_min,
              ph_max=excluded.ph_max,
              reading_interval_sec=excluded.reading_interval_sec,
              automatic_irrigation=excluded.automatic_irrigation
            "#,
        )
        .bind(t.temp_min)
        .bind(t.temp_max)
        .bind(t.wet_min)
        .bind(t.wet_max)
        .bind(t.ph_min)
        .bind(t.ph_max)
        .bind(t.reading_interval_sec)
        .bind(t.automatic_irrigation)
        .execute(&self.pool)
        .await
        .context("upsert_settings failed")?;
        Ok(())
    }

    pub async fn clear_settings(&self) -> Result<()> {
        sqlx::query("DELETE FROM settings")
            .execute(&self.pool)
            .await
            .context("clear_settings failed")?;
        Ok(())
    }

    // ----------------------------
    // History
    // ----------------------------

    pub async fn insert_history(&self, rec: &HistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (temperature, humidity, ph, recorded_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(rec.temperature)
        .bind(rec.humidity)
        .bind(rec.ph)
        .bind(&rec.timestamp)
        .execute(&self.pool)
        .await
        .context("insert_history failed")?;
        Ok(())
    }

    /// Newest first.
    pub async fn list_history(&self, limit: i64) -> Result<Vec<HistoryEntry>> {
        sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT id, temperature, humidity, ph, recorded_at
            FROM history
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_history failed")
    }

    pub async fn clear_history(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM history")
            .execute(&self.pool)
            .await
            .context("clear_history failed")?;
        Ok(res.rows_affected())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
