//! HTTP client for the greenhouse sensor device.
//!
//! Every read is best-effort: transport errors, timeouts, bad status codes
//! and malformed bodies all collapse into `None` for that one metric.
//! Actuator commands never fail either; a synthetic JSON body stands in for
//! the device response when the request does not go through.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Connect and read timeout used when the config does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One poll of the device.  Any metric may be missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Ph,
    Temperature,
    Humidity,
}

impl Metric {
    pub fn path(self) -> &'static str {
        match self {
            Self::Ph => "/ph",
            Self::Temperature => "/temperature",
            Self::Humidity => "/humidity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ph => write!(f, "pH"),
            Self::Temperature => write!(f, "Temperature"),
            Self::Humidity => write!(f, "Humidity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    On,
    Off,
}

impl ActuatorCommand {
    pub fn path(self) -> &'static str {
        match self {
            Self::On => "/on",
            Self::Off => "/off",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SensorClient {
    http: reqwest::Client,
    base_url: String,
}

impl SensorClient {
    /// `timeout` bounds the connect phase and each read of the response
    /// independently.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .context("failed to build device http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and extract `data.value`.  Never errors; absence is the
    /// only failure signal.
    pub async fn read_metric(&self, path: &str) -> Option<f64> {
        let url = format!("{}{path}", self.base_url);
        match self.get_text(&url).await {
            Ok(body) => {
                let value = parse_value(&body);
                if value.is_none() {
                    warn!(%url, body = %body.chars().take(120).collect::<String>(), "device: response carries no numeric data.value");
                }
                value
            }
            Err(e) => {
                warn!(%url, "device: read failed: {e:#}");
                None
            }
        }
    }

    /// Read all three metrics concurrently.  A failure on one does not
    /// affect the others.
    pub async fn fetch_all(&self) -> Reading {
        let (temperature, humidity, ph) = tokio::join!(
            self.read_metric(Metric::Temperature.path()),
            self.read_metric(Metric::Humidity.path()),
            self.read_metric(Metric::Ph.path()),
        );

        debug!(?temperature, ?humidity, ?ph, "device: fetched reading");

        Reading {
            temperature,
            humidity,
            ph,
            timestamp: now_timestamp(),
        }
    }

    pub async fn command_on(&self) -> String {
        self.command(ActuatorCommand::On).await
    }

    pub async fn command_off(&self) -> String {
        self.command(ActuatorCommand::Off).await
    }

    /// Fire-and-forget actuator command.  Returns the raw device body, or a
    /// synthetic `{"ok":false,...}` body when the request failed.
    pub async fn command(&self, cmd: ActuatorCommand) -> String {
        let url = format!("{}{}", self.base_url, cmd.path());
        debug!(%url, "device: sending {cmd}");
        match self.get_text(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(%url, "device: {cmd} command failed: {e:#}");
                json!({ "ok": false, "error": format!("{e:#}") }).to_string()
            }
        }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;

        resp.text()
            .await
            .with_context(|| format!("reading body of {url}"))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract `data.value` from a device body.  Accepts a JSON number or a
/// numeric string; anything else (including NaN/inf) is `None`.
pub(crate) fn parse_value(body: &str) -> Option<f64> {
    let root: Value = serde_json::from_str(body).ok()?;
    let value = match root.get("data")?.get("value")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Wall-clock stamp in `YYYY-MM-DD HH:MM:SS`, local time when the offset can
/// be determined, UTC otherwise.
pub fn now_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeDevice;
    use axum::http::StatusCode;

    // -- parse_value --------------------------------------------------------

    #[test]
    fn parse_numeric_value() {
        assert_eq!(parse_value(r#"{"data":{"value":24.5}}"#), Some(24.5));
    }

    #[test]
    fn parse_integer_value() {
        assert_eq!(parse_value(r#"{"data":{"value":55}}"#), Some(55.0));
    }

    #[test]
    fn parse_numeric_string_value() {
        assert_eq!(parse_value(r#"{"data":{"value":"6.82"}}"#), Some(6.82));
        assert_eq!(parse_value(r#"{"data":{"value":" 7 "}}"#), Some(7.0));
    }

    #[test]
    fn parse_non_numeric_string_is_none() {
        assert_eq!(parse_value(r#"{"data":{"value":"n/a"}}"#), None);
        assert_eq!(parse_value(r#"{"data":{"value":"NaN"}}"#), None);
    }

    #[test]
    fn parse_missing_value_is_none() {
        assert_eq!(parse_value(r#"{"data":{}}"#), None);
        assert_eq!(parse_value(r#"{"value":1.0}"#), None);
        assert_eq!(parse_value(r#"{"data":{"value":null}}"#), None);
        assert_eq!(parse_value(r#"{"data":{"value":[1]}}"#), None);
    }

    #[test]
    fn parse_malformed_body_is_none() {
        assert_eq!(parse_value("not json"), None);
        assert_eq!(parse_value(""), None);
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19, "unexpected timestamp: {ts}");
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    // -- against a fake device ----------------------------------------------

    #[tokio::test]
    async fn fetch_all_reads_every_metric() {
        let device = FakeDevice::start().await;
        device.set_value("temperature", 24.3);
        device.set_value("humidity", 55.0);
        device.set_body("ph", StatusCode::OK, r#"{"data":{"value":"6.8"}}"#);

        let client = SensorClient::new(&device.base_url, DEFAULT_TIMEOUT).unwrap();
        let r = client.fetch_all().await;

        assert_eq!(r.temperature, Some(24.3));
        assert_eq!(r.humidity, Some(55.0));
        assert_eq!(r.ph, Some(6.8));
        assert!(!r.timestamp.is_empty());
    }

    #[tokio::test]
    async fn one_failing_metric_does_not_block_others() {
        let device = FakeDevice::start().await;
        device.set_body("ph", StatusCode::INTERNAL_SERVER_ERROR, "boom");
        device.set_body("temperature", StatusCode::OK, "<html>");

        let client = SensorClient::new(&device.base_url, DEFAULT_TIMEOUT).unwrap();
        let r = client.fetch_all().await;

        assert_eq!(r.temperature, None);
        assert!(r.humidity.is_some());
        assert_eq!(r.ph, None);
    }

    #[tokio::test]
    async fn slow_metric_times_out_as_absent() {
        let device = FakeDevice::start().await;
        device.set_delay(Duration::from_millis(800));

        let client = SensorClient::new(&device.base_url, Duration::from_millis(100)).unwrap();
        assert_eq!(client.read_metric("/humidity").await, None);
    }

    #[tokio::test]
    async fn unreachable_device_yields_empty_reading() {
        let client = SensorClient::new(&FakeDevice::unreachable_url(), DEFAULT_TIMEOUT).unwrap();
        let r = client.fetch_all().await;
        assert_eq!((r.temperature, r.humidity, r.ph), (None, None, None));
    }

    #[tokio::test]
    async fn commands_hit_actuator_endpoints() {
        let device = FakeDevice::start().await;
        let client = SensorClient::new(&device.base_url, DEFAULT_TIMEOUT).unwrap();

        let body = client.command_on().await;
        assert!(body.contains("\"ok\":true"), "unexpected body: {body}");
        client.command_off().await;

        assert_eq!(device.commands(), vec!["on", "off"]);
    }

    #[tokio::test]
    async fn failed_command_returns_synthetic_body() {
        let client = SensorClient::new(&FakeDevice::unreachable_url(), DEFAULT_TIMEOUT).unwrap();
        let body = client.command_on().await;
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["ok"], false);
        assert!(v["error"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = SensorClient::new("http://10.0.0.5/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.5");
    }
}
