//! Stateless per-cycle range checks.  No deduplication: a metric that stays
//! out of range re-alerts on every cycle.

use serde::Serialize;

use crate::sensor::{Metric, Reading};
use crate::settings::Thresholds;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: Metric,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub message: String,
}

impl Alert {
    fn new(metric: Metric, value: f64, min: f64, max: f64) -> Self {
        let value_str = match metric {
            Metric::Ph => format!("{value:.2}"),
            Metric::Temperature | Metric::Humidity => format!("{value:.1}"),
        };
        Self {
            metric,
            value,
            min,
            max,
            message: format!("{metric} out of range ({value_str} / {min:.1}-{max:.1})"),
        }
    }
}

/// One alert per present metric outside `[min, max]`, always in the order
/// pH, temperature, humidity.
pub fn evaluate(t: &Thresholds, r: &Reading) -> Vec<Alert> {
    [
        (Metric::Ph, r.ph, t.ph_min, t.ph_max),
        (Metric::Temperature, r.temperature, t.temp_min, t.temp_max),
        (Metric::Humidity, r.humidity, t.wet_min, t.wet_max),
    ]
    .into_iter()
    .filter_map(|(metric, value, min, max)| {
        let value = value?;
        (value < min || value > max).then(|| Alert::new(metric, value, min, max))
    })
    .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
