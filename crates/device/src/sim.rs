//! Stateful greenhouse climate simulator for local development.
//!
//! Each metric evolves as its own channel:
//! - Temporal coherence via random walk with mean reversion
//! - Per-reading electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Diurnal cycle on temperature
//! - Humidity drying drift, reversed while irrigation is on

use std::fmt;

use crate::Metric;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Humidity hovers mid-band, low noise, rare spikes.
    Stable,
    /// Humidity drifts toward dry; automatic irrigation should kick in.
    Drying,
    /// High noise and frequent spikes on every metric.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drying" => Self::Drying,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drying => write!(f, "drying"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-metric channel
// ---------------------------------------------------------------------------

struct Channel {
    value: f64,
    center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    lo: f64,
    hi: f64,
}

impl Channel {
    fn step(&mut self, drift: f64) {
        let pull = self.mean_reversion * (self.center - self.value);
        let walk = gaussian(0.0, self.walk_sigma);
        self.value = (self.value + pull + walk + drift).clamp(self.lo, self.hi);
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct GreenhouseSim {
    temperature: Channel,
    humidity: Channel,
    ph: Channel,

    drying_per_sample: f64,
    spike_prob: f32,
    spike_scale: f64,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    irrigating: bool,
    wet_rate: f64,
}

impl GreenhouseSim {
    /// `diurnal_period_s` controls the day/night cycle length.  Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (drying, noise_scale, spike_prob, spike_scale, humidity_start) = match scenario {
            Scenario::Stable => (0.0, 1.0, 0.005_f32, 2.0, 60.0),
            Scenario::Drying => (-0.8, 1.0, 0.02, 3.0, 55.0),
            Scenario::Flaky => (-0.2, 3.0, 0.10, 6.0, 60.0),
        };

        Self {
            temperature: Channel {
                value: gaussian(24.0, 0.5),
                center: 24.0,
                walk_sigma: 0.15,
                mean_reversion: 0.05,
                noise_sigma: 0.1 * noise_scale,
                lo: -10.0,
                hi: 55.0,
            },
            humidity: Channel {
                value: humidity_start,
                center: 60.0,
                walk_sigma: 0.5,
                mean_reversion: 0.02,
                noise_sigma: 0.4 * noise_scale,
                lo: 0.0,
                hi: 100.0,
            },
            ph: Channel {
                value: gaussian(6.8, 0.1),
                center: 6.8,
                walk_sigma: 0.02,
                mean_reversion: 0.05,
                noise_sigma: 0.02 * noise_scale,
                lo: 0.0,
                hi: 14.0,
            },
            drying_per_sample: drying,
            spike_prob,
            spike_scale,
            diurnal_amplitude: 4.0,
            diurnal_period_s,
            irrigating: false,
            wet_rate: 3.0,
        }
    }

    /// Inform the simulator whether the irrigation actuator is on.
    pub fn set_irrigating(&mut self, on: bool) {
        self.irrigating = on;
    }

    pub fn irrigating(&self) -> bool {
        self.irrigating
    }

    /// Produce the next reading for `metric`, evolving its channel.
    pub fn sample(&mut self, metric: Metric) -> f64 {
        let (channel, drift, decimals) = match metric {
            Metric::Temperature => (&mut self.temperature, 0.0, 1),
            Metric::Humidity => {
                let drift = if self.irrigating {
                    self.wet_rate
                } else {
                    self.drying_per_sample
                };
                (&mut self.humidity, drift, 1)
            }
            Metric::Ph => (&mut self.ph, 0.0, 2),
        };

        channel.step(drift);

        let diurnal = if metric == Metric::Temperature {
            let now_s = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
            self.diurnal_amplitude * phase.sin()
        } else {
            0.0
        };

        let noise = gaussian(0.0, channel.noise_sigma);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, channel.noise_sigma * self.spike_scale * 10.0)
        } else {
            0.0
        };

        let reading = (channel.value + diurnal + noise + spike).clamp(channel.lo, channel.hi);
        round_to(reading, decimals)
    }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (v * p).round() / p
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sim: &mut GreenhouseSim, metric: Metric, n: usize) -> Vec<f64> {
        (0..n).map(|_| sim.sample(metric)).collect()
    }

    fn mean(v: &[f64]) -> f64 {
        v.iter().sum::<f64>() / v.len() as f64
    }

    #[test]
    fn readings_within_physical_range() {
        let mut sim = GreenhouseSim::new(Scenario::Flaky, 600.0);
        for _ in 0..500 {
            let t = sim.sample(Metric::Temperature);
            let h = sim.sample(Metric::Humidity);
            let p = sim.sample(Metric::Ph);
            assert!((-10.0..=55.0).contains(&t), "temperature out of range: {t}");
            assert!((0.0..=100.0).contains(&h), "humidity out of range: {h}");
            assert!((0.0..=14.0).contains(&p), "pH out of range: {p}");
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = GreenhouseSim::new(Scenario::Stable, 600.0);
        let samples = collect(&mut sim, Metric::Humidity, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max);
        // Allow for the rare spike.
        assert!(max_jump < 30.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn drying_scenario_loses_humidity() {
        let mut sim = GreenhouseSim::new(Scenario::Drying, 600.0);
        let before = mean(&collect(&mut sim, Metric::Humidity, 10));
        collect(&mut sim, Metric::Humidity, 100);
        let after = mean(&collect(&mut sim, Metric::Humidity, 10));
        assert!(after < before, "drying should lower humidity: before={before:.1} after={after:.1}");
    }

    #[test]
    fn irrigation_raises_humidity() {
        let mut sim = GreenhouseSim::new(Scenario::Drying, 600.0);
        collect(&mut sim, Metric::Humidity, 50);
        let before = mean(&collect(&mut sim, Metric::Humidity, 10));

        sim.set_irrigating(true);
        assert!(sim.irrigating());
        collect(&mut sim, Metric::Humidity, 30);
        let after = mean(&collect(&mut sim, Metric::Humidity, 10));

        assert!(after > before, "irrigation should raise humidity: before={before:.1} after={after:.1}");
    }

    #[test]
    fn ph_is_rounded_to_two_decimals() {
        let mut sim = GreenhouseSim::new(Scenario::Stable, 600.0);
        let p = sim.sample(Metric::Ph);
        assert_eq!(round_to(p, 2), p);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("FLAKY"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Stable);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Stable.to_string(), "stable");
        assert_eq!(Scenario::Drying.to_string(), "drying");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(
            mean.abs() < 0.15,
            "approx_std_normal mean should be near zero: {mean}"
        );
    }
}
