//! Humidity hysteresis for the irrigation actuator.
//!
//! The controller is the only writer of actuator state while automatic
//! irrigation is enabled.  Both execution contexts (the interactive loop and
//! the background job) go through one shared [`Irrigation`] handle, which
//! serialises decide-then-command under a single lock.
//!
//! ```text
//!        humidity <= wet_min
//!  Off ─────────────────────────▶ On
//!   ▲                              │
//!   ├── wet_min < h < wet_max ─────┤  (recovered into the dead band)
//!   └──────── h >= wet_max ────────┘  (safety ceiling)
//! ```
//!
//! Commands are sent only on a state change.  Manual mode issues no
//! autonomous commands and switching to it leaves the actuator as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::sensor::{ActuatorCommand, SensorClient};
use crate::settings::Thresholds;
use crate::state::StateHandle;

// ---------------------------------------------------------------------------
// Pure state machine
// ---------------------------------------------------------------------------

/// Last commanded state.  Not persisted: every process starts off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActuatorState {
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Humidity at or below `wet_min`.
    BelowMin,
    /// Humidity back inside `(wet_min, wet_max)`.
    DeadBand,
    /// Humidity at or above `wet_max`.
    Ceiling,
    /// Operator toggle in manual mode.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub command: ActuatorCommand,
    pub reason: Reason,
}

#[derive(Debug, Default)]
pub struct IrrigationController {
    state: ActuatorState,
}

impl IrrigationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// What the actuator should do for this humidity, if anything.
    pub fn decide(&self, humidity: Option<f64>, t: &Thresholds) -> Option<Decision> {
        if !t.automatic_irrigation {
            return None;
        }
        let h = humidity?;

        let (command, reason) = if !self.state.on {
            if h > t.wet_min {
                return None;
            }
            (ActuatorCommand::On, Reason::BelowMin)
        } else if h >= t.wet_max {
            (ActuatorCommand::Off, Reason::Ceiling)
        } else if h > t.wet_min {
            (ActuatorCommand::Off, Reason::DeadBand)
        } else {
            return None;
        };

        Some(Decision { command, reason })
    }

    /// Record that `cmd` was issued to the device.
    pub fn apply(&mut self, cmd: ActuatorCommand) {
        self.state.on = cmd.is_on();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    #[error("manual toggle rejected: automatic irrigation is enabled")]
    AutomaticMode,
    #[error("manual toggle rejected: a toggle is already in flight")]
    Busy,
}

/// Clears the in-flight flag when the toggle finishes, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-wide owner of the actuator.  Clones share the same controller.
#[derive(Clone)]
pub struct Irrigation {
    controller: Arc<Mutex<IrrigationController>>,
    toggling: Arc<AtomicBool>,
    client: SensorClient,
    state: StateHandle,
}

impl Irrigation {
    pub fn new(client: SensorClient, state: StateHandle) -> Self {
        Self {
            controller: Arc::new(Mutex::new(IrrigationController::new())),
            toggling: Arc::new(AtomicBool::new(false)),
            client,
            state,
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> ActuatorState {
        self.controller.lock().await.state()
    }

    /// Run one autonomous step.  `origin` names the calling context in logs.
    /// Returns the decision when a command was sent.
    pub async fn auto_step(
        &self,
        humidity: Option<f64>,
        t: &Thresholds,
        origin: &str,
    ) -> Option<Decision> {
        let mut ctl = self.controller.lock().await;

        let Some(decision) = ctl.decide(humidity, t) else {
            debug!(
                origin,
                ?humidity,
                automatic = t.automatic_irrigation,
                on = ctl.state().on,
                "irrigation: no command"
            );
            return None;
        };

        match decision.reason {
            Reason::BelowMin => info!(
                origin,
                humidity = ?humidity,
                wet_min = t.wet_min,
                "irrigation: humidity at or below min, turning on"
            ),
            Reason::DeadBand => info!(
                origin,
                humidity = ?humidity,
                wet_min = t.wet_min,
                wet_max = t.wet_max,
                "irrigation: humidity recovered into band, turning off"
            ),
            Reason::Ceiling => warn!(
                origin,
                humidity = ?humidity,
                wet_max = t.wet_max,
                "irrigation: humidity at or above max, safety off"
            ),
            Reason::Manual => {}
        }

        self.issue(&mut ctl, decision, origin).await;
        Some(decision)
    }

    /// Flip the actuator from the manual control surface.  Rejected while
    /// automatic irrigation is enabled, and while another toggle is still
    /// waiting on the device.
    pub async fn toggle(&self, automatic: bool) -> Result<ActuatorState, ToggleError> {
        if automatic {
            info!("irrigation: manual toggle ignored, automatic mode active");
            return Err(ToggleError::AutomaticMode);
        }

        if self
            .toggling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("irrigation: manual toggle ignored, previous toggle in flight");
            return Err(ToggleError::Busy);
        }
        let _in_flight = InFlight(&self.toggling);

        let mut ctl = self.controller.lock().await;
        let command = if ctl.state().on {
            ActuatorCommand::Off
        } else {
            ActuatorCommand::On
        };
        info!("irrigation: manual toggle, turning {command}");

        let decision = Decision {
            command,
            reason: Reason::Manual,
        };
        self.issue(&mut ctl, decision, "manual").await;
        Ok(ctl.state())
    }

    async fn issue(&self, ctl: &mut IrrigationController, decision: Decision, origin: &str) {
        let body = match decision.command {
            ActuatorCommand::On => self.client.command_on().await,
            ActuatorCommand::Off => self.client.command_off().await,
        };
        debug!(origin, %body, "irrigation: device response");

        ctl.apply(decision.command);

        let on = decision.command.is_on();
        self.state.update(|s| {
            s.record_actuator(
                on,
                format!("{origin}: {} ({:?})", decision.command, decision.reason),
            )
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
