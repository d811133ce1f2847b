#![forbid(unsafe_code)]

use wakewatch_kernel_contracts::ph1grant::ActuatorDirective;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorFault {
    #[error("actuator unavailable: {0}")]
    Unavailable(String),
    #[error("actuator rejected directive: {0}")]
    Rejected(String),
}

/// Physical actuator behind the arbitration layer. Best effort; faults are
/// reported back to the caller and never stall the control loop.
pub trait ActuatorSink: Send {
    fn apply(&mut self, directive: &ActuatorDirective) -> Result<(), ActuatorFault>;
}

/// Keeps every applied directive. Used by replays and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuatorSink {
    applied: Vec<ActuatorDirective>,
}

impl RecordingActuatorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &[ActuatorDirective] {
        &self.applied
    }

    pub fn fire_pulses(&self) -> usize {
        self.applied
            .iter()
            .filter(|d| matches!(d, ActuatorDirective::FirePulse { .. }))
            .count()
    }
}

impl ActuatorSink for RecordingActuatorSink {
    fn apply(&mut self, directive: &ActuatorDirective) -> Result<(), ActuatorFault> {
        self.applied.push(*directive);
        Ok(())
    }
}
