#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_unit_interval;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

/// One frame's worth of output from the external feature extractor.
///
/// Consumed immediately by the debouncer; never persisted raw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrowsinessSample {
    pub timestamp: MonotonicTimeNs,
    pub confidence: f32,
    pub eye_metric: f32,
    pub mouth_metric: f32,
}

impl DrowsinessSample {
    pub fn v1(
        timestamp: MonotonicTimeNs,
        confidence: f32,
        eye_metric: f32,
        mouth_metric: f32,
    ) -> Result<Self, ContractViolation> {
        let sample = Self {
            timestamp,
            confidence,
            eye_metric,
            mouth_metric,
        };
        sample.validate()?;
        Ok(sample)
    }
}

impl Validate for DrowsinessSample {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_unit_interval("drowsiness_sample.confidence", self.confidence)?;
        if !self.eye_metric.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "drowsiness_sample.eye_metric",
            });
        }
        if !self.mouth_metric.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "drowsiness_sample.mouth_metric",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrowsyState {
    Awake,
    Drowsy,
}

impl DrowsyState {
    pub fn as_str(self) -> &'static str {
        match self {
            DrowsyState::Awake => "awake",
            DrowsyState::Drowsy => "drowsy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DwellTransition {
    pub from: DrowsyState,
    pub to: DrowsyState,
    pub confirmed_at: MonotonicTimeNs,
    /// Length of the uninterrupted candidate run that confirmed the transition.
    pub dwell_ms: u64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DwellEvent {
    Confirmed(DwellTransition),
    SignalLost {
        last_sample_at: MonotonicTimeNs,
        silence_ms: u64,
    },
    SignalRestored {
        at: MonotonicTimeNs,
        silence_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleReject {
    OutOfOrder {
        last_seen: MonotonicTimeNs,
        got: MonotonicTimeNs,
    },
}
