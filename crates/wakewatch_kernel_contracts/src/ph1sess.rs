#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::ph1dwell::DrowsyState;
use crate::ph1grant::Axis;
use crate::ph1vote::{ParticipantId, ProposalTally};
use crate::{ContractViolation, MonotonicTimeNs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl Validate for SessionId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "session_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle phases in their only legal forward order.
///
/// `Confirming` is kept in the model but never entered: the debouncer already
/// applies the dwell, so a confirmed drowsy event goes straight to `Alerting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Confirming,
    Alerting,
    Voting,
    Controlling,
    Cooldown,
}

impl SessionPhase {
    pub fn ordinal(self) -> u8 {
        match self {
            SessionPhase::Idle => 0,
            SessionPhase::Confirming => 1,
            SessionPhase::Alerting => 2,
            SessionPhase::Voting => 3,
            SessionPhase::Controlling => 4,
            SessionPhase::Cooldown => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Confirming => "confirming",
            SessionPhase::Alerting => "alerting",
            SessionPhase::Voting => "voting",
            SessionPhase::Controlling => "controlling",
            SessionPhase::Cooldown => "cooldown",
        }
    }

    /// Forward-only within a cycle; the single way back is the terminal reset to `Idle`.
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        next == SessionPhase::Idle || next.ordinal() > self.ordinal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub entered_at: MonotonicTimeNs,
    pub timer_deadline: Option<MonotonicTimeNs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantView {
    pub holder_id: ParticipantId,
    pub issued_at: MonotonicTimeNs,
    pub expires_at: MonotonicTimeNs,
    pub claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisView {
    pub axis: Axis,
    pub actual: f32,
    pub target: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorView {
    pub pan: AxisView,
    pub tilt: AxisView,
    pub fire_queue_len: usize,
    pub busy_until: Option<MonotonicTimeNs>,
    pub shots_fired: u64,
}

/// Read-only copy of orchestrator state for status pages and monitoring links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub as_of: MonotonicTimeNs,
    pub phase: SessionPhase,
    pub session: Option<SessionState>,
    pub confirmed_state: DrowsyState,
    pub last_confidence: Option<f32>,
    pub signal_lost: bool,
    pub vote_deadline: Option<MonotonicTimeNs>,
    pub tallies: Vec<ProposalTally>,
    pub grant: Option<GrantView>,
    pub actuator: ActuatorView,
}
