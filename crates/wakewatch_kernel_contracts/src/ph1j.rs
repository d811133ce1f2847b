#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ph1sess::SessionId;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const PH1J_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);
pub const PAYLOAD_MAX_ENTRIES: usize = 16;
pub const PAYLOAD_VALUE_MAX_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RecorderStarted,
    DrowsinessStart,
    AlertSent,
    AlertSuppressed,
    PhaseTransition,
    VoteOpened,
    ProposalSubmitted,
    BallotCast,
    VoteClosed,
    VoteCancelled,
    GrantIssued,
    GrantRevoked,
    GrantReleased,
    GrantExpired,
    ControlCommand,
    ShotFired,
    WakeUp,
    SignalLost,
    SignalRestored,
    DeliveryFailed,
    PersistenceFailed,
    InvariantViolation,
}

impl EventKind {
    pub const ALL: [EventKind; 22] = [
        EventKind::RecorderStarted,
        EventKind::DrowsinessStart,
        EventKind::AlertSent,
        EventKind::AlertSuppressed,
        EventKind::PhaseTransition,
        EventKind::VoteOpened,
        EventKind::ProposalSubmitted,
        EventKind::BallotCast,
        EventKind::VoteClosed,
        EventKind::VoteCancelled,
        EventKind::GrantIssued,
        EventKind::GrantRevoked,
        EventKind::GrantReleased,
        EventKind::GrantExpired,
        EventKind::ControlCommand,
        EventKind::ShotFired,
        EventKind::WakeUp,
        EventKind::SignalLost,
        EventKind::SignalRestored,
        EventKind::DeliveryFailed,
        EventKind::PersistenceFailed,
        EventKind::InvariantViolation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RecorderStarted => "recorder_started",
            EventKind::DrowsinessStart => "drowsiness_start",
            EventKind::AlertSent => "alert_sent",
            EventKind::AlertSuppressed => "alert_suppressed",
            EventKind::PhaseTransition => "phase_transition",
            EventKind::VoteOpened => "vote_opened",
            EventKind::ProposalSubmitted => "proposal_submitted",
            EventKind::BallotCast => "ballot_cast",
            EventKind::VoteClosed => "vote_closed",
            EventKind::VoteCancelled => "vote_cancelled",
            EventKind::GrantIssued => "grant_issued",
            EventKind::GrantRevoked => "grant_revoked",
            EventKind::GrantReleased => "grant_released",
            EventKind::GrantExpired => "grant_expired",
            EventKind::ControlCommand => "control_command",
            EventKind::ShotFired => "shot_fired",
            EventKind::WakeUp => "wake_up",
            EventKind::SignalLost => "signal_lost",
            EventKind::SignalRestored => "signal_restored",
            EventKind::DeliveryFailed => "delivery_failed",
            EventKind::PersistenceFailed => "persistence_failed",
            EventKind::InvariantViolation => "invariant_violation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

fn is_ascii_lower_snake_key(s: &str) -> bool {
    let b = s.as_bytes();
    match b.first() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    b.iter()
        .skip(1)
        .all(|&c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_')
}

fn truncate_on_char_boundary(mut value: String, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
    value
}

/// Small key/value payload attached to every record.
///
/// Building a payload never fails: values are truncated to
/// `PAYLOAD_VALUE_MAX_BYTES` and entries past `PAYLOAD_MAX_ENTRIES` are dropped,
/// so a recorder append cannot be refused because of its payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload {
    entries: BTreeMap<String, String>,
}

impl EventPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        if self.entries.len() < PAYLOAD_MAX_ENTRIES || self.entries.contains_key(key) {
            self.entries.insert(
                key.to_string(),
                truncate_on_char_boundary(value.to_string(), PAYLOAD_VALUE_MAX_BYTES),
            );
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl Validate for EventPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.entries.len() > PAYLOAD_MAX_ENTRIES {
            return Err(ContractViolation::InvalidValue {
                field: "event_payload.entries",
                reason: "must be <= 16 entries",
            });
        }
        for (k, v) in &self.entries {
            if !is_ascii_lower_snake_key(k) || k.len() > 64 {
                return Err(ContractViolation::InvalidValue {
                    field: "event_payload.key",
                    reason: "must be lower_snake_case (a-z0-9_) and <= 64 chars",
                });
            }
            if v.len() > PAYLOAD_VALUE_MAX_BYTES {
                return Err(ContractViolation::InvalidValue {
                    field: "event_payload.value",
                    reason: "must be <= 256 bytes",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecordInput {
    pub timestamp: MonotonicTimeNs,
    pub session_id: Option<SessionId>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl EventRecordInput {
    pub fn v1(
        timestamp: MonotonicTimeNs,
        session_id: Option<SessionId>,
        kind: EventKind,
        payload: EventPayload,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            kind,
            payload,
        }
    }
}

/// A journal row. Never mutated once appended; `event_id` follows arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub schema_version: SchemaVersion,
    pub event_id: EventId,
    pub timestamp: MonotonicTimeNs,
    pub session_id: Option<SessionId>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn from_input(event_id: EventId, input: EventRecordInput) -> Self {
        Self {
            schema_version: PH1J_CONTRACT_VERSION,
            event_id,
            timestamp: input.timestamp,
            session_id: input.session_id,
            kind: input.kind,
            payload: input.payload,
        }
    }
}

/// Derived purely from the journal; recomputing it has no side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_drowsy_events: u64,
    pub total_shots_fired: u64,
    pub total_wake_ups: u64,
    pub avg_drowsy_duration_secs: f64,
    pub session_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub statistics: Statistics,
    pub recent_events: Vec<EventRecord>,
    pub recommendations: Vec<String>,
}
