#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_token_ascii;
use crate::ph1vote::ParticipantId;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

pub const GRANT_TOKEN_MAX_LEN: usize = 128;

/// Bearer credential for the actuator. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GrantToken(String);

impl GrantToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ContractViolation> {
        let token = Self(token.into());
        token.validate()?;
        Ok(token)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for GrantToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GrantToken(<redacted>)")
    }
}

impl Validate for GrantToken {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_ascii("grant_token", &self.0, GRANT_TOKEN_MAX_LEN)
    }
}

impl TryFrom<String> for GrantToken {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GrantToken> for String {
    fn from(value: GrantToken) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlGrant {
    pub token: GrantToken,
    pub holder_id: ParticipantId,
    pub issued_at: MonotonicTimeNs,
    pub expires_at: MonotonicTimeNs,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Pan => "pan",
            Axis::Tilt => "tilt",
        }
    }
}

/// Remote control input, tagged at the boundary before it reaches arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorCommand {
    Pan { angle: f32 },
    Tilt { angle: f32 },
    Fire { duration_ms: u32 },
}

impl ActuatorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorCommand::Pan { .. } => "pan",
            ActuatorCommand::Tilt { .. } => "tilt",
            ActuatorCommand::Fire { .. } => "fire",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantRefuse {
    HeldByOther,
    /// The token source produced something that is not a valid bearer token.
    MintFailed,
}

impl GrantRefuse {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantRefuse::HeldByOther => "HELD_BY_OTHER",
            GrantRefuse::MintFailed => "MINT_FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandReject {
    InvalidToken,
    Expired,
    OutOfBounds,
    FireQueueFull,
    NotControlling,
}

impl CommandReject {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandReject::InvalidToken => "INVALID_TOKEN",
            CommandReject::Expired => "EXPIRED",
            CommandReject::OutOfBounds => "OUT_OF_BOUNDS",
            CommandReject::FireQueueFull => "FIRE_QUEUE_FULL",
            CommandReject::NotControlling => "NOT_CONTROLLING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimReject {
    NoGrant,
    NotHolder,
    AlreadyClaimed,
}

impl ClaimReject {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimReject::NoGrant => "NO_GRANT",
            ClaimReject::NotHolder => "NOT_HOLDER",
            ClaimReject::AlreadyClaimed => "ALREADY_CLAIMED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantEndCause {
    Revoked,
    Released,
    Expired,
}

impl GrantEndCause {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantEndCause::Revoked => "revoked",
            GrantEndCause::Released => "released",
            GrantEndCause::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandAck {
    Aim {
        axis: Axis,
        target_angle: f32,
        clamped: bool,
    },
    FireQueued {
        duration_ms: u32,
        queue_position: usize,
    },
}

/// What the actuator sink is asked to do; setpoints are already smoothed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorDirective {
    Setpoint { axis: Axis, angle: f32 },
    FirePulse { duration_ms: u32, shot_seq: u64 },
}
