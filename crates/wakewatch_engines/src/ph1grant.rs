#![forbid(unsafe_code)]

use std::collections::VecDeque;

use wakewatch_kernel_contracts::ph1grant::{
    ActuatorCommand, ActuatorDirective, Axis, ClaimReject, CommandAck, CommandReject,
    ControlGrant, GrantEndCause, GrantRefuse, GrantToken,
};
use wakewatch_kernel_contracts::ph1sess::{ActuatorView, AxisView, GrantView};
use wakewatch_kernel_contracts::ph1vote::ParticipantId;
use wakewatch_kernel_contracts::MonotonicTimeNs;

use crate::token::{token_digest, TokenSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub min_deg: f32,
    pub max_deg: f32,
    pub home_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ph1GrantConfig {
    pub ttl_ms: u64,
    pub pan: AxisLimits,
    pub tilt: AxisLimits,
    /// How far outside an axis range a request may land and still be clamped.
    pub sanity_margin_deg: f32,
    pub max_step_deg: f32,
    pub fire_max_ms: u32,
    /// Fire requests above this are refused rather than clamped to `fire_max_ms`.
    pub fire_sanity_ms: u32,
    pub fire_reset_ms: u32,
    pub fire_queue_cap: usize,
}

impl Ph1GrantConfig {
    pub fn mvp_v1() -> Self {
        Self {
            ttl_ms: 120_000,
            pan: AxisLimits {
                min_deg: 0.0,
                max_deg: 180.0,
                home_deg: 90.0,
            },
            tilt: AxisLimits {
                min_deg: 45.0,
                max_deg: 135.0,
                home_deg: 90.0,
            },
            sanity_margin_deg: 30.0,
            max_step_deg: 3.0,
            fire_max_ms: 360,
            fire_sanity_ms: 1_000,
            fire_reset_ms: 370,
            fire_queue_cap: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct LiveGrant {
    digest: String,
    unclaimed: Option<GrantToken>,
    holder_id: ParticipantId,
    issued_at: MonotonicTimeNs,
    expires_at: MonotonicTimeNs,
    ended: Option<GrantEndCause>,
}

impl LiveGrant {
    fn is_live(&self, now: MonotonicTimeNs) -> bool {
        self.ended.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
struct Servo {
    axis: Axis,
    limits: AxisLimits,
    actual: f32,
    target: f32,
}

impl Servo {
    fn at_home(axis: Axis, limits: AxisLimits) -> Self {
        Self {
            axis,
            limits,
            actual: limits.home_deg,
            target: limits.home_deg,
        }
    }

    fn step(&mut self, max_step: f32) -> Option<ActuatorDirective> {
        let delta = self.target - self.actual;
        if delta == 0.0 {
            return None;
        }
        self.actual = if delta.abs() <= max_step {
            self.target
        } else {
            self.actual + max_step.copysign(delta)
        };
        Some(ActuatorDirective::Setpoint {
            axis: self.axis,
            angle: self.actual,
        })
    }

    fn view(&self) -> AxisView {
        AxisView {
            axis: self.axis,
            actual: self.actual,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantEnded {
    pub holder_id: ParticipantId,
    pub cause: GrantEndCause,
}

/// Control arbitration: the single grant, the servo setpoints and the fire queue.
///
/// Every command is checked against the grant at the moment it executes, so a
/// command racing a revoke loses.
#[derive(Debug, Clone)]
pub struct Ph1GrantRuntime {
    config: Ph1GrantConfig,
    grant: Option<LiveGrant>,
    pan: Servo,
    tilt: Servo,
    fire_queue: VecDeque<u32>,
    busy_until: Option<MonotonicTimeNs>,
    shots_fired: u64,
}

impl Ph1GrantRuntime {
    pub fn new(config: Ph1GrantConfig) -> Self {
        Self {
            pan: Servo::at_home(Axis::Pan, config.pan),
            tilt: Servo::at_home(Axis::Tilt, config.tilt),
            config,
            grant: None,
            fire_queue: VecDeque::new(),
            busy_until: None,
            shots_fired: 0,
        }
    }

    pub fn config(&self) -> &Ph1GrantConfig {
        &self.config
    }

    pub fn has_live_grant(&self, now: MonotonicTimeNs) -> bool {
        self.grant.as_ref().is_some_and(|g| g.is_live(now))
    }

    pub fn grant(
        &mut self,
        holder_id: ParticipantId,
        now: MonotonicTimeNs,
        tokens: &mut dyn TokenSource,
    ) -> Result<ControlGrant, GrantRefuse> {
        if self.has_live_grant(now) {
            return Err(GrantRefuse::HeldByOther);
        }
        let raw = tokens.mint("grant");
        let token = GrantToken::new(raw).map_err(|_| GrantRefuse::MintFailed)?;
        let expires_at = now.plus_ms(self.config.ttl_ms);
        self.grant = Some(LiveGrant {
            digest: token_digest(token.expose()),
            unclaimed: Some(token.clone()),
            holder_id: holder_id.clone(),
            issued_at: now,
            expires_at,
            ended: None,
        });
        Ok(ControlGrant {
            token,
            holder_id,
            issued_at: now,
            expires_at,
            revoked: false,
        })
    }

    /// Hands the raw token to its holder exactly once.
    pub fn claim(
        &mut self,
        participant: &ParticipantId,
        now: MonotonicTimeNs,
    ) -> Result<(GrantToken, MonotonicTimeNs), ClaimReject> {
        let grant = self
            .grant
            .as_mut()
            .filter(|g| g.is_live(now))
            .ok_or(ClaimReject::NoGrant)?;
        if &grant.holder_id != participant {
            return Err(ClaimReject::NotHolder);
        }
        let token = grant.unclaimed.take().ok_or(ClaimReject::AlreadyClaimed)?;
        Ok((token, grant.expires_at))
    }

    fn authorize(&self, token: &str, now: MonotonicTimeNs) -> Result<&LiveGrant, CommandReject> {
        let grant = self.grant.as_ref().ok_or(CommandReject::InvalidToken)?;
        if grant.digest != token_digest(token) || grant.ended.is_some() {
            return Err(CommandReject::InvalidToken);
        }
        if now >= grant.expires_at {
            return Err(CommandReject::Expired);
        }
        Ok(grant)
    }

    pub fn command(
        &mut self,
        token: &str,
        command: ActuatorCommand,
        now: MonotonicTimeNs,
    ) -> Result<CommandAck, CommandReject> {
        self.authorize(token, now)?;
        match command {
            ActuatorCommand::Pan { angle } => self.aim(Axis::Pan, angle),
            ActuatorCommand::Tilt { angle } => self.aim(Axis::Tilt, angle),
            ActuatorCommand::Fire { duration_ms } => self.queue_fire(duration_ms),
        }
    }

    fn aim(&mut self, axis: Axis, angle: f32) -> Result<CommandAck, CommandReject> {
        let margin = self.config.sanity_margin_deg;
        let servo = match axis {
            Axis::Pan => &mut self.pan,
            Axis::Tilt => &mut self.tilt,
        };
        let AxisLimits {
            min_deg, max_deg, ..
        } = servo.limits;
        if !angle.is_finite() || angle < min_deg - margin || angle > max_deg + margin {
            return Err(CommandReject::OutOfBounds);
        }
        let target = angle.clamp(min_deg, max_deg);
        servo.target = target;
        Ok(CommandAck::Aim {
            axis,
            target_angle: target,
            clamped: target != angle,
        })
    }

    fn queue_fire(&mut self, duration_ms: u32) -> Result<CommandAck, CommandReject> {
        if duration_ms == 0 || duration_ms > self.config.fire_sanity_ms {
            return Err(CommandReject::OutOfBounds);
        }
        if self.fire_queue.len() >= self.config.fire_queue_cap {
            return Err(CommandReject::FireQueueFull);
        }
        let duration_ms = duration_ms.min(self.config.fire_max_ms);
        self.fire_queue.push_back(duration_ms);
        Ok(CommandAck::FireQueued {
            duration_ms,
            queue_position: self.fire_queue.len(),
        })
    }

    pub fn revoke(&mut self, token: &str) -> Option<GrantEnded> {
        let matches = self
            .grant
            .as_ref()
            .is_some_and(|g| g.digest == token_digest(token) && g.ended.is_none());
        if !matches {
            return None;
        }
        self.end(GrantEndCause::Revoked)
    }

    /// Revokes whatever grant is live. Used by the orchestrator on cancellation.
    pub fn revoke_active(&mut self) -> Option<GrantEnded> {
        self.end(GrantEndCause::Revoked)
    }

    pub fn release(
        &mut self,
        token: &str,
        now: MonotonicTimeNs,
    ) -> Result<GrantEnded, CommandReject> {
        self.authorize(token, now)?;
        self.end(GrantEndCause::Released)
            .ok_or(CommandReject::InvalidToken)
    }

    pub fn expire_if_due(&mut self, now: MonotonicTimeNs) -> Option<GrantEnded> {
        let due = self
            .grant
            .as_ref()
            .is_some_and(|g| g.ended.is_none() && now >= g.expires_at);
        if !due {
            return None;
        }
        self.end(GrantEndCause::Expired)
    }

    fn end(&mut self, cause: GrantEndCause) -> Option<GrantEnded> {
        let grant = self.grant.as_mut().filter(|g| g.ended.is_none())?;
        grant.ended = Some(cause);
        grant.unclaimed = None;
        self.fire_queue.clear();
        self.pan.target = self.pan.actual;
        self.tilt.target = self.tilt.actual;
        Some(GrantEnded {
            holder_id: grant.holder_id.clone(),
            cause,
        })
    }

    /// Retargets both axes to home; the move is smoothed by `tick` like any other.
    pub fn park(&mut self) {
        self.pan.target = self.pan.limits.home_deg;
        self.tilt.target = self.tilt.limits.home_deg;
    }

    /// One control step: bounded motion per axis, then at most one fire pulse
    /// once the previous pulse and its reset gap are over.
    pub fn tick(&mut self, now: MonotonicTimeNs) -> Vec<ActuatorDirective> {
        let max_step = self.config.max_step_deg;
        let mut out = Vec::new();
        out.extend(self.pan.step(max_step));
        out.extend(self.tilt.step(max_step));
        let idle = self.busy_until.map_or(true, |until| now >= until);
        if idle {
            if let Some(duration_ms) = self.fire_queue.pop_front() {
                self.shots_fired += 1;
                self.busy_until = Some(
                    now.plus_ms(u64::from(duration_ms) + u64::from(self.config.fire_reset_ms)),
                );
                out.push(ActuatorDirective::FirePulse {
                    duration_ms,
                    shot_seq: self.shots_fired,
                });
            }
        }
        out
    }

    pub fn grant_view(&self, now: MonotonicTimeNs) -> Option<GrantView> {
        self.grant.as_ref().filter(|g| g.is_live(now)).map(|g| GrantView {
            holder_id: g.holder_id.clone(),
            issued_at: g.issued_at,
            expires_at: g.expires_at,
            claimed: g.unclaimed.is_none(),
        })
    }

    pub fn holder(&self, now: MonotonicTimeNs) -> Option<&ParticipantId> {
        self.grant
            .as_ref()
            .filter(|g| g.is_live(now))
            .map(|g| &g.holder_id)
    }

    pub fn actuator_view(&self) -> ActuatorView {
        ActuatorView {
            pan: self.pan.view(),
            tilt: self.tilt.view(),
            fire_queue_len: self.fire_queue.len(),
            busy_until: self.busy_until,
            shots_fired: self.shots_fired,
        }
    }
}
