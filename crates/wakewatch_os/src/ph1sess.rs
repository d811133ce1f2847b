#![forbid(unsafe_code)]

use tracing::{debug, error, info, warn};
use wakewatch_engines::ph1alert::{LinkBaseError, Ph1AlertConfig, Ph1AlertRuntime};
use wakewatch_engines::ph1dwell::{Ph1DwellConfig, Ph1DwellRuntime};
use wakewatch_engines::ph1grant::{GrantEnded, Ph1GrantConfig, Ph1GrantRuntime};
use wakewatch_engines::ph1vote::{Ph1VoteConfig, Ph1VoteRuntime};
use wakewatch_engines::token::TokenSource;
use wakewatch_kernel_contracts::ph1alert::{AlertDecision, AlertPayload, SessionLinks, WakeNotice};
use wakewatch_kernel_contracts::ph1dwell::{
    DrowsinessSample, DrowsyState, DwellEvent, DwellTransition, SampleReject,
};
use wakewatch_kernel_contracts::ph1grant::{
    ActuatorCommand, ActuatorDirective, ClaimReject, CommandAck, CommandReject, GrantEndCause,
    GrantToken,
};
use wakewatch_kernel_contracts::ph1j::{EventKind, EventPayload, Statistics};
use wakewatch_kernel_contracts::ph1sess::{SessionId, SessionPhase, SessionSnapshot, SessionState};
use wakewatch_kernel_contracts::ph1vote::{
    BallotReject, ParticipantId, ProposalId, ProposalReject, VoteCloseCause, VoteOutcome,
};
use wakewatch_kernel_contracts::{MonotonicTimeNs, ReasonCodeId};
use wakewatch_storage::recorder::EventRecorder;

use crate::timers::{SessionTimers, TimerKind};

pub mod reason_codes {
    use wakewatch_kernel_contracts::ReasonCodeId;

    // PH1.SESS reason-code namespace.
    pub const SESS_OPEN_DROWSY_CONFIRMED: ReasonCodeId = ReasonCodeId(0x5345_0001);
    pub const SESS_ALERT_HANDLED: ReasonCodeId = ReasonCodeId(0x5345_0002);
    pub const SESS_VOTE_WINNER: ReasonCodeId = ReasonCodeId(0x5345_0003);
    pub const SESS_VOTE_NO_PROPOSALS: ReasonCodeId = ReasonCodeId(0x5345_0004);
    pub const SESS_GRANT_EXPIRED: ReasonCodeId = ReasonCodeId(0x5345_0005);
    pub const SESS_GRANT_RELEASED: ReasonCodeId = ReasonCodeId(0x5345_0006);
    pub const SESS_GRANT_REVOKED: ReasonCodeId = ReasonCodeId(0x5345_0007);
    pub const SESS_AWAKE_CANCELLED: ReasonCodeId = ReasonCodeId(0x5345_0008);
    pub const SESS_CLOSE_AWAKE_CONFIRMED: ReasonCodeId = ReasonCodeId(0x5345_0009);

    pub const SESS_INVARIANT_ABORT: ReasonCodeId = ReasonCodeId(0x5345_00F1);
}

pub const SNAPSHOT_REF_MAX_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Ph1SessConfig {
    pub dwell: Ph1DwellConfig,
    pub alert: Ph1AlertConfig,
    pub vote: Ph1VoteConfig,
    pub grant: Ph1GrantConfig,
}

impl Ph1SessConfig {
    pub fn mvp_v1() -> Self {
        Self {
            dwell: Ph1DwellConfig::mvp_v1(),
            alert: Ph1AlertConfig::mvp_v1(),
            vote: Ph1VoteConfig::mvp_v1(),
            grant: Ph1GrantConfig::mvp_v1(),
        }
    }
}

/// Side effects the caller must carry out after a step. Delivery is
/// fire-and-forget; actuator directives go to the sink in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Ph1SessDirective {
    SendAlert(AlertPayload),
    SendWake(WakeNotice),
    Actuate(ActuatorDirective),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Control {
        token: GrantToken,
        expires_at: MonotonicTimeNs,
    },
    /// Anyone but the grant holder gets the read-only view.
    Monitor { monitor_link: String },
}

#[derive(Debug, Clone)]
struct LiveSession {
    state: SessionState,
    links: SessionLinks,
    drowsy_since: MonotonicTimeNs,
    winning_text: Option<String>,
}

/// PH1.SESS orchestrator. The only writer of session state; every other
/// runtime is owned here and driven through it.
pub struct Ph1SessRuntime {
    dwell: Ph1DwellRuntime,
    alert: Ph1AlertRuntime,
    vote: Ph1VoteRuntime,
    grant: Ph1GrantRuntime,
    timers: SessionTimers,
    recorder: EventRecorder,
    tokens: Box<dyn TokenSource>,
    session: Option<LiveSession>,
    next_session_id: u64,
    snapshot_ref: Option<String>,
}

impl Ph1SessRuntime {
    pub fn new(
        config: Ph1SessConfig,
        recorder: EventRecorder,
        tokens: Box<dyn TokenSource>,
        started_at: MonotonicTimeNs,
    ) -> Result<Self, LinkBaseError> {
        let alert = Ph1AlertRuntime::new(config.alert.clone())?;
        recorder.record(
            started_at,
            None,
            EventKind::RecorderStarted,
            EventPayload::empty()
                .with("drowsy_dwell_ms", config.dwell.drowsy_dwell_ms)
                .with("awake_dwell_ms", config.dwell.awake_dwell_ms)
                .with("vote_duration_ms", config.vote.duration_ms)
                .with("grant_ttl_ms", config.grant.ttl_ms),
        );
        Ok(Self {
            dwell: Ph1DwellRuntime::new(config.dwell),
            alert,
            vote: Ph1VoteRuntime::new(config.vote),
            grant: Ph1GrantRuntime::new(config.grant),
            timers: SessionTimers::new(),
            recorder,
            tokens,
            session: None,
            next_session_id: 1,
            snapshot_ref: None,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map_or(SessionPhase::Idle, |s| s.state.phase)
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state)
    }

    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.state.session_id)
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    pub fn summarize(&self) -> Statistics {
        self.recorder.summarize()
    }

    fn record(&self, now: MonotonicTimeNs, kind: EventKind, payload: EventPayload) {
        self.recorder.record(now, self.session_id(), kind, payload);
    }

    /// Latest frame reference from the signal source; the next alert carries it.
    pub fn note_snapshot(&mut self, image_ref: &str) {
        let image_ref = image_ref.trim();
        if image_ref.is_empty() || image_ref.len() > SNAPSHOT_REF_MAX_LEN {
            debug!(len = image_ref.len(), "snapshot reference ignored");
            return;
        }
        self.snapshot_ref = Some(image_ref.to_string());
    }

    pub fn on_sample(
        &mut self,
        sample: &DrowsinessSample,
    ) -> Result<Vec<Ph1SessDirective>, SampleReject> {
        let now = sample.timestamp;
        let events = self.dwell.observe(sample)?;
        let mut out = Vec::new();
        for event in events {
            self.on_dwell_event(now, event, &mut out);
        }
        Ok(out)
    }

    /// Periodic step: stall detection, due timers, early vote close, and one
    /// bounded actuator step.
    pub fn tick(&mut self, now: MonotonicTimeNs) -> Vec<Ph1SessDirective> {
        let mut out = Vec::new();
        if let Some(event) = self.dwell.check_stall(now) {
            self.on_dwell_event(now, event, &mut out);
        }

        for (session_id, kind) in self.timers.take_due(now) {
            if self.session_id() != Some(session_id) {
                debug!(session_id = session_id.0, timer = kind.as_str(), "stale timer dropped");
                continue;
            }
            match kind {
                TimerKind::VoteCountdown => self.close_vote(now, VoteCloseCause::Deadline),
                TimerKind::GrantExpiry => {
                    if let Some(ended) = self.grant.expire_if_due(now) {
                        self.end_control(now, ended);
                    }
                }
            }
        }

        if self.phase() == SessionPhase::Voting
            && self.vote.is_due(now) == Some(VoteCloseCause::AllVoted)
        {
            self.close_vote(now, VoteCloseCause::AllVoted);
        }

        for directive in self.grant.tick(now) {
            if let ActuatorDirective::FirePulse {
                duration_ms,
                shot_seq,
            } = directive
            {
                self.record(
                    now,
                    EventKind::ShotFired,
                    EventPayload::empty()
                        .with("shot_seq", shot_seq)
                        .with("duration_ms", duration_ms),
                );
            }
            out.push(Ph1SessDirective::Actuate(directive));
        }
        out
    }

    fn on_dwell_event(
        &mut self,
        now: MonotonicTimeNs,
        event: DwellEvent,
        out: &mut Vec<Ph1SessDirective>,
    ) {
        match event {
            DwellEvent::SignalLost {
                last_sample_at,
                silence_ms,
            } => {
                warn!(silence_ms, "drowsiness signal lost; holding last confirmed state");
                self.record(
                    now,
                    EventKind::SignalLost,
                    EventPayload::empty()
                        .with("last_sample_ms", last_sample_at.as_ms())
                        .with("silence_ms", silence_ms)
                        .with("held_state", self.dwell.confirmed().as_str()),
                );
            }
            DwellEvent::SignalRestored { silence_ms, .. } => {
                info!(silence_ms, "drowsiness signal restored");
                self.record(
                    now,
                    EventKind::SignalRestored,
                    EventPayload::empty().with("silence_ms", silence_ms),
                );
            }
            DwellEvent::Confirmed(transition) => match transition.to {
                DrowsyState::Drowsy => self.on_drowsy_confirmed(now, &transition, out),
                DrowsyState::Awake => self.on_awake_confirmed(now, out),
            },
        }
    }

    fn on_drowsy_confirmed(
        &mut self,
        now: MonotonicTimeNs,
        transition: &DwellTransition,
        out: &mut Vec<Ph1SessDirective>,
    ) {
        if let Some(session_id) = self.session_id() {
            debug!(session_id = session_id.0, "drowsy confirmation inside a live session ignored");
            return;
        }
        let session_id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        let decision = self.alert.on_drowsy(
            now,
            session_id,
            transition,
            self.snapshot_ref.clone(),
            self.tokens.as_mut(),
        );
        self.session = Some(LiveSession {
            state: SessionState {
                session_id,
                phase: SessionPhase::Idle,
                entered_at: now,
                timer_deadline: None,
            },
            links: decision.links(),
            drowsy_since: now,
            winning_text: None,
        });
        self.record(
            now,
            EventKind::DrowsinessStart,
            EventPayload::empty()
                .with("dwell_ms", transition.dwell_ms)
                .with("confidence", format!("{:.3}", transition.confidence)),
        );
        self.transition(
            now,
            SessionPhase::Alerting,
            reason_codes::SESS_OPEN_DROWSY_CONFIRMED,
            None,
        );

        match decision {
            AlertDecision::Sent(payload) => {
                self.record(
                    now,
                    EventKind::AlertSent,
                    EventPayload::empty()
                        .with("confirmed_duration_ms", payload.confirmed_duration_ms)
                        .with("monitor_link", &payload.monitor_link)
                        .with("vote_link", &payload.vote_link),
                );
                out.push(Ph1SessDirective::SendAlert(payload));
            }
            AlertDecision::Suppressed { remaining_ms, .. } => {
                info!(session_id = session_id.0, remaining_ms, "alert suppressed by cooldown");
                self.record(
                    now,
                    EventKind::AlertSuppressed,
                    EventPayload::empty().with("cooldown_remaining_ms", remaining_ms),
                );
            }
        }

        let duration_ms = self.vote.config().duration_ms;
        match self.vote.open(session_id, duration_ms, now) {
            Ok(handle) => {
                self.transition(
                    now,
                    SessionPhase::Voting,
                    reason_codes::SESS_ALERT_HANDLED,
                    Some(handle.deadline),
                );
                self.timers
                    .schedule(session_id, TimerKind::VoteCountdown, handle.deadline);
                self.record(
                    now,
                    EventKind::VoteOpened,
                    EventPayload::empty()
                        .with("deadline_ms", handle.deadline.as_ms())
                        .with("duration_ms", duration_ms),
                );
            }
            Err(refuse) => self.abort_to_cooldown(now, &format!("vote open refused: {refuse:?}")),
        }
    }

    fn on_awake_confirmed(&mut self, now: MonotonicTimeNs, out: &mut Vec<Ph1SessDirective>) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        match self.phase() {
            SessionPhase::Voting => {
                self.timers.cancel(session_id, TimerKind::VoteCountdown);
                if let Some(handle) = self.vote.cancel() {
                    self.record(
                        now,
                        EventKind::VoteCancelled,
                        EventPayload::empty().with("deadline_ms", handle.deadline.as_ms()),
                    );
                }
                self.transition(
                    now,
                    SessionPhase::Cooldown,
                    reason_codes::SESS_AWAKE_CANCELLED,
                    None,
                );
            }
            SessionPhase::Controlling => {
                self.timers.cancel(session_id, TimerKind::GrantExpiry);
                if let Some(ended) = self.grant.revoke_active() {
                    self.record_grant_end(now, &ended);
                }
                self.transition(
                    now,
                    SessionPhase::Cooldown,
                    reason_codes::SESS_AWAKE_CANCELLED,
                    None,
                );
            }
            SessionPhase::Idle
            | SessionPhase::Confirming
            | SessionPhase::Alerting
            | SessionPhase::Cooldown => {}
        }
        self.finish_session(now, out);
    }

    /// Cooldown -> Idle: wake notice, actuator parked, per-session state dropped.
    fn finish_session(&mut self, now: MonotonicTimeNs, out: &mut Vec<Ph1SessDirective>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.state.session_id;
        let winning_text = session.winning_text.clone();
        let drowsy_ms = now.ms_since(session.drowsy_since);
        let mut payload = EventPayload::empty().with("drowsy_duration_ms", drowsy_ms);
        if let Some(text) = &winning_text {
            payload = payload.with("winning_text", text);
        }
        self.record(now, EventKind::WakeUp, payload);
        out.push(Ph1SessDirective::SendWake(
            self.alert.wake_notice(session_id, winning_text),
        ));
        self.grant.park();
        self.timers.cancel_session(session_id);
        self.transition(
            now,
            SessionPhase::Idle,
            reason_codes::SESS_CLOSE_AWAKE_CONFIRMED,
            None,
        );
        self.session = None;
        let stats = self.recorder.summarize();
        info!(
            session_id = session_id.0,
            drowsy_ms,
            total_drowsy_events = stats.total_drowsy_events,
            total_wake_ups = stats.total_wake_ups,
            total_shots_fired = stats.total_shots_fired,
            "session closed"
        );
    }

    fn close_vote(&mut self, now: MonotonicTimeNs, cause: VoteCloseCause) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        let Some(result) = self.vote.close(now, cause) else {
            return;
        };
        self.timers.cancel(session_id, TimerKind::VoteCountdown);
        let mut payload = EventPayload::empty()
            .with("cause", cause.as_str())
            .with("proposals", result.tallies.len());
        if let VoteOutcome::Winner(winner) = &result.outcome {
            payload = payload
                .with("winner_proposal_id", winner.proposal_id.0)
                .with("winner_author_id", winner.author_id.as_str())
                .with("winner_votes", winner.votes);
        }
        self.record(now, EventKind::VoteClosed, payload);

        match result.outcome {
            VoteOutcome::Winner(winner) => {
                match self
                    .grant
                    .grant(winner.author_id.clone(), now, self.tokens.as_mut())
                {
                    Ok(grant) => {
                        self.record(
                            now,
                            EventKind::GrantIssued,
                            EventPayload::empty()
                                .with("holder_id", grant.holder_id.as_str())
                                .with("expires_at_ms", grant.expires_at.as_ms()),
                        );
                        if let Some(session) = self.session.as_mut() {
                            session.winning_text = Some(winner.text);
                        }
                        self.transition(
                            now,
                            SessionPhase::Controlling,
                            reason_codes::SESS_VOTE_WINNER,
                            Some(grant.expires_at),
                        );
                        self.timers
                            .schedule(session_id, TimerKind::GrantExpiry, grant.expires_at);
                    }
                    Err(refuse) => {
                        self.abort_to_cooldown(now, &format!("grant refused: {}", refuse.as_str()))
                    }
                }
            }
            VoteOutcome::NoProposals => self.transition(
                now,
                SessionPhase::Cooldown,
                reason_codes::SESS_VOTE_NO_PROPOSALS,
                None,
            ),
        }
    }

    fn record_grant_end(&self, now: MonotonicTimeNs, ended: &GrantEnded) {
        let kind = match ended.cause {
            GrantEndCause::Revoked => EventKind::GrantRevoked,
            GrantEndCause::Released => EventKind::GrantReleased,
            GrantEndCause::Expired => EventKind::GrantExpired,
        };
        self.record(
            now,
            kind,
            EventPayload::empty().with("holder_id", ended.holder_id.as_str()),
        );
    }

    fn end_control(&mut self, now: MonotonicTimeNs, ended: GrantEnded) {
        if let Some(session_id) = self.session_id() {
            self.timers.cancel(session_id, TimerKind::GrantExpiry);
        }
        self.record_grant_end(now, &ended);
        let reason = match ended.cause {
            GrantEndCause::Expired => reason_codes::SESS_GRANT_EXPIRED,
            GrantEndCause::Released => reason_codes::SESS_GRANT_RELEASED,
            GrantEndCause::Revoked => reason_codes::SESS_GRANT_REVOKED,
        };
        self.transition(now, SessionPhase::Cooldown, reason, None);
    }

    /// Internal invariant broken: log loudly, tear down vote and grant, and
    /// park the session in Cooldown until the user is confirmed awake.
    fn abort_to_cooldown(&mut self, now: MonotonicTimeNs, detail: &str) {
        error!(session_id = ?self.session_id().map(|s| s.0), detail, "session invariant violated");
        self.record(
            now,
            EventKind::InvariantViolation,
            EventPayload::empty().with("detail", detail),
        );
        self.vote.cancel();
        if let Some(ended) = self.grant.revoke_active() {
            self.record_grant_end(now, &ended);
        }
        if let Some(session_id) = self.session_id() {
            self.timers.cancel_session(session_id);
        }
        if self.phase() != SessionPhase::Cooldown {
            self.transition(
                now,
                SessionPhase::Cooldown,
                reason_codes::SESS_INVARIANT_ABORT,
                None,
            );
        }
    }

    fn transition(
        &mut self,
        now: MonotonicTimeNs,
        to: SessionPhase,
        reason: ReasonCodeId,
        timer_deadline: Option<MonotonicTimeNs>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let from = session.state.phase;
        let session_id = session.state.session_id;
        if !from.can_advance_to(to) {
            error!(
                session_id = session_id.0,
                from = from.as_str(),
                to = to.as_str(),
                "backward phase transition refused"
            );
            self.record(
                now,
                EventKind::InvariantViolation,
                EventPayload::empty()
                    .with("detail", "backward phase transition")
                    .with("from", from.as_str())
                    .with("to", to.as_str()),
            );
            return;
        }
        session.state = SessionState {
            session_id,
            phase: to,
            entered_at: now,
            timer_deadline,
        };
        info!(
            session_id = session_id.0,
            from = from.as_str(),
            to = to.as_str(),
            reason_code = %reason,
            "session phase transition"
        );
        self.record(
            now,
            EventKind::PhaseTransition,
            EventPayload::empty()
                .with("from", from.as_str())
                .with("to", to.as_str())
                .with("reason_code", reason),
        );
    }

    pub fn propose(
        &mut self,
        author_id: ParticipantId,
        text: &str,
        now: MonotonicTimeNs,
    ) -> Result<ProposalId, ProposalReject> {
        if self.phase() != SessionPhase::Voting {
            return Err(ProposalReject::VotingClosed);
        }
        match self.vote.propose(author_id.clone(), text, now) {
            Ok(proposal_id) => {
                let stored = self
                    .vote
                    .tallies()
                    .into_iter()
                    .find(|t| t.proposal_id == proposal_id)
                    .map(|t| t.text)
                    .unwrap_or_default();
                self.record(
                    now,
                    EventKind::ProposalSubmitted,
                    EventPayload::empty()
                        .with("author_id", author_id.as_str())
                        .with("proposal_id", proposal_id.0)
                        .with("text", stored),
                );
                Ok(proposal_id)
            }
            Err(reject) => {
                debug!(author_id = author_id.as_str(), reason = reject.as_str(), "proposal rejected");
                Err(reject)
            }
        }
    }

    pub fn vote(
        &mut self,
        voter_id: ParticipantId,
        proposal_id: ProposalId,
        now: MonotonicTimeNs,
    ) -> Result<(), BallotReject> {
        if self.phase() != SessionPhase::Voting {
            return Err(BallotReject::VotingClosed);
        }
        if let Err(reject) = self.vote.vote(voter_id.clone(), proposal_id, now) {
            debug!(voter_id = voter_id.as_str(), reason = reject.as_str(), "ballot rejected");
            return Err(reject);
        }
        self.record(
            now,
            EventKind::BallotCast,
            EventPayload::empty()
                .with("voter_id", voter_id.as_str())
                .with("proposal_id", proposal_id.0),
        );
        if self.vote.is_due(now) == Some(VoteCloseCause::AllVoted) {
            self.close_vote(now, VoteCloseCause::AllVoted);
        }
        Ok(())
    }

    /// Closes the open ballot ahead of its deadline. Returns false when no vote is running.
    pub fn force_close_vote(&mut self, now: MonotonicTimeNs) -> bool {
        if self.phase() != SessionPhase::Voting {
            return false;
        }
        self.close_vote(now, VoteCloseCause::Forced);
        true
    }

    pub fn claim(
        &mut self,
        participant: &ParticipantId,
        now: MonotonicTimeNs,
    ) -> Result<ClaimOutcome, ClaimReject> {
        if self.phase() != SessionPhase::Controlling {
            return Err(ClaimReject::NoGrant);
        }
        match self.grant.claim(participant, now) {
            Ok((token, expires_at)) => {
                info!(holder_id = participant.as_str(), "control grant claimed");
                Ok(ClaimOutcome::Control { token, expires_at })
            }
            Err(ClaimReject::NotHolder) => Ok(ClaimOutcome::Monitor {
                monitor_link: self
                    .session
                    .as_ref()
                    .map(|s| s.links.monitor_link.clone())
                    .unwrap_or_default(),
            }),
            Err(reject) => Err(reject),
        }
    }

    pub fn command(
        &mut self,
        token: &str,
        command: ActuatorCommand,
        now: MonotonicTimeNs,
    ) -> Result<CommandAck, CommandReject> {
        if self.phase() != SessionPhase::Controlling {
            return Err(CommandReject::NotControlling);
        }
        let ack = self.grant.command(token, command, now).map_err(|reject| {
            debug!(command = command.as_str(), reason = reject.as_str(), "control command rejected");
            reject
        })?;
        let payload = match ack {
            CommandAck::Aim {
                axis,
                target_angle,
                clamped,
            } => EventPayload::empty()
                .with("command", axis.as_str())
                .with("target_angle", format!("{target_angle:.1}"))
                .with("clamped", clamped),
            CommandAck::FireQueued {
                duration_ms,
                queue_position,
            } => EventPayload::empty()
                .with("command", "fire")
                .with("duration_ms", duration_ms)
                .with("queue_position", queue_position),
        };
        self.record(now, EventKind::ControlCommand, payload);
        Ok(ack)
    }

    pub fn release(&mut self, token: &str, now: MonotonicTimeNs) -> Result<(), CommandReject> {
        if self.phase() != SessionPhase::Controlling {
            return Err(CommandReject::NotControlling);
        }
        let ended = self.grant.release(token, now)?;
        self.end_control(now, ended);
        Ok(())
    }

    pub fn snapshot(&self, now: MonotonicTimeNs) -> SessionSnapshot {
        SessionSnapshot {
            as_of: now,
            phase: self.phase(),
            session: self.session_state(),
            confirmed_state: self.dwell.confirmed(),
            last_confidence: self.dwell.last_confidence(),
            signal_lost: self.dwell.signal_lost(),
            vote_deadline: self.vote.handle().map(|h| h.deadline),
            tallies: self.vote.tallies(),
            grant: self.grant.grant_view(now),
            actuator: self.grant.actuator_view(),
        }
    }
}
