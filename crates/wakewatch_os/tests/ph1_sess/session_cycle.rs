#![forbid(unsafe_code)]

use wakewatch_engines::token::SequenceTokenSource;
use wakewatch_kernel_contracts::ph1alert::{AlertPayload, WakeNotice};
use wakewatch_kernel_contracts::ph1dwell::{DrowsinessSample, DrowsyState, SampleReject};
use wakewatch_kernel_contracts::ph1grant::{
    ActuatorCommand, ActuatorDirective, Axis, ClaimReject, CommandAck, CommandReject,
};
use wakewatch_kernel_contracts::ph1j::EventKind;
use wakewatch_kernel_contracts::ph1sess::{SessionId, SessionPhase};
use wakewatch_kernel_contracts::ph1vote::{ParticipantId, ProposalId};
use wakewatch_kernel_contracts::MonotonicTimeNs;
use wakewatch_os::actuator::{ActuatorSink, RecordingActuatorSink};
use wakewatch_os::ph1sess::{ClaimOutcome, Ph1SessConfig, Ph1SessDirective, Ph1SessRuntime};
use wakewatch_storage::recorder::EventRecorder;

const DROWSY: f32 = 0.9;
const AWAKE: f32 = 0.1;

fn ms(v: u64) -> MonotonicTimeNs {
    MonotonicTimeNs::from_ms(v)
}

fn pid(s: &str) -> ParticipantId {
    ParticipantId::new(s).unwrap()
}

/// Short dwell and vote windows so multi-session scenarios stay readable.
fn fast_config() -> Ph1SessConfig {
    let mut config = Ph1SessConfig::mvp_v1();
    config.dwell.drowsy_dwell_ms = 2_000;
    config.dwell.awake_dwell_ms = 2_000;
    config.vote.duration_ms = 5_000;
    config
}

struct Harness {
    rt: Ph1SessRuntime,
    sink: RecordingActuatorSink,
    alerts: Vec<AlertPayload>,
    wakes: Vec<WakeNotice>,
}

impl Harness {
    fn new(config: Ph1SessConfig) -> Self {
        let rt = Ph1SessRuntime::new(
            config,
            EventRecorder::in_memory(),
            Box::new(SequenceTokenSource::new()),
            ms(0),
        )
        .unwrap();
        Self {
            rt,
            sink: RecordingActuatorSink::new(),
            alerts: Vec::new(),
            wakes: Vec::new(),
        }
    }

    fn apply(&mut self, directives: Vec<Ph1SessDirective>) {
        for d in directives {
            match d {
                Ph1SessDirective::SendAlert(a) => self.alerts.push(a),
                Ph1SessDirective::SendWake(w) => self.wakes.push(w),
                Ph1SessDirective::Actuate(a) => self.sink.apply(&a).unwrap(),
            }
        }
    }

    /// Ticks every 100 ms over `[from, to]`; feeds a sample on every 500 ms
    /// boundary when a confidence is given.
    fn run(&mut self, from_ms: u64, to_ms: u64, confidence: Option<f32>) {
        let mut t = from_ms;
        while t <= to_ms {
            if let Some(c) = confidence.filter(|_| t % 500 == 0) {
                let sample = DrowsinessSample::v1(ms(t), c, 0.2, 0.1).unwrap();
                let out = self.rt.on_sample(&sample).unwrap();
                self.apply(out);
            }
            let out = self.rt.tick(ms(t));
            self.apply(out);
            t += 100;
        }
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.rt.recorder().events().iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    fn transitions(&self, session_id: SessionId) -> Vec<(String, String)> {
        self.rt
            .recorder()
            .events()
            .iter()
            .filter(|e| e.kind == EventKind::PhaseTransition && e.session_id == Some(session_id))
            .map(|e| {
                (
                    e.payload.get("from").unwrap_or_default().to_string(),
                    e.payload.get("to").unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn control_token(&mut self, holder: &str, now: MonotonicTimeNs) -> String {
        match self.rt.claim(&pid(holder), now).unwrap() {
            ClaimOutcome::Control { token, .. } => token.expose().to_string(),
            other => panic!("expected control, got {other:?}"),
        }
    }
}

#[test]
fn at_sess_cycle_01_drowsy_vote_control_wake_round_trip() {
    let mut h = Harness::new(Ph1SessConfig::mvp_v1());
    h.run(0, 15_000, Some(DROWSY));
    assert_eq!(h.rt.phase(), SessionPhase::Voting);
    assert_eq!(h.alerts.len(), 1);
    assert!(h.alerts[0].vote_link.contains("/vote?"));
    assert!(h.alerts[0].monitor_link.contains("/monitor?"));

    let id = h.rt.propose(pid("f1"), "wake up!", ms(16_000)).unwrap();
    assert_eq!(id, ProposalId(1));

    // Nobody votes; the deadline still picks the only proposal.
    h.run(15_100, 105_000, Some(DROWSY));
    assert_eq!(h.rt.phase(), SessionPhase::Controlling);
    let state = h.rt.session_state().unwrap();
    assert_eq!(state.timer_deadline, Some(ms(225_000)));

    let token = h.control_token("f1", ms(105_000));
    assert_eq!(
        h.rt.command(&token, ActuatorCommand::Pan { angle: 120.0 }, ms(105_000)),
        Ok(CommandAck::Aim {
            axis: Axis::Pan,
            target_angle: 120.0,
            clamped: false
        })
    );
    assert!(matches!(
        h.rt.command(&token, ActuatorCommand::Fire { duration_ms: 300 }, ms(105_000)),
        Ok(CommandAck::FireQueued { .. })
    ));
    h.run(105_100, 109_900, Some(DROWSY));
    assert_eq!(h.sink.fire_pulses(), 1);
    assert_eq!(h.rt.snapshot(ms(109_900)).actuator.pan.actual, 120.0);

    h.run(110_000, 125_000, Some(AWAKE));
    assert_eq!(h.rt.phase(), SessionPhase::Idle);
    assert_eq!(h.wakes.len(), 1);
    assert_eq!(h.wakes[0].winning_text.as_deref(), Some("wake up!"));
    assert_eq!(
        h.rt.command(&token, ActuatorCommand::Fire { duration_ms: 100 }, ms(125_100)),
        Err(CommandReject::NotControlling)
    );

    let kinds = h.kinds();
    let revoked = kinds.iter().position(|k| *k == EventKind::GrantRevoked).unwrap();
    let woke = kinds.iter().position(|k| *k == EventKind::WakeUp).unwrap();
    assert!(revoked < woke);

    let stats = h.rt.summarize();
    assert_eq!(stats.total_drowsy_events, 1);
    assert_eq!(stats.total_wake_ups, 1);
    assert_eq!(stats.total_shots_fired, 1);
    assert!((stats.avg_drowsy_duration_secs - 110.0).abs() < 1e-9);

    // Parked after the session: both axes head home at bounded speed.
    h.run(125_100, 140_000, Some(AWAKE));
    let actuator = h.rt.snapshot(ms(140_000)).actuator;
    assert_eq!(actuator.pan.actual, 90.0);
    assert!(h.sink.applied().iter().all(|d| match d {
        ActuatorDirective::Setpoint { angle, .. } => (0.0..=180.0).contains(angle),
        ActuatorDirective::FirePulse { duration_ms, .. } => *duration_ms <= 360,
    }));
}

#[test]
fn at_sess_cycle_02_phases_only_move_forward_within_a_session() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    h.rt.propose(pid("f1"), "up", ms(2_100)).unwrap();
    h.run(2_100, 7_000, Some(DROWSY));
    h.run(7_500, 9_500, Some(AWAKE));
    let expected: Vec<(String, String)> = [
        ("idle", "alerting"),
        ("alerting", "voting"),
        ("voting", "controlling"),
        ("controlling", "cooldown"),
        ("cooldown", "idle"),
    ]
    .iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect();
    assert_eq!(h.transitions(SessionId(1)), expected);
    assert_eq!(h.count(EventKind::InvariantViolation), 0);
}

#[test]
fn at_sess_cycle_03_second_session_inside_cooldown_is_not_alerted() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    h.run(2_100, 7_000, Some(DROWSY));
    assert_eq!(h.rt.phase(), SessionPhase::Cooldown);
    h.run(7_500, 9_500, Some(AWAKE));
    assert_eq!(h.rt.phase(), SessionPhase::Idle);

    h.run(10_000, 12_000, Some(DROWSY));
    assert_eq!(h.rt.phase(), SessionPhase::Voting);
    assert_eq!(h.rt.session_state().unwrap().session_id, SessionId(2));
    assert_eq!(h.alerts.len(), 1);
    assert_eq!(h.count(EventKind::AlertSuppressed), 1);
    let suppressed = h
        .rt
        .recorder()
        .recent(1, Some(EventKind::AlertSuppressed))
        .remove(0);
    assert_eq!(suppressed.payload.get("cooldown_remaining_ms"), Some("20000"));
}

#[test]
fn at_sess_cycle_04_most_votes_wins_and_ties_go_to_the_earliest() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    let a = h.rt.propose(pid("f1"), "A", ms(2_500)).unwrap();
    let b = h.rt.propose(pid("f2"), "B", ms(3_000)).unwrap();
    h.rt.vote(pid("v1"), b, ms(3_500)).unwrap();
    h.rt.vote(pid("v2"), b, ms(3_500)).unwrap();
    h.rt.vote(pid("v3"), a, ms(3_500)).unwrap();
    h.run(2_100, 7_000, Some(DROWSY));
    let grant = h.rt.snapshot(ms(7_000)).grant.unwrap();
    assert_eq!(grant.holder_id, pid("f2"));

    let mut tie = Harness::new(fast_config());
    tie.run(0, 2_000, Some(DROWSY));
    let a = tie.rt.propose(pid("f1"), "A", ms(2_500)).unwrap();
    let b = tie.rt.propose(pid("f2"), "B", ms(3_000)).unwrap();
    tie.rt.vote(pid("v1"), a, ms(3_500)).unwrap();
    tie.rt.vote(pid("v2"), b, ms(3_500)).unwrap();
    tie.run(2_100, 7_000, Some(DROWSY));
    let grant = tie.rt.snapshot(ms(7_000)).grant.unwrap();
    assert_eq!(grant.holder_id, pid("f1"));
}

#[test]
fn at_sess_cycle_05_full_roster_closes_the_vote_early() {
    let mut config = fast_config();
    config.vote.eligible_voters = vec![pid("v1"), pid("v2")];
    let mut h = Harness::new(config);
    h.run(0, 2_000, Some(DROWSY));
    let a = h.rt.propose(pid("f1"), "A", ms(2_200)).unwrap();
    h.rt.vote(pid("v1"), a, ms(2_300)).unwrap();
    assert_eq!(h.rt.phase(), SessionPhase::Voting);
    h.rt.vote(pid("v2"), a, ms(2_400)).unwrap();
    assert_eq!(h.rt.phase(), SessionPhase::Controlling);
    let closed = h.rt.recorder().recent(1, Some(EventKind::VoteClosed)).remove(0);
    assert_eq!(closed.payload.get("cause"), Some("all_voted"));
}

#[test]
fn at_sess_cycle_06_control_is_exclusive_to_the_winner() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    h.rt.propose(pid("f1"), "A", ms(2_500)).unwrap();
    h.run(2_100, 7_000, Some(DROWSY));

    let token = h.control_token("f1", ms(7_000));
    assert_eq!(
        h.rt.claim(&pid("f1"), ms(7_100)),
        Err(ClaimReject::AlreadyClaimed)
    );
    match h.rt.claim(&pid("f2"), ms(7_100)).unwrap() {
        ClaimOutcome::Monitor { monitor_link } => assert!(monitor_link.contains("/monitor?")),
        other => panic!("expected monitor view, got {other:?}"),
    }
    assert_eq!(
        h.rt.command("grant_not_real", ActuatorCommand::Fire { duration_ms: 100 }, ms(7_200)),
        Err(CommandReject::InvalidToken)
    );
    assert_eq!(
        h.rt.command(&token, ActuatorCommand::Tilt { angle: 200.0 }, ms(7_200)),
        Err(CommandReject::OutOfBounds)
    );
    assert_eq!(h.count(EventKind::ControlCommand), 0);
}

#[test]
fn at_sess_cycle_07_grant_expiry_and_release_both_end_in_cooldown() {
    let mut config = fast_config();
    config.grant.ttl_ms = 3_000;
    let mut h = Harness::new(config.clone());
    h.run(0, 2_000, Some(DROWSY));
    h.rt.propose(pid("f1"), "A", ms(2_500)).unwrap();
    h.run(2_100, 7_000, Some(DROWSY));
    let token = h.control_token("f1", ms(7_000));
    h.run(7_100, 10_000, Some(DROWSY));
    assert_eq!(h.rt.phase(), SessionPhase::Cooldown);
    assert_eq!(h.count(EventKind::GrantExpired), 1);
    assert_eq!(
        h.rt.command(&token, ActuatorCommand::Fire { duration_ms: 100 }, ms(10_100)),
        Err(CommandReject::NotControlling)
    );
    assert!(h.rt.timers().is_empty());

    let mut r = Harness::new(config);
    r.run(0, 2_000, Some(DROWSY));
    r.rt.propose(pid("f1"), "A", ms(2_500)).unwrap();
    r.run(2_100, 7_000, Some(DROWSY));
    let token = r.control_token("f1", ms(7_000));
    r.rt.release(&token, ms(7_500)).unwrap();
    assert_eq!(r.rt.phase(), SessionPhase::Cooldown);
    assert_eq!(r.count(EventKind::GrantReleased), 1);
    assert!(r.rt.timers().is_empty());
}

#[test]
fn at_sess_cycle_08_awake_during_voting_cancels_without_a_grant() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    h.rt.propose(pid("f1"), "A", ms(2_100)).unwrap();
    h.run(2_500, 4_500, Some(AWAKE));
    assert_eq!(h.rt.phase(), SessionPhase::Idle);
    assert_eq!(h.count(EventKind::VoteCancelled), 1);
    assert_eq!(h.count(EventKind::GrantIssued), 0);
    assert_eq!(h.wakes[0].winning_text, None);
    // The cancelled countdown never fires later.
    h.run(4_600, 10_000, Some(AWAKE));
    assert_eq!(h.count(EventKind::VoteClosed), 0);
}

#[test]
fn at_sess_cycle_09_signal_loss_holds_the_session() {
    let mut h = Harness::new(Ph1SessConfig::mvp_v1());
    h.run(0, 15_000, Some(DROWSY));
    h.run(15_100, 25_000, None);
    assert_eq!(h.count(EventKind::SignalLost), 1);
    let snapshot = h.rt.snapshot(ms(25_000));
    assert!(snapshot.signal_lost);
    assert_eq!(snapshot.confirmed_state, DrowsyState::Drowsy);
    assert_eq!(snapshot.phase, SessionPhase::Voting);

    // The awake dwell clock starts at the first sample after the gap.
    h.run(25_500, 40_000, Some(AWAKE));
    assert_eq!(h.count(EventKind::SignalRestored), 1);
    assert_eq!(h.rt.phase(), SessionPhase::Voting);
    h.run(40_100, 40_500, Some(AWAKE));
    assert_eq!(h.rt.phase(), SessionPhase::Idle);
    let woke = h.rt.recorder().recent(1, Some(EventKind::WakeUp)).remove(0);
    assert_eq!(woke.timestamp, ms(40_500));
}

#[test]
fn at_sess_cycle_10_out_of_order_samples_are_rejected_and_ignored() {
    let mut h = Harness::new(Ph1SessConfig::mvp_v1());
    h.run(0, 1_000, Some(DROWSY));
    let before = h.rt.recorder().len();
    let stale = DrowsinessSample::v1(ms(500), AWAKE, 0.2, 0.1).unwrap();
    assert!(matches!(
        h.rt.on_sample(&stale),
        Err(SampleReject::OutOfOrder { .. })
    ));
    assert_eq!(h.rt.recorder().len(), before);
}

#[test]
fn at_sess_cycle_11_summary_is_a_pure_read() {
    let mut h = Harness::new(fast_config());
    h.run(0, 2_000, Some(DROWSY));
    h.run(2_100, 7_000, Some(DROWSY));
    h.run(7_500, 9_500, Some(AWAKE));
    let len = h.rt.recorder().len();
    let first = h.rt.summarize();
    let second = h.rt.summarize();
    assert_eq!(first, second);
    assert_eq!(h.rt.recorder().len(), len);
    assert_eq!(first.total_drowsy_events, 1);
    assert_eq!(first.total_wake_ups, 1);
}
