#![forbid(unsafe_code)]

use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use wakewatch_engines::ph1alert::{LinkBaseError, Ph1AlertRuntime};
use wakewatch_engines::ph1delivery::{
    DeliveryError, MessagingProvider, OutboundMessage, TelegramBotProvider, TelegramConfig,
};
use wakewatch_engines::token::{OsTokenSource, TokenSource};
use wakewatch_kernel_contracts::ph1alert::{AlertPayload, WakeNotice};
use wakewatch_kernel_contracts::ph1dwell::{DrowsinessSample, SampleReject};
use wakewatch_kernel_contracts::ph1grant::{
    ActuatorCommand, ActuatorDirective, ClaimReject, CommandAck, CommandReject,
};
use wakewatch_kernel_contracts::ph1j::{
    EventKind, EventPayload, EventRecord, SessionReport, Statistics,
};
use wakewatch_kernel_contracts::ph1sess::{SessionPhase, SessionSnapshot};
use wakewatch_kernel_contracts::ph1vote::{BallotReject, ParticipantId, ProposalId, ProposalReject};
use wakewatch_kernel_contracts::MonotonicTimeNs;
use wakewatch_os::actuator::{ActuatorFault, ActuatorSink};
use wakewatch_os::ph1sess::{ClaimOutcome, Ph1SessConfig, Ph1SessDirective, Ph1SessRuntime};
use wakewatch_storage::persist::{JournalPersistence, JsonlJournalFile};
use wakewatch_storage::recorder::{EventRecorder, RecordForwarder};

pub mod reason_codes {
    use wakewatch_kernel_contracts::ReasonCodeId;

    pub const ADAPTER_DELIVERY_RETRY: ReasonCodeId = ReasonCodeId(0xAD70_0001);
    pub const ADAPTER_DELIVERY_DEADLETTER: ReasonCodeId = ReasonCodeId(0xAD70_0002);
    pub const ADAPTER_PERSIST_RETRY: ReasonCodeId = ReasonCodeId(0xAD70_0003);
    pub const ADAPTER_PERSIST_DEADLETTER: ReasonCodeId = ReasonCodeId(0xAD70_0004);
}

const EVENTS_DEFAULT_LIMIT: usize = 50;
const EVENTS_MAX_LIMIT: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum AdapterConfigError {
    #[error("invalid bind address '{value}': {source}")]
    Bind {
        value: String,
        source: AddrParseError,
    },
    #[error("invalid participant id '{0}' in eligible voter roster")]
    Voter(String),
    #[error("invalid public base url: {0}")]
    PublicBase(#[from] LinkBaseError),
    #[error("messaging provider: {0}")]
    Messaging(#[from] DeliveryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("session runtime lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn mvp_v1() -> Self {
        Self {
            attempts: 3,
            base_backoff_ms: 500,
        }
    }

    /// Delay after the `failed_attempt`-th failure (1-based); doubles each time.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let shift = failed_attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << shift))
    }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub tick_ms: u64,
    pub session: Ph1SessConfig,
    pub journal_path: Option<PathBuf>,
    pub telegram: Option<TelegramConfig>,
    pub retry: RetryPolicy,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tick_ms: 20,
            session: Ph1SessConfig::mvp_v1(),
            journal_path: None,
            telegram: None,
            retry: RetryPolicy::mvp_v1(),
        }
    }

    pub fn from_env() -> Result<Self, AdapterConfigError> {
        Self::from_env_map(|key| env::var(key).ok())
    }

    /// Missing or out-of-range numeric values fall back to the `mvp_v1` default.
    pub fn from_env_map<F>(get: F) -> Result<Self, AdapterConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::mvp_v1();
        if let Some(raw) = non_empty(&get, "WAKEWATCH_HTTP_BIND") {
            config.bind = raw
                .parse()
                .map_err(|source| AdapterConfigError::Bind { value: raw, source })?;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_TICK_MS", 5..=1_000) {
            config.tick_ms = v;
        }

        let session = &mut config.session;
        if let Some(v) = ranged(&get, "WAKEWATCH_DROWSY_THRESHOLD", 0.0..=1.0) {
            session.dwell.drowsy_threshold = v;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_DROWSY_DWELL_MS", 1_000..=600_000) {
            session.dwell.drowsy_dwell_ms = v;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_AWAKE_DWELL_MS", 1_000..=600_000) {
            session.dwell.awake_dwell_ms = v;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_SIGNAL_STALL_MS", 500..=60_000) {
            session.dwell.stall_timeout_ms = v;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_ALERT_COOLDOWN_MS", 0..=3_600_000) {
            session.alert.cooldown_ms = v;
        }
        if let Some(v) = non_empty(&get, "WAKEWATCH_PUBLIC_BASE_URL") {
            session.alert.public_base_url = v;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_VOTE_DURATION_MS", 5_000..=600_000) {
            session.vote.duration_ms = v;
        }
        if let Some(raw) = non_empty(&get, "WAKEWATCH_ELIGIBLE_VOTERS") {
            session.vote.eligible_voters = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| ParticipantId::new(v).map_err(|_| AdapterConfigError::Voter(v.to_string())))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = ranged(&get, "WAKEWATCH_GRANT_TTL_MS", 5_000..=3_600_000) {
            session.grant.ttl_ms = v;
        }
        // Fails here rather than on the first drowsy episode.
        Ph1AlertRuntime::new(session.alert.clone())?;

        config.journal_path = non_empty(&get, "WAKEWATCH_JOURNAL_PATH").map(PathBuf::from);
        config.telegram = match (
            non_empty(&get, "WAKEWATCH_TELEGRAM_BOT_TOKEN"),
            non_empty(&get, "WAKEWATCH_TELEGRAM_CHAT_ID"),
        ) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig::mvp_v1(token, chat_id)),
            _ => None,
        };
        Ok(config)
    }
}

fn non_empty<F>(get: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn ranged<F, T>(get: &F, key: &str, range: RangeInclusive<T>) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd,
{
    let raw = non_empty(get, key)?;
    let parsed = raw.parse::<T>().ok().filter(|v| range.contains(v));
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unusable config value; default kept");
    }
    parsed
}

/// Process-local monotonic clock; every runtime timestamp comes from here.
#[derive(Debug, Clone, Copy)]
pub struct AdapterClock {
    started: Instant,
    base: MonotonicTimeNs,
}

impl AdapterClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            base: MonotonicTimeNs(0),
        }
    }

    pub fn now(&self) -> MonotonicTimeNs {
        let elapsed = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        MonotonicTimeNs(self.base.0.saturating_add(elapsed))
    }
}

/// Places sample-source timestamps on the adapter clock.
///
/// The source keeps its own clock; only its ordering is trusted. The first
/// timestamped sample fixes the offset between the two clocks, ordering is
/// checked on the raw source values, and placed times never go backwards.
/// Samples without a timestamp are placed at arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceTimeline {
    anchor: Option<(u64, MonotonicTimeNs)>,
    last_source_ms: Option<u64>,
    last_placed: Option<MonotonicTimeNs>,
}

impl SourceTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(
        &mut self,
        source_ms: Option<u64>,
        now: MonotonicTimeNs,
    ) -> Result<MonotonicTimeNs, SampleReject> {
        let placed = match source_ms {
            None => now,
            Some(ms) => {
                if let Some(last) = self.last_source_ms {
                    if ms < last {
                        return Err(SampleReject::OutOfOrder {
                            last_seen: MonotonicTimeNs::from_ms(last),
                            got: MonotonicTimeNs::from_ms(ms),
                        });
                    }
                }
                self.last_source_ms = Some(ms);
                let (anchor_ms, anchor_at) = *self.anchor.get_or_insert((ms, now));
                anchor_at.plus_ms(ms - anchor_ms)
            }
        };
        let placed = self.last_placed.map_or(placed, |last| placed.max(last));
        self.last_placed = Some(placed);
        Ok(placed)
    }
}

/// Stands in for a real messenger when no bot credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyMessagingProvider;

impl MessagingProvider for LogOnlyMessagingProvider {
    fn provider_ref(&self) -> &'static str {
        "log_only"
    }

    fn send_alert(&self, alert: &AlertPayload) -> Result<(), DeliveryError> {
        info!(
            session_id = alert.session_id.0,
            monitor_link = %alert.monitor_link,
            vote_link = %alert.vote_link,
            "alert: {}",
            alert.text
        );
        Ok(())
    }

    fn send_wake(&self, notice: &WakeNotice) -> Result<(), DeliveryError> {
        info!(session_id = notice.session_id.0, "wake notice: {}", notice.text);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyActuatorSink;

impl ActuatorSink for LogOnlyActuatorSink {
    fn apply(&mut self, directive: &ActuatorDirective) -> Result<(), ActuatorFault> {
        match directive {
            ActuatorDirective::Setpoint { axis, angle } => {
                debug!(axis = axis.as_str(), angle, "servo setpoint")
            }
            ActuatorDirective::FirePulse {
                duration_ms,
                shot_seq,
            } => info!(duration_ms, shot_seq, "fire pulse"),
        }
        Ok(())
    }
}

fn deliver(provider: &dyn MessagingProvider, message: &OutboundMessage) -> Result<(), DeliveryError> {
    match message {
        OutboundMessage::Alert(alert) => provider.send_alert(alert),
        OutboundMessage::Wake(notice) => provider.send_wake(notice),
    }
}

/// Delivery never blocks the session: messages queue here and a worker owns
/// the provider calls, retries and the final `delivery_failed` record.
pub fn spawn_outbound_worker(
    provider: Arc<dyn MessagingProvider>,
    recorder: EventRecorder,
    clock: AdapterClock,
    retry: RetryPolicy,
) -> mpsc::UnboundedSender<OutboundMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let (kind, session_id) = match &message {
                OutboundMessage::Alert(a) => ("alert", a.session_id),
                OutboundMessage::Wake(w) => ("wake", w.session_id),
            };
            let mut attempt = 0;
            loop {
                attempt += 1;
                let call_provider = provider.clone();
                let call_message = message.clone();
                let result =
                    tokio::task::spawn_blocking(move || deliver(call_provider.as_ref(), &call_message))
                        .await;
                let (error, retryable) = match result {
                    Ok(Ok(())) => {
                        debug!(message = kind, session_id = session_id.0, attempt, "message delivered");
                        break;
                    }
                    Ok(Err(err)) => (err.to_string(), err.is_retryable()),
                    Err(join) => (format!("delivery task failed: {join}"), false),
                };
                if retryable && attempt < retry.attempts {
                    warn!(
                        message = kind,
                        session_id = session_id.0,
                        attempt,
                        %error,
                        reason_code = %reason_codes::ADAPTER_DELIVERY_RETRY,
                        "delivery failed; retrying"
                    );
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    continue;
                }
                warn!(
                    message = kind,
                    session_id = session_id.0,
                    attempt,
                    %error,
                    reason_code = %reason_codes::ADAPTER_DELIVERY_DEADLETTER,
                    "delivery abandoned"
                );
                recorder.record(
                    clock.now(),
                    Some(session_id),
                    EventKind::DeliveryFailed,
                    EventPayload::empty()
                        .with("message", kind)
                        .with("provider", provider.provider_ref())
                        .with("attempts", attempt)
                        .with("error", error)
                        .with("reason_code", reason_codes::ADAPTER_DELIVERY_DEADLETTER),
                );
                break;
            }
        }
    });
    tx
}

struct ChannelForwarder {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl RecordForwarder for ChannelForwarder {
    fn forward(&self, record: &EventRecord) {
        if self.tx.send(record.clone()).is_err() {
            warn!(event_id = record.event_id.0, "persistence worker stopped; record kept in memory only");
        }
    }
}

/// A recorder whose rows are also written to `sink`, in append order, by a
/// background worker. Rows that still fail after retries are noted in memory.
pub fn persistent_recorder(
    sink: Arc<dyn JournalPersistence>,
    clock: AdapterClock,
    retry: RetryPolicy,
) -> EventRecorder {
    let (tx, mut rx) = mpsc::unbounded_channel::<EventRecord>();
    let recorder = EventRecorder::with_forwarder(Arc::new(ChannelForwarder { tx }));
    let failures = recorder.clone();
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let call_sink = sink.clone();
                let call_record = record.clone();
                let result =
                    tokio::task::spawn_blocking(move || call_sink.persist(&call_record)).await;
                let error = match result {
                    Ok(Ok(())) => break,
                    Ok(Err(err)) => err.to_string(),
                    Err(join) => format!("persistence task failed: {join}"),
                };
                if attempt < retry.attempts {
                    warn!(
                        event_id = record.event_id.0,
                        attempt,
                        %error,
                        reason_code = %reason_codes::ADAPTER_PERSIST_RETRY,
                        "journal write failed; retrying"
                    );
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    continue;
                }
                warn!(
                    event_id = record.event_id.0,
                    attempt,
                    %error,
                    reason_code = %reason_codes::ADAPTER_PERSIST_DEADLETTER,
                    "journal write abandoned"
                );
                failures.record_persistence_failure(clock.now(), record.event_id, &error);
                break;
            }
        }
    });
    recorder
}

/// Shared handle for handlers and the control loop. The runtime mutex is the
/// single coordination point; readers of status go through the watch channel.
#[derive(Clone)]
pub struct AdapterState {
    runtime: Arc<Mutex<Ph1SessRuntime>>,
    timeline: Arc<Mutex<SourceTimeline>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    recorder: EventRecorder,
    clock: AdapterClock,
}

impl AdapterState {
    pub fn assemble(
        session: Ph1SessConfig,
        recorder: EventRecorder,
        tokens: Box<dyn TokenSource>,
        provider: Arc<dyn MessagingProvider>,
        retry: RetryPolicy,
        clock: AdapterClock,
    ) -> Result<Self, LinkBaseError> {
        let now = clock.now();
        let runtime = Ph1SessRuntime::new(session, recorder.clone(), tokens, now)?;
        let (snapshot_tx, snapshot_rx) = watch::channel(runtime.snapshot(now));
        let outbound = spawn_outbound_worker(provider, recorder.clone(), clock, retry);
        Ok(Self {
            runtime: Arc::new(Mutex::new(runtime)),
            timeline: Arc::new(Mutex::new(SourceTimeline::new())),
            outbound,
            snapshot_tx: Arc::new(snapshot_tx),
            snapshot_rx,
            recorder,
            clock,
        })
    }

    /// Wires the production collaborators named by `config`. Must run inside a tokio runtime.
    pub fn start(config: &AdapterConfig, clock: AdapterClock) -> Result<Self, AdapterConfigError> {
        let recorder = match &config.journal_path {
            Some(path) => {
                info!(path = %path.display(), "journal persisted as json lines");
                persistent_recorder(Arc::new(JsonlJournalFile::new(path.clone())), clock, config.retry)
            }
            None => {
                info!("journal kept in memory only");
                EventRecorder::in_memory()
            }
        };
        let provider: Arc<dyn MessagingProvider> = match &config.telegram {
            Some(telegram) => Arc::new(TelegramBotProvider::new(telegram.clone())?),
            None => {
                info!("no messenger credentials; alerts are logged only");
                Arc::new(LogOnlyMessagingProvider)
            }
        };
        Ok(Self::assemble(
            config.session.clone(),
            recorder,
            Box::new(OsTokenSource),
            provider,
            config.retry,
            clock,
        )?)
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn clock(&self) -> AdapterClock {
        self.clock
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ph1SessRuntime>, AdapterError> {
        self.runtime.lock().map_err(|_| AdapterError::LockPoisoned)
    }

    /// Runs `f` under the lock with a fresh timestamp, then republishes the snapshot.
    pub fn apply<R>(
        &self,
        f: impl FnOnce(&mut Ph1SessRuntime, MonotonicTimeNs) -> R,
    ) -> Result<R, AdapterError> {
        let (out, snapshot) = {
            let mut runtime = self.lock()?;
            let now = self.clock.now();
            let out = f(&mut runtime, now);
            (out, runtime.snapshot(now))
        };
        self.snapshot_tx.send_replace(snapshot);
        Ok(out)
    }

    /// Queues outbound messages and hands back the actuator directives.
    fn dispatch(&self, directives: Vec<Ph1SessDirective>) -> Vec<ActuatorDirective> {
        let mut actuation = Vec::new();
        for directive in directives {
            let message = match directive {
                Ph1SessDirective::SendAlert(alert) => OutboundMessage::Alert(alert),
                Ph1SessDirective::SendWake(notice) => OutboundMessage::Wake(notice),
                Ph1SessDirective::Actuate(a) => {
                    actuation.push(a);
                    continue;
                }
            };
            if self.outbound.send(message).is_err() {
                warn!("outbound worker stopped; message dropped");
            }
        }
        actuation
    }

    /// One control step. Actuator I/O happens after the lock is released.
    pub fn control_tick(&self, sink: &mut dyn ActuatorSink) -> Result<(), AdapterError> {
        let directives = self.apply(|runtime, now| runtime.tick(now))?;
        for directive in self.dispatch(directives) {
            if let Err(fault) = sink.apply(&directive) {
                warn!(%fault, "actuator directive not applied");
            }
        }
        Ok(())
    }
}

/// Drives `control_tick` until the process exits.
pub async fn run_control_loop(state: AdapterState, tick_ms: u64, mut sink: Box<dyn ActuatorSink>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(err) = state.control_tick(sink.as_mut()) {
            error!(%err, "control tick failed");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub phase: SessionPhase,
    pub uptime_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInput {
    /// Source clock, milliseconds. Any epoch; only ordering matters.
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    pub confidence: f32,
    #[serde(default)]
    pub eye_metric: f32,
    #[serde(default)]
    pub mouth_metric: f32,
    /// Reference to the frame this sample was taken from, attached to the next alert.
    #[serde(default)]
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplesRequest {
    pub samples: Vec<SampleInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplesResponse {
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub author_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastRequest {
    pub voter_id: String,
    pub proposal_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub participant_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub token: String,
    pub command: ActuatorCommand,
    #[serde(default)]
    pub issued_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActionResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<CommandAck>,
}

impl ActionResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ..Self::default()
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            status: "rejected".to_string(),
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<EventRecord>,
}

type Reply = (StatusCode, Json<ActionResponse>);

fn reply(status: StatusCode, body: ActionResponse) -> Reply {
    (status, Json(body))
}

fn unavailable(err: AdapterError) -> Reply {
    error!(%err, "request refused");
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        ActionResponse::rejected("RUNTIME_UNAVAILABLE"),
    )
}

fn invalid_participant() -> Reply {
    reply(
        StatusCode::BAD_REQUEST,
        ActionResponse::rejected("INVALID_PARTICIPANT"),
    )
}

fn proposal_status(reject: ProposalReject) -> StatusCode {
    match reject {
        ProposalReject::TooLong | ProposalReject::EmptyText => StatusCode::BAD_REQUEST,
        ProposalReject::DuplicateAuthor | ProposalReject::VotingClosed => StatusCode::CONFLICT,
    }
}

fn ballot_status(reject: BallotReject) -> StatusCode {
    match reject {
        BallotReject::UnknownProposal => StatusCode::BAD_REQUEST,
        BallotReject::VotingClosed => StatusCode::CONFLICT,
    }
}

fn command_status(reject: CommandReject) -> StatusCode {
    match reject {
        CommandReject::InvalidToken | CommandReject::Expired => StatusCode::FORBIDDEN,
        CommandReject::OutOfBounds => StatusCode::BAD_REQUEST,
        CommandReject::FireQueueFull | CommandReject::NotControlling => StatusCode::CONFLICT,
    }
}

fn claim_status(reject: ClaimReject) -> StatusCode {
    match reject {
        ClaimReject::NotHolder => StatusCode::FORBIDDEN,
        ClaimReject::NoGrant | ClaimReject::AlreadyClaimed => StatusCode::CONFLICT,
    }
}

pub fn router(state: AdapterState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/signal/samples", post(post_samples))
        .route("/v1/vote/propose", post(propose))
        .route("/v1/vote/cast", post(cast_ballot))
        .route("/v1/control/claim", post(claim_control))
        .route("/v1/control/command", post(control_command))
        .route("/v1/control/release", post(release_control))
        .route("/v1/session/status", get(session_status))
        .route("/v1/stats", get(stats))
        .route("/v1/events", get(recent_events))
        .route("/v1/report", get(report))
        .with_state(state)
}

pub async fn healthz(State(state): State<AdapterState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        phase: state.snapshot().phase,
        uptime_ms: state.clock.now().as_ms(),
    })
}

pub async fn post_samples(
    State(state): State<AdapterState>,
    Json(request): Json<SamplesRequest>,
) -> (StatusCode, Json<SamplesResponse>) {
    let mut timeline = match state.timeline.lock() {
        Ok(timeline) => timeline,
        Err(_) => {
            error!(err = %AdapterError::LockPoisoned, "samples refused");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SamplesResponse {
                    accepted: 0,
                    rejected: request.samples.len(),
                }),
            );
        }
    };
    let result = state.apply(|runtime, now| {
        let mut directives = Vec::new();
        let mut rejected = 0;
        for input in &request.samples {
            let mut sample = match DrowsinessSample::v1(
                now,
                input.confidence,
                input.eye_metric,
                input.mouth_metric,
            ) {
                Ok(sample) => sample,
                Err(violation) => {
                    debug!(%violation, "malformed sample dropped");
                    rejected += 1;
                    continue;
                }
            };
            sample.timestamp = match timeline.place(input.timestamp_ms, now) {
                Ok(at) => at,
                Err(reject) => {
                    warn!(?reject, "sample dropped");
                    rejected += 1;
                    continue;
                }
            };
            if let Some(image_ref) = &input.image_ref {
                runtime.note_snapshot(image_ref);
            }
            match runtime.on_sample(&sample) {
                Ok(out) => directives.extend(out),
                Err(reject) => {
                    warn!(?reject, "sample dropped");
                    rejected += 1;
                }
            }
        }
        (directives, rejected)
    });
    drop(timeline);
    let (directives, rejected) = match result {
        Ok(v) => v,
        Err(err) => {
            error!(%err, "samples refused");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SamplesResponse {
                    accepted: 0,
                    rejected: request.samples.len(),
                }),
            );
        }
    };
    if !state.dispatch(directives).is_empty() {
        warn!("actuator directives outside the control tick dropped");
    }
    let accepted = request.samples.len() - rejected;
    let status = if accepted == 0 && rejected > 0 {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(SamplesResponse { accepted, rejected }))
}

pub async fn propose(
    State(state): State<AdapterState>,
    Json(request): Json<ProposeRequest>,
) -> Reply {
    let Ok(author_id) = ParticipantId::new(request.author_id) else {
        return invalid_participant();
    };
    match state.apply(|runtime, now| runtime.propose(author_id, &request.text, now)) {
        Ok(Ok(ProposalId(id))) => reply(
            StatusCode::OK,
            ActionResponse {
                proposal_id: Some(id),
                ..ActionResponse::ok()
            },
        ),
        Ok(Err(reject)) => reply(proposal_status(reject), ActionResponse::rejected(reject.as_str())),
        Err(err) => unavailable(err),
    }
}

pub async fn cast_ballot(
    State(state): State<AdapterState>,
    Json(request): Json<CastRequest>,
) -> Reply {
    let Ok(voter_id) = ParticipantId::new(request.voter_id) else {
        return invalid_participant();
    };
    let proposal_id = ProposalId(request.proposal_id);
    match state.apply(|runtime, now| runtime.vote(voter_id, proposal_id, now)) {
        Ok(Ok(())) => reply(StatusCode::OK, ActionResponse::ok()),
        Ok(Err(reject)) => reply(ballot_status(reject), ActionResponse::rejected(reject.as_str())),
        Err(err) => unavailable(err),
    }
}

pub async fn claim_control(
    State(state): State<AdapterState>,
    Json(request): Json<ClaimRequest>,
) -> Reply {
    let Ok(participant) = ParticipantId::new(request.participant_id) else {
        return invalid_participant();
    };
    let result = state.apply(|runtime, now| {
        runtime
            .claim(&participant, now)
            .map(|outcome| (outcome, now))
    });
    match result {
        Ok(Ok((ClaimOutcome::Control { token, expires_at }, now))) => reply(
            StatusCode::OK,
            ActionResponse {
                token: Some(token.expose().to_string()),
                expires_in_ms: Some(expires_at.ms_since(now)),
                ..ActionResponse::ok()
            },
        ),
        Ok(Ok((ClaimOutcome::Monitor { monitor_link }, _))) => reply(
            StatusCode::OK,
            ActionResponse {
                status: "monitor".to_string(),
                monitor_link: Some(monitor_link),
                ..ActionResponse::default()
            },
        ),
        Ok(Err(reject)) => reply(claim_status(reject), ActionResponse::rejected(reject.as_str())),
        Err(err) => unavailable(err),
    }
}

/// Authorization uses arrival time; `issued_at_ms` only feeds the lag log.
pub async fn control_command(
    State(state): State<AdapterState>,
    Json(request): Json<CommandRequest>,
) -> Reply {
    let result = state.apply(|runtime, now| {
        if let Some(issued) = request.issued_at_ms {
            debug!(lag_ms = now.ms_since(MonotonicTimeNs::from_ms(issued)), "command lag");
        }
        runtime.command(&request.token, request.command, now)
    });
    match result {
        Ok(Ok(ack)) => reply(
            StatusCode::OK,
            ActionResponse {
                ack: Some(ack),
                ..ActionResponse::ok()
            },
        ),
        Ok(Err(reject)) => reply(command_status(reject), ActionResponse::rejected(reject.as_str())),
        Err(err) => unavailable(err),
    }
}

pub async fn release_control(
    State(state): State<AdapterState>,
    Json(request): Json<ReleaseRequest>,
) -> Reply {
    match state.apply(|runtime, now| runtime.release(&request.token, now)) {
        Ok(Ok(())) => reply(StatusCode::OK, ActionResponse::ok()),
        Ok(Err(reject)) => reply(command_status(reject), ActionResponse::rejected(reject.as_str())),
        Err(err) => unavailable(err),
    }
}

pub async fn session_status(State(state): State<AdapterState>) -> Json<SessionSnapshot> {
    Json(state.snapshot())
}

pub async fn stats(State(state): State<AdapterState>) -> Json<Statistics> {
    Json(state.recorder.summarize())
}

pub async fn recent_events(
    State(state): State<AdapterState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Reply> {
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(EventKind::parse(raw).ok_or_else(|| {
            reply(StatusCode::BAD_REQUEST, ActionResponse::rejected("UNKNOWN_EVENT_KIND"))
        })?),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(EVENTS_DEFAULT_LIMIT)
        .clamp(1, EVENTS_MAX_LIMIT);
    Ok(Json(EventsResponse {
        events: state.recorder.recent(limit, kind),
    }))
}

pub async fn report(State(state): State<AdapterState>) -> Json<SessionReport> {
    Json(state.recorder.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wakewatch_engines::ph1delivery::InMemoryMessagingProvider;
    use wakewatch_engines::token::SequenceTokenSource;
    use wakewatch_os::actuator::RecordingActuatorSink;
    use wakewatch_kernel_contracts::ph1vote::VoteCloseCause;

    fn fast_session() -> Ph1SessConfig {
        let mut config = Ph1SessConfig::mvp_v1();
        config.dwell.drowsy_dwell_ms = 2_000;
        config.dwell.awake_dwell_ms = 2_000;
        config.vote.duration_ms = 5_000;
        config
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_backoff_ms: 5,
        }
    }

    fn state_with(provider: InMemoryMessagingProvider) -> AdapterState {
        state_on(AdapterClock::start(), provider)
    }

    fn state_on(clock: AdapterClock, provider: InMemoryMessagingProvider) -> AdapterState {
        AdapterState::assemble(
            fast_session(),
            EventRecorder::in_memory(),
            Box::new(SequenceTokenSource::new()),
            Arc::new(provider),
            fast_retry(),
            clock,
        )
        .unwrap()
    }

    /// Five samples 500 ms apart on the source's own clock.
    async fn post_batch(
        state: &AdapterState,
        source_start_ms: u64,
        confidence: f32,
    ) -> (StatusCode, SamplesResponse) {
        let samples = (0..5)
            .map(|i| SampleInput {
                timestamp_ms: Some(source_start_ms + i * 500),
                confidence,
                eye_metric: 0.2,
                mouth_metric: 0.1,
                image_ref: None,
            })
            .collect();
        let (status, Json(body)) =
            post_samples(State(state.clone()), Json(SamplesRequest { samples })).await;
        (status, body)
    }

    async fn wait_until(cond: impl Fn() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn go_drowsy(state: &AdapterState) -> (StatusCode, SamplesResponse) {
        let samples = (0..=4)
            .map(|i| SampleInput {
                timestamp_ms: Some(i * 500),
                confidence: 0.9,
                eye_metric: 0.2,
                mouth_metric: 0.1,
                image_ref: None,
            })
            .collect();
        let (status, Json(body)) =
            post_samples(State(state.clone()), Json(SamplesRequest { samples })).await;
        (status, body)
    }

    async fn propose_as(state: &AdapterState, author: &str, text: &str) -> Reply {
        propose(
            State(state.clone()),
            Json(ProposeRequest {
                author_id: author.to_string(),
                text: text.to_string(),
            }),
        )
        .await
    }

    async fn claim_as(state: &AdapterState, who: &str) -> Reply {
        claim_control(
            State(state.clone()),
            Json(ClaimRequest {
                participant_id: who.to_string(),
            }),
        )
        .await
    }

    async fn command_with(state: &AdapterState, token: &str, command: ActuatorCommand) -> Reply {
        control_command(
            State(state.clone()),
            Json(CommandRequest {
                token: token.to_string(),
                command,
                issued_at_ms: None,
            }),
        )
        .await
    }

    #[test]
    fn at_adapter_01_config_defaults_and_range_filters() {
        let defaults = AdapterConfig::from_env_map(|_| None).unwrap();
        assert_eq!(defaults.tick_ms, 20);
        assert_eq!(defaults.session, Ph1SessConfig::mvp_v1());
        assert!(defaults.telegram.is_none());
        assert!(defaults.journal_path.is_none());

        let vars: HashMap<&str, &str> = HashMap::from([
            ("WAKEWATCH_VOTE_DURATION_MS", "20000"),
            ("WAKEWATCH_TICK_MS", "0"),
            ("WAKEWATCH_DROWSY_THRESHOLD", "1.7"),
            ("WAKEWATCH_ELIGIBLE_VOTERS", "v1, v2,,"),
            ("WAKEWATCH_TELEGRAM_BOT_TOKEN", "123:abc"),
            ("WAKEWATCH_TELEGRAM_CHAT_ID", "-100"),
            ("WAKEWATCH_JOURNAL_PATH", "/var/lib/wakewatch/journal.jsonl"),
        ]);
        let config =
            AdapterConfig::from_env_map(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.session.vote.duration_ms, 20_000);
        assert_eq!(config.tick_ms, 20);
        assert_eq!(config.session.dwell.drowsy_threshold, 0.5);
        assert_eq!(
            config.session.vote.eligible_voters,
            vec![
                ParticipantId::new("v1").unwrap(),
                ParticipantId::new("v2").unwrap()
            ]
        );
        assert_eq!(config.telegram.unwrap().chat_id, "-100");
        assert!(config.journal_path.is_some());
    }

    #[test]
    fn at_adapter_02_config_refuses_bad_bind_roster_and_base_url() {
        let bind = AdapterConfig::from_env_map(|k| {
            (k == "WAKEWATCH_HTTP_BIND").then(|| "nowhere".to_string())
        });
        assert!(matches!(bind, Err(AdapterConfigError::Bind { .. })));
        let roster = AdapterConfig::from_env_map(|k| {
            (k == "WAKEWATCH_ELIGIBLE_VOTERS").then(|| "ok,not ok".to_string())
        });
        assert!(matches!(roster, Err(AdapterConfigError::Voter(v)) if v == "not ok"));
        let base = AdapterConfig::from_env_map(|k| {
            (k == "WAKEWATCH_PUBLIC_BASE_URL").then(|| "not a url".to_string())
        });
        assert!(matches!(base, Err(AdapterConfigError::PublicBase(_))));
    }

    #[test]
    fn at_adapter_03_backoff_doubles() {
        let retry = RetryPolicy::mvp_v1();
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_millis(1_000));
        assert_eq!(retry.backoff(3), Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn at_adapter_04_samples_open_a_vote_and_the_alert_goes_out() {
        let provider = InMemoryMessagingProvider::new();
        let state = state_with(provider.clone());
        let (status, body) = go_drowsy(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, SamplesResponse { accepted: 5, rejected: 0 });
        let Json(snapshot) = session_status(State(state.clone())).await;
        assert_eq!(snapshot.phase, SessionPhase::Voting);
        assert!(wait_until(|| provider.sent().len() == 1).await);
        assert!(matches!(provider.sent()[0], OutboundMessage::Alert(_)));

        let stale = SamplesRequest {
            samples: vec![SampleInput {
                timestamp_ms: Some(100),
                confidence: 0.2,
                eye_metric: 0.0,
                mouth_metric: 0.0,
                image_ref: None,
            }],
        };
        let (status, Json(body)) = post_samples(State(state.clone()), Json(stale)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.rejected, 1);
    }

    #[tokio::test]
    async fn at_adapter_05_participant_rejections_map_to_http_status() {
        let state = state_with(InMemoryMessagingProvider::new());
        let (status, Json(body)) = propose_as(&state, "f1", "hello").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason.as_deref(), Some("VOTING_CLOSED"));
        let (status, _) = propose_as(&state, "has space", "hello").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        go_drowsy(&state).await;
        let (status, Json(body)) = propose_as(&state, "f1", "   ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.reason.as_deref(), Some("EMPTY_TEXT"));
        let (status, Json(body)) = propose_as(&state, "f1", "wake up!").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.proposal_id, Some(1));
        let (status, Json(body)) = propose_as(&state, "f1", "again").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason.as_deref(), Some("DUPLICATE_AUTHOR"));

        let (status, Json(body)) = cast_ballot(
            State(state.clone()),
            Json(CastRequest {
                voter_id: "v1".to_string(),
                proposal_id: 9,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.reason.as_deref(), Some("UNKNOWN_PROPOSAL"));
        let (status, _) = cast_ballot(
            State(state.clone()),
            Json(CastRequest {
                voter_id: "v1".to_string(),
                proposal_id: 1,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn at_adapter_06_claim_command_and_tick_drive_the_actuator() {
        let state = state_with(InMemoryMessagingProvider::new());
        let (status, Json(body)) = claim_as(&state, "f1").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason.as_deref(), Some("NO_GRANT"));

        go_drowsy(&state).await;
        propose_as(&state, "f1", "wake up!").await;
        assert!(state.apply(|rt, now| rt.force_close_vote(now)).unwrap());
        assert_eq!(state.snapshot().phase, SessionPhase::Controlling);

        let (status, Json(body)) = claim_as(&state, "f2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "monitor");
        assert!(body.monitor_link.unwrap().contains("/monitor?"));

        let (status, Json(body)) = claim_as(&state, "f1").await;
        assert_eq!(status, StatusCode::OK);
        let token = body.token.unwrap();
        assert!(body.expires_in_ms.unwrap() <= 120_000);

        let (status, Json(body)) =
            command_with(&state, "grant_forged", ActuatorCommand::Fire { duration_ms: 200 }).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.reason.as_deref(), Some("INVALID_TOKEN"));
        let (status, _) =
            command_with(&state, &token, ActuatorCommand::Pan { angle: 400.0 }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, Json(body)) =
            command_with(&state, &token, ActuatorCommand::Fire { duration_ms: 200 }).await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(body.ack, Some(CommandAck::FireQueued { .. })));

        let mut sink = RecordingActuatorSink::new();
        state.control_tick(&mut sink).unwrap();
        assert_eq!(sink.fire_pulses(), 1);

        let shots = recent_events(
            State(state.clone()),
            Query(EventsQuery {
                limit: None,
                kind: Some("shot_fired".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(shots.0.events.len(), 1);
        assert_eq!(stats(State(state.clone())).await.0.total_shots_fired, 1);

        let (status, _) = release_control(
            State(state.clone()),
            Json(ReleaseRequest { token: token.clone() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.snapshot().phase, SessionPhase::Cooldown);
        let (status, Json(body)) =
            command_with(&state, &token, ActuatorCommand::Fire { duration_ms: 200 }).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason.as_deref(), Some("NOT_CONTROLLING"));
    }

    #[tokio::test]
    async fn at_adapter_07_delivery_retries_then_records_failure() {
        let flaky = InMemoryMessagingProvider::failing_first(1);
        let state = state_with(flaky.clone());
        go_drowsy(&state).await;
        assert!(wait_until(|| flaky.sent().len() == 1).await);
        assert!(state
            .recorder()
            .recent(10, Some(EventKind::DeliveryFailed))
            .is_empty());

        let down = InMemoryMessagingProvider::failing_first(100);
        let state = state_with(down.clone());
        go_drowsy(&state).await;
        let recorder = state.recorder().clone();
        assert!(
            wait_until(|| !recorder.recent(1, Some(EventKind::DeliveryFailed)).is_empty()).await
        );
        let failed = recorder.recent(1, Some(EventKind::DeliveryFailed)).remove(0);
        assert_eq!(failed.payload.get("attempts"), Some("3"));
        assert_eq!(failed.payload.get("message"), Some("alert"));
        assert!(down.sent().is_empty());
    }

    #[tokio::test]
    async fn at_adapter_08_persistence_worker_keeps_order_and_notes_failures() {
        let dir = env::temp_dir().join(format!("wakewatch_adapter_{}", std::process::id()));
        let path = dir.join("journal.jsonl");
        let _ = std::fs::remove_dir_all(&dir);
        let file = JsonlJournalFile::new(path.clone());
        let recorder = persistent_recorder(Arc::new(file.clone()), AdapterClock::start(), fast_retry());
        for kind in [EventKind::DrowsinessStart, EventKind::AlertSent, EventKind::WakeUp] {
            recorder.record(MonotonicTimeNs::from_ms(1), None, kind, EventPayload::empty());
        }
        assert!(wait_until(|| file.load().map(|rows| rows.len() == 3).unwrap_or(false)).await);
        let kinds: Vec<EventKind> = file.load().unwrap().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::DrowsinessStart, EventKind::AlertSent, EventKind::WakeUp]
        );

        // A directory where the file should be makes every write fail.
        let blocked = dir.join("blocked");
        std::fs::create_dir_all(&blocked).unwrap();
        let failing = persistent_recorder(
            Arc::new(JsonlJournalFile::new(blocked)),
            AdapterClock::start(),
            fast_retry(),
        );
        failing.record(MonotonicTimeNs::from_ms(1), None, EventKind::AlertSent, EventPayload::empty());
        assert!(
            wait_until(|| !failing.recent(1, Some(EventKind::PersistenceFailed)).is_empty()).await
        );
        assert_eq!(failing.len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn at_adapter_09_events_query_validates_kind() {
        let state = state_with(InMemoryMessagingProvider::new());
        let err = recent_events(
            State(state.clone()),
            Query(EventsQuery {
                limit: Some(5),
                kind: Some("not_a_kind".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        let Json(all) = recent_events(State(state.clone()), Query(EventsQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.events[0].kind, EventKind::RecorderStarted);
        let Json(health) = healthz(State(state)).await;
        assert_eq!(health.phase, SessionPhase::Idle);
    }

    #[test]
    fn at_adapter_10_source_timeline_keeps_raw_order_and_never_rewinds() {
        let at = MonotonicTimeNs::from_ms;
        let mut timeline = SourceTimeline::new();
        assert_eq!(timeline.place(Some(1_700_000_000_000), at(40)), Ok(at(40)));
        assert_eq!(timeline.place(Some(1_700_000_000_500), at(45)), Ok(at(540)));
        assert!(matches!(
            timeline.place(Some(1_699_999_999_999), at(50)),
            Err(SampleReject::OutOfOrder { .. })
        ));
        // Arrival-stamped samples never land before what was already placed.
        assert_eq!(timeline.place(None, at(60)), Ok(at(540)));
        assert_eq!(timeline.place(None, at(900)), Ok(at(900)));
        assert_eq!(timeline.place(Some(1_700_000_000_600), at(910)), Ok(at(900)));
        assert_eq!(timeline.place(Some(1_700_000_001_500), at(920)), Ok(at(1_540)));
    }

    #[tokio::test]
    async fn at_adapter_11_source_clock_ahead_still_closes_vote_on_adapter_deadline() {
        let state = state_with(InMemoryMessagingProvider::new());
        let before = state.clock().now();
        let (status, body) = post_batch(&state, 1_700_000_000_000, 0.9).await;
        let after = state.clock().now();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, SamplesResponse { accepted: 5, rejected: 0 });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Voting);
        // 2 s of dwell inside the batch plus the 5 s vote, measured from arrival.
        let deadline = snapshot.vote_deadline.unwrap();
        assert!(deadline >= before.plus_ms(7_000));
        assert!(deadline <= after.plus_ms(7_000));

        let untimestamped = SamplesRequest {
            samples: vec![SampleInput {
                timestamp_ms: None,
                confidence: 0.9,
                eye_metric: 0.2,
                mouth_metric: 0.1,
                image_ref: None,
            }],
        };
        let (status, Json(body)) = post_samples(State(state.clone()), Json(untimestamped)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, SamplesResponse { accepted: 1, rejected: 0 });

        state.apply(|rt, _| rt.tick(deadline)).unwrap();
        assert_eq!(state.snapshot().phase, SessionPhase::Cooldown);
        assert_eq!(
            state
                .recorder()
                .recent(1, Some(EventKind::VoteClosed))[0]
                .payload
                .get("cause"),
            Some(VoteCloseCause::Deadline.as_str())
        );
    }

    #[tokio::test]
    async fn at_adapter_12_source_clock_behind_does_not_read_as_signal_loss() {
        let clock = AdapterClock {
            started: Instant::now(),
            base: MonotonicTimeNs::from_ms(600_000),
        };
        let state = state_on(clock, InMemoryMessagingProvider::new());
        let mut sink = RecordingActuatorSink::new();

        let (status, body) = post_batch(&state, 0, 0.9).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.accepted, 5);
        state.control_tick(&mut sink).unwrap();
        let (_, body) = post_batch(&state, 2_500, 0.9).await;
        assert_eq!(body.accepted, 5);
        state.control_tick(&mut sink).unwrap();

        assert!(state
            .recorder()
            .recent(10, Some(EventKind::SignalLost))
            .is_empty());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Voting);
        assert!(snapshot.vote_deadline.unwrap() >= MonotonicTimeNs::from_ms(607_000));
    }

    #[tokio::test]
    async fn at_adapter_13_sample_image_ref_rides_on_the_alert() {
        let provider = InMemoryMessagingProvider::new();
        let state = state_with(provider.clone());
        let samples = (0..5)
            .map(|i| SampleInput {
                timestamp_ms: Some(i * 500),
                confidence: 0.9,
                eye_metric: 0.2,
                mouth_metric: 0.1,
                image_ref: (i == 3).then(|| "frames/000123.jpg".to_string()),
            })
            .collect();
        post_samples(State(state.clone()), Json(SamplesRequest { samples })).await;
        assert!(wait_until(|| provider.sent().len() == 1).await);
        let sent = provider.sent();
        let OutboundMessage::Alert(alert) = &sent[0] else {
            panic!("expected an alert");
        };
        assert_eq!(alert.image_ref.as_deref(), Some("frames/000123.jpg"));
    }
}
