#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use wakewatch_engines::token::SequenceTokenSource;
use wakewatch_kernel_contracts::ph1alert::{AlertPayload, WakeNotice};
use wakewatch_kernel_contracts::ph1dwell::DrowsinessSample;
use wakewatch_kernel_contracts::ph1grant::ActuatorCommand;
use wakewatch_kernel_contracts::ph1j::{EventRecord, SessionReport};
use wakewatch_kernel_contracts::ph1vote::{ParticipantId, ProposalId};
use wakewatch_kernel_contracts::MonotonicTimeNs;
use wakewatch_os::actuator::{ActuatorSink, RecordingActuatorSink};
use wakewatch_os::ph1sess::{ClaimOutcome, Ph1SessConfig, Ph1SessDirective, Ph1SessRuntime};
use wakewatch_storage::recorder::EventRecorder;

const USAGE: &str = "usage: wakewatch_replay <script.jsonl> [--tick-ms N] [--settle-ms N] [--export PATH]";

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ScriptStep {
    at_ms: u64,
    #[serde(flatten)]
    op: ScriptOp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptOp {
    Sample {
        confidence: f32,
        #[serde(default)]
        eye_metric: f32,
        #[serde(default)]
        mouth_metric: f32,
        #[serde(default)]
        image_ref: Option<String>,
    },
    Propose {
        author_id: String,
        text: String,
    },
    Vote {
        voter_id: String,
        proposal_id: u32,
    },
    ForceClose,
    Claim {
        participant_id: String,
    },
    /// Uses the token this participant claimed earlier in the script.
    Command {
        participant_id: String,
        command: ActuatorCommand,
    },
    Release {
        participant_id: String,
    },
}

impl ScriptOp {
    fn as_str(&self) -> &'static str {
        match self {
            ScriptOp::Sample { .. } => "sample",
            ScriptOp::Propose { .. } => "propose",
            ScriptOp::Vote { .. } => "vote",
            ScriptOp::ForceClose => "force_close",
            ScriptOp::Claim { .. } => "claim",
            ScriptOp::Command { .. } => "command",
            ScriptOp::Release { .. } => "release",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReplayOptions {
    tick_ms: u64,
    settle_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            settle_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct StepOutcome {
    at_ms: u64,
    op: &'static str,
    result: String,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    steps: Vec<StepOutcome>,
    alerts: Vec<AlertPayload>,
    wake_notices: Vec<WakeNotice>,
    fire_pulses: usize,
    events: Vec<EventRecord>,
    report: SessionReport,
}

struct Replay {
    runtime: Ph1SessRuntime,
    sink: RecordingActuatorSink,
    tokens: BTreeMap<String, String>,
    alerts: Vec<AlertPayload>,
    wake_notices: Vec<WakeNotice>,
    next_tick_ms: u64,
    tick_ms: u64,
}

impl Replay {
    fn new(config: Ph1SessConfig, recorder: EventRecorder, tick_ms: u64) -> anyhow::Result<Self> {
        let runtime = Ph1SessRuntime::new(
            config,
            recorder,
            Box::new(SequenceTokenSource::new()),
            MonotonicTimeNs(0),
        )?;
        Ok(Self {
            runtime,
            sink: RecordingActuatorSink::new(),
            tokens: BTreeMap::new(),
            alerts: Vec::new(),
            wake_notices: Vec::new(),
            next_tick_ms: 0,
            tick_ms: tick_ms.max(1),
        })
    }

    fn apply(&mut self, directives: Vec<Ph1SessDirective>) -> anyhow::Result<()> {
        for directive in directives {
            match directive {
                Ph1SessDirective::SendAlert(alert) => self.alerts.push(alert),
                Ph1SessDirective::SendWake(notice) => self.wake_notices.push(notice),
                Ph1SessDirective::Actuate(a) => self.sink.apply(&a)?,
            }
        }
        Ok(())
    }

    /// Ticks up to and including `target_ms`.
    fn advance_to(&mut self, target_ms: u64) -> anyhow::Result<()> {
        while self.next_tick_ms <= target_ms {
            let out = self.runtime.tick(MonotonicTimeNs::from_ms(self.next_tick_ms));
            self.apply(out)?;
            self.next_tick_ms += self.tick_ms;
        }
        Ok(())
    }

    fn participant(raw: &str) -> anyhow::Result<ParticipantId> {
        ParticipantId::new(raw).with_context(|| format!("invalid participant id '{raw}'"))
    }

    fn step(&mut self, step: &ScriptStep) -> anyhow::Result<String> {
        let now = MonotonicTimeNs::from_ms(step.at_ms);
        let result = match &step.op {
            ScriptOp::Sample {
                confidence,
                eye_metric,
                mouth_metric,
                image_ref,
            } => {
                if let Some(image_ref) = image_ref {
                    self.runtime.note_snapshot(image_ref);
                }
                let sample = DrowsinessSample::v1(now, *confidence, *eye_metric, *mouth_metric)
                    .context("invalid sample")?;
                match self.runtime.on_sample(&sample) {
                    Ok(out) => {
                        self.apply(out)?;
                        "ok".to_string()
                    }
                    Err(reject) => format!("rejected:{reject:?}"),
                }
            }
            ScriptOp::Propose { author_id, text } => {
                let author = Self::participant(author_id)?;
                match self.runtime.propose(author, text, now) {
                    Ok(ProposalId(id)) => format!("proposal:{id}"),
                    Err(reject) => format!("rejected:{}", reject.as_str()),
                }
            }
            ScriptOp::Vote {
                voter_id,
                proposal_id,
            } => {
                let voter = Self::participant(voter_id)?;
                match self.runtime.vote(voter, ProposalId(*proposal_id), now) {
                    Ok(()) => "ok".to_string(),
                    Err(reject) => format!("rejected:{}", reject.as_str()),
                }
            }
            ScriptOp::ForceClose => {
                if self.runtime.force_close_vote(now) {
                    "ok".to_string()
                } else {
                    "rejected:NO_OPEN_VOTE".to_string()
                }
            }
            ScriptOp::Claim { participant_id } => {
                let participant = Self::participant(participant_id)?;
                match self.runtime.claim(&participant, now) {
                    Ok(ClaimOutcome::Control { token, .. }) => {
                        self.tokens
                            .insert(participant_id.clone(), token.expose().to_string());
                        "control".to_string()
                    }
                    Ok(ClaimOutcome::Monitor { .. }) => "monitor".to_string(),
                    Err(reject) => format!("rejected:{}", reject.as_str()),
                }
            }
            ScriptOp::Command {
                participant_id,
                command,
            } => {
                let token = self.tokens.get(participant_id).cloned().unwrap_or_default();
                match self.runtime.command(&token, *command, now) {
                    Ok(_) => "ok".to_string(),
                    Err(reject) => format!("rejected:{}", reject.as_str()),
                }
            }
            ScriptOp::Release { participant_id } => {
                let token = self.tokens.get(participant_id).cloned().unwrap_or_default();
                match self.runtime.release(&token, now) {
                    Ok(()) => "ok".to_string(),
                    Err(reject) => format!("rejected:{}", reject.as_str()),
                }
            }
        };
        Ok(result)
    }
}

fn parse_script(script: &str) -> anyhow::Result<Vec<ScriptStep>> {
    let mut steps: Vec<ScriptStep> = Vec::new();
    for (line_no, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(line)
            .with_context(|| format!("script line {}", line_no + 1))?;
        if let Some(prev) = steps.last() {
            if step.at_ms < prev.at_ms {
                bail!(
                    "script line {}: at_ms {} goes back in time (previous {})",
                    line_no + 1,
                    step.at_ms,
                    prev.at_ms
                );
            }
        }
        steps.push(step);
    }
    Ok(steps)
}

fn replay(
    steps: &[ScriptStep],
    config: Ph1SessConfig,
    options: ReplayOptions,
    recorder: EventRecorder,
) -> anyhow::Result<ReplayOutput> {
    let mut replay = Replay::new(config, recorder.clone(), options.tick_ms)?;
    let mut outcomes = Vec::with_capacity(steps.len());
    for step in steps {
        // Ticks strictly before the step run first; the step's own instant ticks after it.
        if step.at_ms > 0 {
            replay.advance_to(step.at_ms - 1)?;
        }
        let result = replay.step(step)?;
        replay.advance_to(step.at_ms)?;
        outcomes.push(StepOutcome {
            at_ms: step.at_ms,
            op: step.op.as_str(),
            result,
        });
    }
    let end_ms = steps.last().map_or(0, |s| s.at_ms) + options.settle_ms;
    replay.advance_to(end_ms)?;
    Ok(ReplayOutput {
        steps: outcomes,
        alerts: replay.alerts,
        wake_notices: replay.wake_notices,
        fire_pulses: replay.sink.fire_pulses(),
        events: recorder.events(),
        report: recorder.report(),
    })
}

fn parse_u64_flag(value: Option<&String>, flag: &str) -> anyhow::Result<u64> {
    value
        .with_context(|| format!("{flag} needs a value\n{USAGE}"))?
        .parse()
        .with_context(|| format!("{flag} must be a whole number of milliseconds"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wakewatch=warn")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(script_path) = args.first() else {
        bail!(USAGE);
    };
    let mut options = ReplayOptions::default();
    let mut export: Option<PathBuf> = None;
    let mut rest = args.iter().skip(1);
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--tick-ms" => options.tick_ms = parse_u64_flag(rest.next(), flag)?,
            "--settle-ms" => options.settle_ms = parse_u64_flag(rest.next(), flag)?,
            "--export" => {
                export = Some(PathBuf::from(
                    rest.next().with_context(|| format!("--export needs a path\n{USAGE}"))?,
                ))
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }

    let script = fs::read_to_string(script_path)
        .with_context(|| format!("reading script '{script_path}'"))?;
    let steps = parse_script(&script)?;
    let recorder = EventRecorder::in_memory();
    let output = replay(&steps, Ph1SessConfig::mvp_v1(), options, recorder.clone())?;
    if let Some(path) = export {
        recorder
            .export_json(&path)
            .with_context(|| format!("exporting to '{}'", path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
