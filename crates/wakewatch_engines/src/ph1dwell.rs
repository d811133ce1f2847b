#![forbid(unsafe_code)]

use wakewatch_kernel_contracts::ph1dwell::{
    DrowsinessSample, DrowsyState, DwellEvent, DwellTransition, SampleReject,
};
use wakewatch_kernel_contracts::MonotonicTimeNs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ph1DwellConfig {
    /// A sample is a drowsy candidate when its confidence is strictly above this.
    pub drowsy_threshold: f32,
    pub drowsy_dwell_ms: u64,
    pub awake_dwell_ms: u64,
    pub stall_timeout_ms: u64,
}

impl Ph1DwellConfig {
    pub fn mvp_v1() -> Self {
        Self {
            drowsy_threshold: 0.5,
            drowsy_dwell_ms: 15_000,
            awake_dwell_ms: 15_000,
            stall_timeout_ms: 5_000,
        }
    }

    fn dwell_for(&self, target: DrowsyState) -> u64 {
        match target {
            DrowsyState::Drowsy => self.drowsy_dwell_ms,
            DrowsyState::Awake => self.awake_dwell_ms,
        }
    }
}

/// Signal debouncer. Turns per-frame confidence into confirmed Awake/Drowsy
/// transitions once a candidate state has held for its dwell duration.
#[derive(Debug, Clone)]
pub struct Ph1DwellRuntime {
    config: Ph1DwellConfig,
    confirmed: DrowsyState,
    candidate_since: Option<MonotonicTimeNs>,
    last_sample_at: Option<MonotonicTimeNs>,
    last_confidence: Option<f32>,
    signal_lost: bool,
}

impl Ph1DwellRuntime {
    pub fn new(config: Ph1DwellConfig) -> Self {
        Self {
            config,
            confirmed: DrowsyState::Awake,
            candidate_since: None,
            last_sample_at: None,
            last_confidence: None,
            signal_lost: false,
        }
    }

    pub fn config(&self) -> &Ph1DwellConfig {
        &self.config
    }

    pub fn confirmed(&self) -> DrowsyState {
        self.confirmed
    }

    pub fn last_confidence(&self) -> Option<f32> {
        self.last_confidence
    }

    pub fn signal_lost(&self) -> bool {
        self.signal_lost
    }

    pub fn candidate_since(&self) -> Option<MonotonicTimeNs> {
        self.candidate_since
    }

    /// Feed one sample. Events come back in the order they happened: a gap
    /// longer than the stall timeout yields `SignalLost` before `SignalRestored`,
    /// and a confirmed transition always comes last.
    pub fn observe(&mut self, sample: &DrowsinessSample) -> Result<Vec<DwellEvent>, SampleReject> {
        let at = sample.timestamp;
        let mut events = Vec::new();
        if let Some(last) = self.last_sample_at {
            if at < last {
                return Err(SampleReject::OutOfOrder {
                    last_seen: last,
                    got: at,
                });
            }
            if !self.signal_lost {
                if let Some(lost) = self.check_stall(at) {
                    events.push(lost);
                }
            }
            if self.signal_lost {
                self.signal_lost = false;
                events.push(DwellEvent::SignalRestored {
                    at,
                    silence_ms: at.ms_since(last),
                });
            }
        }
        self.last_sample_at = Some(at);
        self.last_confidence = Some(sample.confidence);

        let candidate = if sample.confidence > self.config.drowsy_threshold {
            DrowsyState::Drowsy
        } else {
            DrowsyState::Awake
        };
        if candidate == self.confirmed {
            self.candidate_since = None;
            return Ok(events);
        }

        let since = *self.candidate_since.get_or_insert(at);
        let held_ms = at.ms_since(since);
        if held_ms >= self.config.dwell_for(candidate) {
            let from = self.confirmed;
            self.confirmed = candidate;
            self.candidate_since = None;
            events.push(DwellEvent::Confirmed(DwellTransition {
                from,
                to: candidate,
                confirmed_at: at,
                dwell_ms: held_ms,
                confidence: sample.confidence,
            }));
        }
        Ok(events)
    }

    /// Flags source silence once. The confirmed state is held and the running
    /// dwell clock is dropped, so silence never counts towards a transition.
    pub fn check_stall(&mut self, now: MonotonicTimeNs) -> Option<DwellEvent> {
        if self.signal_lost {
            return None;
        }
        let last = self.last_sample_at?;
        let silence_ms = now.ms_since(last);
        if silence_ms < self.config.stall_timeout_ms {
            return None;
        }
        self.signal_lost = true;
        self.candidate_since = None;
        Some(DwellEvent::SignalLost {
            last_sample_at: last,
            silence_ms,
        })
    }
}
