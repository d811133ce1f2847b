#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use wakewatch_kernel_contracts::ph1j::{
    EventId, EventKind, EventPayload, EventRecord, EventRecordInput, SessionReport, Statistics,
};
use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::MonotonicTimeNs;

use crate::persist::PersistError;
use crate::ph1j::Ph1jJournal;

pub const REPORT_RECENT_EVENTS: usize = 10;

/// Receives each record after it is appended. Must not block.
pub trait RecordForwarder: Send + Sync {
    fn forward(&self, record: &EventRecord);
}

/// Shared handle onto the journal. Appending never fails the caller; durable
/// writes are handed to the forwarder and happen elsewhere.
#[derive(Clone, Default)]
pub struct EventRecorder {
    journal: Arc<Mutex<Ph1jJournal>>,
    forwarder: Option<Arc<dyn RecordForwarder>>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("events", &self.lock().events().len())
            .field("forwarding", &self.forwarder.is_some())
            .finish()
    }
}

impl EventRecorder {
    pub fn in_memory() -> Self {
        Self {
            journal: Arc::new(Mutex::new(Ph1jJournal::new_in_memory())),
            forwarder: None,
        }
    }

    pub fn with_forwarder(forwarder: Arc<dyn RecordForwarder>) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Ph1jJournal::new_in_memory())),
            forwarder: Some(forwarder),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ph1jJournal> {
        // A panic elsewhere must not take the journal down with it.
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, input: EventRecordInput) -> EventId {
        let record = self.append_local(input);
        if let Some(forwarder) = &self.forwarder {
            forwarder.forward(&record);
        }
        record.event_id
    }

    pub fn record(
        &self,
        at: MonotonicTimeNs,
        session_id: Option<SessionId>,
        kind: EventKind,
        payload: EventPayload,
    ) -> EventId {
        self.append(EventRecordInput::v1(at, session_id, kind, payload))
    }

    /// Kept in memory only so a failing disk cannot feed itself.
    pub fn record_persistence_failure(
        &self,
        at: MonotonicTimeNs,
        failed_event: EventId,
        error: &str,
    ) -> EventId {
        self.append_local(EventRecordInput::v1(
            at,
            None,
            EventKind::PersistenceFailed,
            EventPayload::empty()
                .with("event_id", failed_event.0)
                .with("error", error),
        ))
        .event_id
    }

    fn append_local(&self, input: EventRecordInput) -> EventRecord {
        self.lock().append_event_lossy(input).clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().events().to_vec()
    }

    pub fn recent(&self, limit: usize, kind: Option<EventKind>) -> Vec<EventRecord> {
        self.lock().recent(limit, kind).into_iter().cloned().collect()
    }

    pub fn summarize(&self) -> Statistics {
        summarize(self.lock().events())
    }

    pub fn report(&self) -> SessionReport {
        let journal = self.lock();
        let statistics = summarize(journal.events());
        SessionReport {
            statistics,
            recent_events: journal
                .recent(REPORT_RECENT_EVENTS, None)
                .into_iter()
                .cloned()
                .collect(),
            recommendations: recommendations(&statistics),
        }
    }

    pub fn export_json(&self, path: &Path) -> Result<(), PersistError> {
        let (events, report) = {
            let journal = self.lock();
            let events = journal.events().to_vec();
            let statistics = summarize(&events);
            let report = SessionReport {
                statistics,
                recent_events: journal
                    .recent(REPORT_RECENT_EVENTS, None)
                    .into_iter()
                    .cloned()
                    .collect(),
                recommendations: recommendations(&statistics),
            };
            (events, report)
        };
        let export = ExportDocument {
            statistics: &report.statistics,
            events: &events,
            report: &report,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, &export)?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    statistics: &'a Statistics,
    events: &'a [EventRecord],
    report: &'a SessionReport,
}

/// Pure function of the log. Each `wake_up` closes the oldest open
/// `drowsiness_start`; the pair's span is one drowsy episode.
pub fn summarize(events: &[EventRecord]) -> Statistics {
    let mut stats = Statistics::default();
    let mut open_start: Option<MonotonicTimeNs> = None;
    let mut drowsy_total_ms: u64 = 0;
    let mut episodes: u64 = 0;
    for e in events {
        match e.kind {
            EventKind::DrowsinessStart => {
                stats.total_drowsy_events += 1;
                open_start.get_or_insert(e.timestamp);
            }
            EventKind::ShotFired => stats.total_shots_fired += 1,
            EventKind::WakeUp => {
                stats.total_wake_ups += 1;
                if let Some(start) = open_start.take() {
                    drowsy_total_ms += e.timestamp.ms_since(start);
                    episodes += 1;
                }
            }
            _ => {}
        }
    }
    if episodes > 0 {
        stats.avg_drowsy_duration_secs = drowsy_total_ms as f64 / episodes as f64 / 1000.0;
    }
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        stats.session_duration_secs = last.timestamp.ms_since(first.timestamp) as f64 / 1000.0;
    }
    stats
}

pub fn recommendations(stats: &Statistics) -> Vec<String> {
    let mut out = Vec::new();
    if stats.total_drowsy_events > 5 {
        out.push("Frequent drowsiness detected: rest is recommended.".to_string());
    }
    if stats.avg_drowsy_duration_secs > 10.0 {
        out.push("Long time to wake: consider adjusting detection sensitivity.".to_string());
    }
    if stats.total_shots_fired > stats.total_wake_ups.saturating_mul(3) {
        out.push("Many shots per wake-up: fire parameters look ineffective.".to_string());
    }
    if out.is_empty() {
        out.push("System operating normally.".to_string());
    }
    out
}
