#![forbid(unsafe_code)]

use wakewatch_kernel_contracts::ph1j::{
    EventId, EventKind, EventPayload, EventRecord, EventRecordInput,
};
use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
}

/// PH1.J event journal: the in-memory, append-only `session_events` ledger.
///
/// Ids are assigned in arrival order starting at 1 and never reused.
#[derive(Debug, Default, Clone)]
pub struct Ph1jJournal {
    events: Vec<EventRecord>,
    next_event_id: u64,
}

impl Ph1jJournal {
    pub fn new_in_memory() -> Self {
        Self {
            events: Vec::new(),
            next_event_id: 1,
        }
    }

    pub fn append_event(&mut self, input: EventRecordInput) -> Result<EventId, StorageError> {
        input.payload.validate()?;
        Ok(self.push(input).event_id)
    }

    /// Like `append_event`, but an invalid payload is replaced by a
    /// `payload_rejected` marker instead of refusing the row.
    pub fn append_event_lossy(&mut self, mut input: EventRecordInput) -> &EventRecord {
        if input.payload.validate().is_err() {
            input.payload = EventPayload::empty().with("payload_rejected", "true");
        }
        self.push(input)
    }

    fn push(&mut self, input: EventRecordInput) -> &EventRecord {
        let event_id = EventId(self.next_event_id.max(1));
        self.next_event_id = event_id.0.saturating_add(1);
        self.events.push(EventRecord::from_input(event_id, input));
        &self.events[self.events.len() - 1]
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn event(&self, event_id: EventId) -> Option<&EventRecord> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    pub fn attempt_overwrite_event(&mut self, _event_id: EventId) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "session_events",
        })
    }

    pub fn events_by_kind(&self, kind: EventKind) -> Vec<&EventRecord> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn events_by_session(&self, session_id: SessionId) -> Vec<&EventRecord> {
        self.events
            .iter()
            .filter(|e| e.session_id == Some(session_id))
            .collect()
    }

    /// The newest `limit` records, optionally of one kind, oldest first.
    pub fn recent(&self, limit: usize, kind: Option<EventKind>) -> Vec<&EventRecord> {
        let mut out: Vec<&EventRecord> = self
            .events
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .collect();
        out.reverse();
        out
    }
}
