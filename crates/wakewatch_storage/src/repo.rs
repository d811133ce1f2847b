#![forbid(unsafe_code)]

use wakewatch_kernel_contracts::ph1j::{EventId, EventKind, EventRecord, EventRecordInput};
use wakewatch_kernel_contracts::ph1sess::SessionId;

use crate::ph1j::{Ph1jJournal, StorageError};

/// Typed repository interface for PH1.J journal wiring.
pub trait Ph1jEventRepo {
    fn append_event_row(&mut self, input: EventRecordInput) -> Result<EventId, StorageError>;
    fn event_rows(&self) -> &[EventRecord];
    fn event_rows_by_kind(&self, kind: EventKind) -> Vec<&EventRecord>;
    fn event_rows_by_session(&self, session_id: SessionId) -> Vec<&EventRecord>;
}

impl Ph1jEventRepo for Ph1jJournal {
    fn append_event_row(&mut self, input: EventRecordInput) -> Result<EventId, StorageError> {
        self.append_event(input)
    }

    fn event_rows(&self) -> &[EventRecord] {
        self.events()
    }

    fn event_rows_by_kind(&self, kind: EventKind) -> Vec<&EventRecord> {
        self.events_by_kind(kind)
    }

    fn event_rows_by_session(&self, session_id: SessionId) -> Vec<&EventRecord> {
        self.events_by_session(session_id)
    }
}
