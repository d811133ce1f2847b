#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use wakewatch_kernel_contracts::ph1j::{EventKind, EventPayload, EventRecordInput};
use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::MonotonicTimeNs;
use wakewatch_storage::persist::{JournalPersistence, JsonlJournalFile};
use wakewatch_storage::ph1j::{Ph1jJournal, StorageError};
use wakewatch_storage::recorder::EventRecorder;
use wakewatch_storage::repo::Ph1jEventRepo;

fn scratch_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir()
        .join(format!("wakewatch_dbw_j_{}_{nanos}", std::process::id()))
        .join(name)
}

fn input(ms: u64, session: u64, kind: EventKind) -> EventRecordInput {
    EventRecordInput::v1(
        MonotonicTimeNs::from_ms(ms),
        Some(SessionId(session)),
        kind,
        EventPayload::empty().with("phase_to", "voting"),
    )
}

#[test]
fn at_j_db_01_session_isolation_enforced() {
    let mut j = Ph1jJournal::new_in_memory();
    j.append_event_row(input(10, 1, EventKind::VoteOpened)).unwrap();
    j.append_event_row(input(11, 2, EventKind::VoteOpened)).unwrap();
    j.append_event_row(input(12, 2, EventKind::BallotCast)).unwrap();

    assert_eq!(j.event_rows_by_session(SessionId(1)).len(), 1);
    assert_eq!(j.event_rows_by_session(SessionId(2)).len(), 2);
    assert_eq!(j.event_rows_by_kind(EventKind::VoteOpened).len(), 2);
}

#[test]
fn at_j_db_02_append_only_enforced() {
    let mut j = Ph1jJournal::new_in_memory();
    let id = j.append_event_row(input(20, 1, EventKind::AlertSent)).unwrap();
    assert!(matches!(
        j.attempt_overwrite_event(id),
        Err(StorageError::AppendOnlyViolation { .. })
    ));
    assert_eq!(j.event_rows().len(), 1);
}

#[test]
fn at_j_db_03_ids_follow_arrival_order() {
    let mut j = Ph1jJournal::new_in_memory();
    // Arrival order wins over timestamps.
    let a = j.append_event_row(input(50, 1, EventKind::BallotCast)).unwrap();
    let b = j.append_event_row(input(40, 1, EventKind::BallotCast)).unwrap();
    assert!(a < b);
    assert_eq!(j.event_rows()[0].event_id, a);
}

#[test]
fn at_j_db_04_invalid_payload_is_refused_by_repo_but_kept_by_recorder() {
    let bad = EventRecordInput::v1(
        MonotonicTimeNs(1),
        None,
        EventKind::ControlCommand,
        EventPayload::empty().with("Bad-Key", "x"),
    );
    let mut j = Ph1jJournal::new_in_memory();
    assert!(matches!(
        j.append_event_row(bad.clone()),
        Err(StorageError::ContractViolation(_))
    ));

    let r = EventRecorder::in_memory();
    r.append(bad);
    let rows = r.events();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload.get("payload_rejected"), Some("true"));
}

#[test]
fn at_j_db_05_jsonl_file_reloads_identical_rows() {
    let path = scratch_path("journal.jsonl");
    let file = JsonlJournalFile::new(&path);
    let mut j = Ph1jJournal::new_in_memory();
    for (ms, kind) in [
        (1, EventKind::DrowsinessStart),
        (2, EventKind::AlertSent),
        (3, EventKind::VoteOpened),
    ] {
        let id = j.append_event_row(input(ms, 7, kind)).unwrap();
        let row = j.event(id).unwrap().clone();
        file.persist(&row).unwrap();
    }
    let reloaded = file.load().unwrap();
    assert_eq!(reloaded, j.event_rows().to_vec());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn at_j_db_06_export_contains_statistics_events_and_report() {
    let path = scratch_path("export.json");
    let r = EventRecorder::in_memory();
    r.append(input(0, 1, EventKind::DrowsinessStart));
    r.append(input(15_000, 1, EventKind::WakeUp));
    r.export_json(&path).unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["statistics"]["total_wake_ups"], 1);
    assert_eq!(doc["events"].as_array().unwrap().len(), 2);
    assert_eq!(doc["events"][1]["kind"], "wake_up");
    assert!(doc["report"]["recommendations"].is_array());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
