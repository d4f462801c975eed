use pill_core::history::{HistoryEntryInput, HistoryOutcome, HistorySink, SqliteHistory};
use pretty_assertions::assert_eq;
use sha2::Digest;

fn input(name: &str, outcome: HistoryOutcome, payload: &str) -> HistoryEntryInput {
    HistoryEntryInput {
        medicine_name: name.to_string(),
        outcome,
        failure_code: match outcome {
            HistoryOutcome::Completed => None,
            HistoryOutcome::Failed => Some("RAG_MALFORMED_RESPONSE".to_string()),
        },
        payload_json: payload.to_string(),
        prescription_json: None,
        created_at: "2026-02-10T00:00:00Z".to_string(),
    }
}

#[test]
fn appends_are_listed_newest_first_with_payload_hash() {
    let history = SqliteHistory::open_in_memory().expect("open");
    let payload = r#"{"condition":"headache","instructions":null,"sideEffects":[]}"#;

    let a = history
        .append(input("Aspirin", HistoryOutcome::Completed, payload))
        .expect("append a");
    let b = history
        .append(input("Ibuprofen", HistoryOutcome::Failed, "{}"))
        .expect("append b");
    assert!(b.id > a.id);

    let expected = hex::encode(sha2::Sha256::digest(payload.as_bytes()));
    assert_eq!(a.payload_sha256, expected);

    let recent = history.list_recent(10).expect("list");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].medicine_name, "Ibuprofen");
    assert_eq!(recent[0].outcome, HistoryOutcome::Failed);
    assert_eq!(recent[0].failure_code.as_deref(), Some("RAG_MALFORMED_RESPONSE"));
    assert_eq!(recent[1], a);

    assert_eq!(history.list_recent(1).expect("list").len(), 1);
}

#[test]
fn blank_names_are_rejected_and_not_inserted() {
    let history = SqliteHistory::open_in_memory().expect("open");
    let err = history
        .append(input("  ", HistoryOutcome::Completed, "{}"))
        .expect_err("should reject");
    assert_eq!(err.code, "HISTORY_INVALID");
    assert!(history.list_recent(10).expect("list").is_empty());
}

#[test]
fn history_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("history.sqlite");
    {
        let history = SqliteHistory::open(&path).expect("open");
        history
            .append(input("Aspirin", HistoryOutcome::Completed, "{}"))
            .expect("append");
    }
    let history = SqliteHistory::open(&path).expect("reopen");
    let recent = history.list_recent(10).expect("list");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].medicine_name, "Aspirin");
}
