use std::fs;
use std::sync::Arc;

use chrono::NaiveDate;
use milestone_core::datastore::LedgerStore;
use milestone_core::codec::HEADER;
use milestone_core::datetime::ManualClock;
use milestone_core::{LedgerOptions, LedgerService, LedgerState};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn fresh_store_to_resolved_event() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("Data").join("events.csv");
    let clock = Arc::new(ManualClock::new(date(2025, 1, 10)));
    let service = LedgerService::with_clock(LedgerOptions::new(&path), clock.clone());

    assert_eq!(service.load().expect("load"), LedgerState::NoEvent);
    assert_eq!(service.current_event_view().name, "sample");

    let state = service
        .append_next("Learn X", "chapter 1", "2025-03-01")
        .expect("append");
    assert_eq!(state, LedgerState::Pending);
    let view = service.current_event_view();
    assert_eq!(view.name, "Learn X");
    assert_eq!(view.days_remaining, 50);
    assert_eq!(view.label, "Learn X: 2025-03-01 (50 days left)");

    clock.set(date(2025, 3, 2));
    assert_eq!(service.load().expect("reload"), LedgerState::OverdueUnresolved);
    assert_eq!(service.current_event_view().days_remaining, -1);

    let state = service
        .complete_current(true, "  done early ")
        .expect("complete");
    assert_eq!(state, LedgerState::Resolved);
    let resolved = service.last_resolved().expect("resolved record");
    assert_eq!(resolved.name, "Learn X");
    assert!(resolved.done);

    let on_disk = LedgerStore::new(&path).load_all().expect("load from disk");
    let row = on_disk
        .records()
        .find(|record| record.name == "Learn X")
        .expect("row persisted");
    assert!(row.done);
    assert!(row.result);
    assert_eq!(row.feedback, "done early");

    let restarted = LedgerService::with_clock(LedgerOptions::new(&path), clock);
    assert_eq!(restarted.load().expect("load"), LedgerState::NoEvent);
    assert_eq!(restarted.records(), service.records());
}

#[test]
fn editing_rewrites_only_the_current_row() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("events.csv");
    let original = [
        "イベント名,イベント内容,完了,イベント日付,結果,感想",
        "資格試験,\"過去問, 3回分\",false,2025-02-01,false,",
        "old goal,x,true,2024-12-01,false,too ambitious",
        "next,y,false,2025-01-20,false,",
        "half a row,false",
    ];
    fs::write(&path, original.join("\n") + "\n").expect("write");

    let clock = Arc::new(ManualClock::new(date(2025, 1, 1)));
    let service = LedgerService::with_clock(LedgerOptions::new(&path), clock);
    assert_eq!(service.load().expect("load"), LedgerState::Pending);
    assert_eq!(service.malformed_count(), 1);
    assert_eq!(service.current_event().name, "next");

    service
        .edit_current("next step", "y and z", "2025-01-25")
        .expect("edit");
    assert!(service.last_error().is_none());
    assert_eq!(service.current_event().name, "next step");

    let text = fs::read_to_string(&path).expect("read");
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), original.len());
    assert_eq!(lines[0], format!("{},id", original[0]));
    assert_eq!(lines[1], original[1]);
    assert_eq!(lines[2], original[2]);
    assert!(lines[3].starts_with("next step,y and z,false,2025-01-25,false,,"));
    assert_eq!(lines[4], original[4]);
}

#[test]
fn appending_never_touches_existing_rows() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("events.csv");
    let clock = Arc::new(ManualClock::new(date(2025, 1, 1)));
    let service = LedgerService::with_clock(LedgerOptions::new(&path), clock);
    service.load().expect("load");
    service.append_next("first", "", "2025-01-05").expect("append");
    service.complete_current(false, "missed it").expect("complete");

    let before = fs::read_to_string(&path).expect("read");
    let rows_before = LedgerStore::new(&path).load_all().expect("load").row_count();

    service.append_next("second", "", "+7d").expect("append");

    let after = fs::read_to_string(&path).expect("read");
    assert!(after.starts_with(&before));
    let ledger = LedgerStore::new(&path).load_all().expect("load");
    assert_eq!(ledger.row_count(), rows_before + 1);

    let first = ledger
        .records()
        .find(|record| record.name == "first")
        .expect("first row");
    assert!(first.done);
    assert!(!first.result);
    assert_eq!(first.feedback, "missed it");

    assert_eq!(service.state(), LedgerState::Pending);
    assert_eq!(service.current_event().due_date, date(2025, 1, 8));
}

#[test]
fn row_appended_after_a_truncated_write_survives_reload() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("events.csv");
    fs::write(&path, format!("{HEADER}\nok,a,false,2025-06-01,false,\n\"Read, th")).expect("write");

    let clock = Arc::new(ManualClock::new(date(2025, 1, 1)));
    let service = LedgerService::with_clock(LedgerOptions::new(&path), clock.clone());
    assert_eq!(service.load().expect("load"), LedgerState::Pending);
    assert_eq!(service.malformed_count(), 1);

    service
        .append_next("Write, review", "chapter \"2\"", "2025-02-01")
        .expect("append");
    let in_memory = service.records();
    assert_eq!(service.current_event().name, "Write, review");

    let restarted = LedgerService::with_clock(LedgerOptions::new(&path), clock);
    assert_eq!(restarted.load().expect("reload"), LedgerState::Pending);
    assert_eq!(restarted.records(), in_memory);
    assert_eq!(restarted.malformed_count(), 1);
    let current = restarted.current_event();
    assert_eq!(current.name, "Write, review");
    assert_eq!(current.content, "chapter \"2\"");

    let text = fs::read_to_string(&path).expect("read");
    assert!(text.contains("\"Read, th\n"));
}

#[test]
fn appending_to_a_header_only_or_empty_file() {
    for initial in [format!("{HEADER}\n"), String::new()] {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("events.csv");
        fs::write(&path, &initial).expect("write");

        let clock = Arc::new(ManualClock::new(date(2025, 1, 1)));
        let service = LedgerService::with_clock(LedgerOptions::new(&path), clock);
        assert_eq!(service.load().expect("load"), LedgerState::NoEvent);
        assert!(service.records().is_empty());

        service.append_next("first", "", "2025-01-05").expect("append");
        assert_eq!(service.state(), LedgerState::Pending);

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with(&format!("{HEADER}\nfirst,,false,2025-01-05,false,,")));
        let ledger = LedgerStore::new(&path).load_all().expect("load");
        assert_eq!(ledger.row_count(), 1);
        assert_eq!(ledger.malformed_count(), 0);
    }
}
