//! The tracker writing through the SQLite store.

use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use dwell_core::{ManualSource, Tracker, TrackerConfig, TrackerDeps};
use dwell_db::{Database, SqliteStore};

#[tokio::test]
async fn entry_survives_deletion_of_its_rule_project() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dwell.db");

    let db = Database::open(&path).unwrap();
    let acme = db.add_project("Acme").unwrap();
    db.add_rule("vscode", acme.id).unwrap();

    let store = std::sync::Arc::new(SqliteStore::new(db));
    let source = ManualSource::new();
    let deps = TrackerDeps::new(Box::new(source.clone()), store.clone(), store);
    let mut tracker = Tracker::new(deps, TrackerConfig::default());
    tracker.start().unwrap();

    let opened_at = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
    assert!(source.window_changed("main.rs", "vscode", opened_at).await);
    let snapshot = tracker.snapshot().await.unwrap();
    assert_eq!(snapshot.open_entry.unwrap().project_id, Some(acme.id));

    // Deleted from another connection while the entry is still open.
    let other = Connection::open(&path).unwrap();
    other
        .execute_batch("PRAGMA foreign_keys = ON; DELETE FROM projects WHERE name = 'Acme';")
        .unwrap();

    tracker.stop().await.unwrap();

    let db = Database::open(&path).unwrap();
    assert_eq!(db.entry_count().unwrap(), 1);
    let stored = db.last_entry().unwrap().unwrap();
    assert_eq!(stored.window_title, "main.rs");
    assert_eq!(stored.start_time, opened_at);
    assert!(stored.project_id.is_none());
}
