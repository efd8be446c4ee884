use chrono::{Duration, TimeZone, Utc};
use tempfile::tempdir;

use quake_elt::config::DatabaseConfig;
use quake_elt::models::{LoadStatus, NewLoadAttempt};
use quake_elt::Database;

#[test]
fn test_database_creation_and_initialization() {
    let dir = tempdir().expect("Failed to create temp directory");
    let db_url = format!("sqlite://{}", dir.path().join("nested/quakes.db").display());

    let db = Database::new(&db_url).expect("Failed to create database");
    let _conn = db.get_connection().expect("Failed to get database connection");

    assert!(dir.path().join("nested/quakes.db").exists());
    let counts = db.counts().expect("Failed to count rows");
    assert_eq!(counts.raw_events, 0);
    assert_eq!(counts.load_attempts, 0);
    assert_eq!(counts.analytics_records, 0);
}

#[test]
fn test_reopen_keeps_data() {
    let dir = tempdir().expect("Failed to create temp directory");
    let config = DatabaseConfig {
        path: dir.path().join("quakes.db").display().to_string(),
        max_connections: 2,
        connection_timeout_secs: 5,
    };

    let db = Database::from_config(&config).expect("Failed to create database");
    db.append_load_attempt(&NewLoadAttempt {
        load_date: Utc::now(),
        records_loaded: 7,
        status: LoadStatus::Success,
        error_message: None,
    })
    .expect("Failed to append ledger row");
    drop(db);

    // Migrations are idempotent
    let db = Database::from_config(&config).expect("Failed to reopen database");
    let attempts = db.load_attempts().expect("Failed to read ledger");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].records_loaded, 7);
}

#[test]
fn test_ledger_ordering() {
    let dir = tempdir().expect("Failed to create temp directory");
    let db = Database::new(dir.path().join("quakes.db").to_str().expect("utf-8 path"))
        .expect("Failed to create database");

    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    for i in 0..5 {
        let failed = i == 3;
        db.append_load_attempt(&NewLoadAttempt {
            load_date: base + Duration::hours(i),
            records_loaded: if failed { 0 } else { i as u64 },
            status: if failed { LoadStatus::Failed } else { LoadStatus::Success },
            error_message: failed.then(|| "database is locked".to_string()),
        })
        .expect("Failed to append ledger row");
    }

    let all = db.load_attempts().expect("Failed to read ledger");
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert_eq!(all[0].load_date, base);

    let recent = db.recent_load_attempts(2).expect("Failed to read ledger");
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].records_loaded, 4);
    assert_eq!(recent[1].status, LoadStatus::Failed);
    assert_eq!(recent[1].error_message.as_deref(), Some("database is locked"));
}

#[test]
fn test_missing_rows_are_none() {
    let dir = tempdir().expect("Failed to create temp directory");
    let db = Database::new(dir.path().join("quakes.db").to_str().expect("utf-8 path"))
        .expect("Failed to create database");

    assert!(db.get_raw_event("nope").expect("query failed").is_none());
    assert!(db.get_analytics_record("nope").expect("query failed").is_none());
}
