#![allow(dead_code)]

use tempfile::TempDir;

use quake_elt::{Database, ExtractedEvent};

/// Fresh database in its own temp directory; keep the directory alive for the test.
pub fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("quakes.db");
    let db = Database::new(path.to_str().expect("utf-8 path")).expect("Failed to create database");
    (dir, db)
}

/// GeoJSON feature text shaped like the USGS feed
pub fn feature_json(id: &str, mag: f64, depth_km: f64, place: &str, time_ms: i64) -> String {
    format!(
        r#"{{"type":"Feature","properties":{{"mag":{mag},"place":"{place}","time":{time_ms},"updated":{time_ms},"magType":"ml","type":"earthquake"}},"geometry":{{"type":"Point","coordinates":[-117.6,35.7,{depth_km}]}},"id":"{id}"}}"#
    )
}

pub fn feature(id: &str, mag: f64, depth_km: f64, place: &str) -> ExtractedEvent {
    // 2024-01-01T00:00:00Z
    ExtractedEvent::from_json(&feature_json(id, mag, depth_km, place, 1_704_067_200_000))
        .expect("valid feature")
}

pub fn simple(id: &str) -> ExtractedEvent {
    feature(id, 3.2, 10.0, "12 km NE of Ridgecrest, CA")
}
