use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::pipeline::Stage;

/// Metric names emitted through the `metrics` facade
pub mod names {
    pub const RUNS_TOTAL: &str = "quake_elt_runs_total";
    pub const RUN_ATTEMPTS_TOTAL: &str = "quake_elt_run_attempts_total";
    pub const STAGE_DURATION: &str = "quake_elt_stage_duration_seconds";
    pub const STAGE_FAILURES_TOTAL: &str = "quake_elt_stage_failures_total";
    pub const EVENTS_EXTRACTED_TOTAL: &str = "quake_elt_events_extracted_total";
    pub const RECORDS_LOADED_TOTAL: &str = "quake_elt_records_loaded_total";
    pub const DUPLICATES_SKIPPED_TOTAL: &str = "quake_elt_duplicates_skipped_total";
    pub const RECORDS_TRANSFORMED_TOTAL: &str = "quake_elt_records_transformed_total";
    pub const LAST_BATCH_SIZE: &str = "quake_elt_last_batch_size";
}

/// Metrics collection and management
///
/// Every call is forwarded to the global `metrics` recorder (a no-op unless the
/// host installs one) and also tallied locally so a run can report its totals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsCollector {
    pub runs_total: u64,
    pub runs_failed: u64,
    pub run_attempts_total: u64,
    pub events_extracted_total: u64,
    pub records_loaded_total: u64,
    pub duplicates_skipped_total: u64,
    pub records_transformed_total: u64,
    pub stage_failures_total: u64,
}

impl MetricsCollector {
    /// Record how long a stage took and whether it succeeded
    pub fn record_stage(&mut self, stage: Stage, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        histogram!(names::STAGE_DURATION, "stage" => stage.as_str(), "status" => status)
            .record(duration.as_secs_f64());

        if !success {
            self.stage_failures_total += 1;
            counter!(names::STAGE_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
        }
    }

    /// Record an extracted batch
    pub fn record_extract(&mut self, count: usize) {
        let count = count as u64;
        self.events_extracted_total += count;
        counter!(names::EVENTS_EXTRACTED_TOTAL).increment(count);
        gauge!(names::LAST_BATCH_SIZE).set(count as f64);
    }

    /// Record a committed load
    pub fn record_load(&mut self, loaded: u64, duplicates: u64) {
        self.records_loaded_total += loaded;
        self.duplicates_skipped_total += duplicates;
        counter!(names::RECORDS_LOADED_TOTAL).increment(loaded);
        counter!(names::DUPLICATES_SKIPPED_TOTAL).increment(duplicates);
    }

    /// Record a committed transform
    pub fn record_transform(&mut self, scanned: u64) {
        self.records_transformed_total += scanned;
        counter!(names::RECORDS_TRANSFORMED_TOTAL).increment(scanned);
    }

    /// Record one attempt of a run
    pub fn record_attempt(&mut self) {
        self.run_attempts_total += 1;
        counter!(names::RUN_ATTEMPTS_TOTAL).increment(1);
    }

    /// Record the final result of a run
    pub fn record_run(&mut self, success: bool) {
        self.runs_total += 1;
        if !success {
            self.runs_failed += 1;
        }
        let status = if success { "success" } else { "failed" };
        counter!(names::RUNS_TOTAL, "status" => status).increment(1);
    }
}
