use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

lazy_static! {
    pub static ref JOBS_COMPLETED: IntCounter = register_int_counter!(
        "ioc_indexer_jobs_completed",
        "number of jobs that reached the completed state",
    )
    .unwrap();
    pub static ref JOBS_FAILED: IntCounterVec = register_int_counter_vec!(
        "ioc_indexer_jobs_failed",
        "number of jobs that reached the failed state, by error class",
        &["class"],
    )
    .unwrap();
    pub static ref DUPLICATES_SKIPPED: IntCounterVec = register_int_counter_vec!(
        "ioc_indexer_duplicates_skipped",
        "number of artifacts deduplicated, by stage (pre-download or post-download)",
        &["stage"],
    )
    .unwrap();
    pub static ref DOWNLOAD_RETRIES: IntCounter = register_int_counter!(
        "ioc_indexer_download_retries",
        "number of download attempts that were retried after a transient failure",
    )
    .unwrap();
    pub static ref INDICATORS_FOUND: IntCounterVec = register_int_counter_vec!(
        "ioc_indexer_indicators_found",
        "number of indicators mined from archive members, by type",
        &["indicator_type"],
    )
    .unwrap();
    pub static ref EXTRACT_ABORTS: IntCounterVec = register_int_counter_vec!(
        "ioc_indexer_extract_aborts",
        "number of archive extractions aborted by a safety guard, by reason",
        &["reason"],
    )
    .unwrap();
    pub static ref SCAN_LINES_TRUNCATED: IntCounter = register_int_counter!(
        "ioc_indexer_scan_lines_truncated",
        "number of scanned lines cut at the line-length cap",
    )
    .unwrap();
}
