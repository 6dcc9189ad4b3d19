//! Accounting log lines, written as `tracing` events on a dedicated target
//! so the file writer in [`crate::logging`] can capture exactly these.
//!
//! Line shape mirrors the CSV-ish format consumed downstream:
//! `<kind>,<verb>,INFO,,,<fields...>`

use chrono::Local;

/// `SESSION` line: a viewer session appeared or disappeared on a
/// segmenting publisher.
pub fn session(publisher: &str, verb: &str, stream: &str, session_id: &str) {
    tracing::info!(
        target: "freshet::stat",
        "{},{},SESSION,INFO,,,{},{},{}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        publisher,
        verb,
        stream,
        session_id,
    );
}

/// `REQUEST` line: an edge/pull request was admitted.
pub fn request(publisher: &str, app: &str, url: &str, session_id: &str) {
    tracing::info!(
        target: "freshet::stat",
        "{},{},REQUEST,INFO,,,{},{},{}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        publisher,
        app,
        url,
        session_id,
    );
}

/// `CONN_COUNT` line: periodic concurrent-viewer census.
pub fn conn_count(publisher: &str, live: u64, total: u64) {
    tracing::info!(
        target: "freshet::stat",
        "{},{},CONN_COUNT,INFO,,,{},{}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        publisher,
        live,
        total,
    );
}
