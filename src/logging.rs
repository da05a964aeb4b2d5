//! Thin diagnostic-logging envelope over `tracing`.
//!
//! `spec.md` treats the logging macros as an external collaborator — callers
//! only need `warn`/`info` to report non-fatal anomalies (§4.1 lex failures,
//! §4.6 reaper anomalies). Centralizing them here keeps call sites from
//! depending on `tracing` directly and gives the test harness one place to
//! install a subscriber.

pub fn warn(target: &str, msg: &str) {
    tracing::warn!(target: "jsh", component = target, "{msg}");
}

pub fn info(target: &str, msg: &str) {
    tracing::info!(target: "jsh", component = target, "{msg}");
}
