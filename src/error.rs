//! Structured error taxonomy (§7) used for `tracing` fields and for the
//! handful of call sites that benefit from a typed error rather than a bare
//! exit code.
//!
//! This does not replace the exit-code/`ExecutionAction` control flow the
//! executor uses throughout — §7 explicitly requires that an error local to
//! one command not poison the rest of the sequence, which is naturally a
//! status code returned from `exec_node`, not a `Result` threaded through the
//! whole tree with `?`. `ShellError` exists for the few places (redirection
//! setup, fork/exec) where a structured, named error improves diagnostics
//! and logging over a bare `String`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("jsh: syntax error: {0}")]
    Parse(String),

    #[error("jsh: {0}")]
    Expansion(String),

    #[error("jsh: {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("jsh: redirection error: {0}")]
    Redirect(String),

    #[error("reaper: {0}")]
    Reaper(String),
}
