/// Sentinel the executor reports when a foreground job is stopped
/// (Ctrl-Z) rather than exited or killed — not a real wait status, just
/// the internal `$?` value the shell assigns for that transition (§6).
pub const STOPPED_SENTINEL: i32 = 146;

/// Convert an OS process status into shell-style exit code semantics.
///
/// On Unix, processes terminated by signal map to `128 + signal`.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return signal_exit_code(signal);
        }
    }

    1
}

/// `128 + signal`, the exit code a killed process always reports (§6,
/// resolving the Open Question on killed-pipeline status reporting). Never
/// the raw wait status.
pub fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

#[cfg(unix)]
pub fn exit_code_from_wait_status(raw_status: libc::c_int) -> Option<i32> {
    if unsafe { libc::WIFEXITED(raw_status) } {
        return Some(unsafe { libc::WEXITSTATUS(raw_status) });
    }

    if unsafe { libc::WIFSIGNALED(raw_status) } {
        let signal = unsafe { libc::WTERMSIG(raw_status) };
        return Some(128 + signal);
    }

    None
}
