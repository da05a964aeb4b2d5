//! §4.6 Reaper — the shell's single `waitpid` driver.
//!
//! Grounded directly in `handle_sigchld_events` in
//! `examples/original_source/src/shell/signal.c`: on any SIGCHLD, drain
//! every pending state change with `waitpid(-1, &status,
//! WNOHANG|WUNTRACED|WCONTINUED)` until none remain, translating
//! WIFEXITED/WIFSIGNALED/WIFSTOPPED/WIFCONTINUED into job/process state
//! transitions. Called both synchronously after a foreground wait and from
//! the REPL's signal-fd poll between prompts.

use crate::error::ShellError;
use crate::jobs::{JobTable, ProcessStatus};
use crate::logging;

/// One drain pass. Returns the set of job ids whose status changed, so the
/// caller can print `Done`/`Stopped` lines for exactly those jobs.
#[cfg(unix)]
pub fn drain(jobs: &mut JobTable) -> Vec<crate::jobs::JobId> {
    let mut changed = Vec::new();

    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut raw_status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };

        if pid == 0 {
            break; // nothing changed state right now
        }
        if pid < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ECHILD) {
                break; // no children left to wait for
            }
            let shell_err = ShellError::Reaper(format!("waitpid failed: {err}"));
            logging::warn("reaper", &shell_err.to_string());
            break;
        }

        let Some(job_id) = jobs.job_for_pid(pid) else {
            continue; // reaped a pid this table never tracked (e.g. an orphan)
        };

        let new_status = if unsafe { libc::WIFEXITED(raw_status) } {
            ProcessStatus::Exited(unsafe { libc::WEXITSTATUS(raw_status) })
        } else if unsafe { libc::WIFSIGNALED(raw_status) } {
            let sig = unsafe { libc::WTERMSIG(raw_status) };
            ProcessStatus::Killed(sig)
        } else if unsafe { libc::WIFSTOPPED(raw_status) } {
            ProcessStatus::Stopped
        } else if unsafe { libc::WIFCONTINUED(raw_status) } {
            ProcessStatus::Running
        } else {
            continue;
        };

        if let Some(job) = jobs.get_mut(job_id) {
            if let Some(proc) = job.processes.iter_mut().find(|p| p.pid == pid) {
                proc.status = new_status;
            }
            job.notified = false;
        }
        changed.push(job_id);
    }

    changed.sort();
    changed.dedup();
    changed
}

#[cfg(not(unix))]
pub fn drain(_jobs: &mut JobTable) -> Vec<crate::jobs::JobId> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Process;

    #[test]
    fn drain_on_table_with_no_children_is_a_noop() {
        let mut jobs = JobTable::new();
        let changed = drain(&mut jobs);
        assert!(changed.is_empty());
    }

    #[test]
    fn drain_ignores_untracked_pids() {
        // A table with jobs whose pids never actually forked (test-only
        // synthetic state) just exercises the "no children" exit path.
        let mut jobs = JobTable::new();
        jobs.add(
            999_999,
            vec![Process {
                pid: 999_999,
                argv0: "nonexistent".into(),
                status: ProcessStatus::Running,
            }],
            "nonexistent".into(),
        );
        let changed = drain(&mut jobs);
        assert!(changed.is_empty());
    }
}
