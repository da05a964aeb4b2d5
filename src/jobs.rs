//! The job table (§3 "Job", §4.4). Generalizes the teacher's single-child
//! `HashMap<usize, Job>` table to own a `Vec<Process>` per job so a
//! pipelined background command (`a | b | c &`) tracks every stage, the way
//! `examples/original_source/src/executor/jobs.c`'s `job_t` owns a linked
//! list of `process_t`. A safe owning `Vec` replaces that list's raw
//! `prev`/`next` pointers — idiomatic Rust has no need for the intrusive
//! list itself, only for what it tracked.
//!
//! Jobs do not reap themselves: [`crate::reaper`] drives `waitpid` over the
//! whole process tree and calls back into this table with state
//! transitions, so there is exactly one reaper in the shell (§4.6).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

/// A process's lifecycle state. `Exited` carries the final `$?`-reportable
/// code from a normal exit; `Killed` carries the raw signal number a
/// signal-terminated process died from, kept distinct from `Exited` so
/// `jobs`/`Job::display_line` can render `Killed` the way
/// `jobs_job_str` in `examples/original_source/src/executor/jobs.c`
/// renders `" killed"` separately from `"  done "` (§3). Callers that need
/// the `128 + signal` `$?` form for a killed process derive it from the
/// signal via `status::signal_exit_code` rather than storing it twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Stopped,
    Exited(i32),
    Killed(i32),
}

impl ProcessStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, ProcessStatus::Exited(_) | ProcessStatus::Killed(_))
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: i32,
    pub argv0: String,
    pub status: ProcessStatus,
}

/// A job's aggregate state, derived from its processes: `Running` while any
/// process is running, `Stopped` if none are running but at least one is
/// stopped, otherwise `Done` with the last process's exit code or `Killed`
/// with the signal that took it down (pipeline status is the right-most
/// stage's, per POSIX and §4.5) — kept distinct per §3, see `ProcessStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done(i32),
    Killed(i32),
}

pub struct Job {
    pub id: JobId,
    pub pgid: i32,
    pub processes: Vec<Process>,
    /// Original source text, for `jobs`/history display (§3).
    pub command: String,
    /// Whether the controlling terminal has already been told about this
    /// job's most recent state change (avoids re-printing `Done` every
    /// prompt once it has been reported once, per the teacher's reap loop).
    pub notified: bool,
    /// Monotonic insertion order, distinct from `id`. Job ids are reused
    /// from the lowest free slot (§4.4), so a freshly-added job can get a
    /// numerically smaller id than an older still-live one; `+`/`-` and
    /// `fg`/`bg` with no argument track *recency of addition*, not id
    /// magnitude (§3 "jobs_tail is always the most-recently added job").
    seq: u64,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        if self.processes.iter().any(|p| p.status == ProcessStatus::Running) {
            return JobStatus::Running;
        }
        if self.processes.iter().any(|p| p.status == ProcessStatus::Stopped) {
            return JobStatus::Stopped;
        }
        match self.processes.last().map(|p| p.status) {
            Some(ProcessStatus::Killed(sig)) => JobStatus::Killed(sig),
            Some(ProcessStatus::Exited(code)) => JobStatus::Done(code),
            _ => JobStatus::Done(0),
        }
    }

    /// `[N]+  Running                 cmd &` style display line, grounded in
    /// `jobs_job_str` in `examples/original_source/src/executor/jobs.c`.
    pub fn display_line(&self, is_most_recent: bool) -> String {
        let marker = if is_most_recent { "+" } else { "-" };
        let label = match self.status() {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done(0) => "Done",
            JobStatus::Done(code) => return format!("[{}]{marker}  Exit {code}                {}", self.id.0, self.command),
            JobStatus::Killed(_) => "Killed",
        };
        format!("[{}]{marker}  {label:<22} {}", self.id.0, self.command)
    }
}

pub struct JobTable {
    jobs: HashMap<JobId, Job>,
    pid_index: HashMap<i32, JobId>,
    next_seq: u64,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: HashMap::new(),
            pid_index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Lowest positive integer not currently in use (§4.4 "Job-id
    /// allocation"; a testable property in §8 — ids are reused only after
    /// the prior owner leaves the list, never handed out as a monotonic
    /// counter).
    fn lowest_unused_id(&self) -> JobId {
        let mut candidate = 1usize;
        let mut used: Vec<usize> = self.jobs.keys().map(|id| id.0).collect();
        used.sort_unstable();
        for id in used {
            if id == candidate {
                candidate += 1;
            } else if id > candidate {
                break;
            }
        }
        JobId(candidate)
    }

    pub fn add(&mut self, pgid: i32, processes: Vec<Process>, command: String) -> JobId {
        let id = self.lowest_unused_id();
        let seq = self.next_seq;
        self.next_seq += 1;
        for p in &processes {
            self.pid_index.insert(p.pid, id);
        }
        self.jobs.insert(
            id,
            Job {
                id,
                pgid,
                processes,
                command,
                notified: false,
                seq,
            },
        );
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn job_for_pid(&self, pid: i32) -> Option<JobId> {
        self.pid_index.get(&pid).copied()
    }

    pub fn job_for_pgid(&self, pgid: i32) -> Option<JobId> {
        self.jobs
            .values()
            .find(|j| j.pgid == pgid)
            .map(|j| j.id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        for p in &job.processes {
            self.pid_index.remove(&p.pid);
        }
        Some(job)
    }

    /// All jobs sorted by job id ascending (§4.4 display order invariant).
    pub fn jobs_sorted(&self) -> Vec<&Job> {
        let mut list: Vec<&Job> = self.jobs.values().collect();
        list.sort_by_key(|j| j.id);
        list
    }

    pub fn most_recent_id(&self) -> Option<JobId> {
        self.jobs.values().max_by_key(|j| j.seq).map(|j| j.id)
    }

    pub fn most_recent_stopped_id(&self) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|j| j.status() == JobStatus::Stopped)
            .max_by_key(|j| j.seq)
            .map(|j| j.id)
    }

    /// Drop every job whose processes have all finished. Called after the
    /// reaper has applied its state transitions for this round (§4.6); the
    /// caller is responsible for printing `Done`/`Exit` lines first.
    pub fn sweep_completed(&mut self) -> Vec<Job> {
        let done_ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, j)| matches!(j.status(), JobStatus::Done(_) | JobStatus::Killed(_)))
            .map(|(id, _)| *id)
            .collect();
        done_ids
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}
