//! §4.5 Executor — walks an expanded `Tree`, forking/dispatching one
//! pipeline at a time and threading exit status through sequences and
//! conditionals.
//!
//! Structurally this keeps the teacher's redirection-resolution and
//! pipeline-spawning machinery (`InputHandle`/`OutputHandle`,
//! `resolve_redirections`, the pgid race closed from both sides of `fork`,
//! `WUNTRACED` waits that surface Ctrl-Z as a `Stopped` job) and
//! generalizes it from a flat `parser::Command` to the new `Tree`/`Command`
//! model with fd-indexed redirections and the arena-backed job table.
//!
//! One deliberate departure: the teacher runs a non-last builtin pipeline
//! stage on a thread so the stage downstream of it has a reader before it
//! writes. Every stage here is a real forked child instead — a builtin
//! stage re-execs this binary with `builtins::INTERNAL_EXEC_FLAG` — so no
//! thread is ever spawned by the executor.

use os_pipe::{pipe, PipeReader, PipeWriter};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::process::{Command as OsCommand, Stdio};

use crate::ast::{Command, Connector, Tree};
use crate::builtins::{self, BuiltinAction, BuiltinContext};
use crate::error::ShellError;
#[cfg(unix)]
use crate::job_control;
use crate::jobs::{Process, ProcessStatus};
use crate::redirect::{is_null_device, RedirectTarget, Redirection};
use crate::state::ShellState;
use crate::status;

#[derive(Debug)]
pub enum ExecutionAction {
    Continue(i32),
    Exit(i32),
}

/// Run one expanded, top-level tree and return its final action, updating
/// `state.last_exec` as it goes (§4.5, §3 "Ownership" — exit status flows
/// back into `$?`/`$!`).
pub fn exec_node(tree: &Tree, state: &mut ShellState) -> ExecutionAction {
    let action = exec_node_inner(tree, state);
    if let ExecutionAction::Continue(code) = action {
        state.last_exec.exit_code = code;
    }
    action
}

fn exec_node_inner(tree: &Tree, state: &mut ShellState) -> ExecutionAction {
    match tree {
        Tree::Sequence(nodes) => {
            let mut last = ExecutionAction::Continue(0);
            for node in nodes {
                last = exec_node(node, state);
                if matches!(last, ExecutionAction::Exit(_)) {
                    return last;
                }
            }
            last
        }
        Tree::Conditional { left, right, op } => {
            let left_result = exec_node(left, state);
            let ExecutionAction::Continue(left_code) = left_result else {
                return left_result;
            };
            let should_run_right = match op {
                Connector::And => left_code == 0,
                Connector::Or => left_code != 0,
            };
            if should_run_right {
                exec_node(right, state)
            } else {
                ExecutionAction::Continue(left_code)
            }
        }
        Tree::Pipeline(p) => execute_pipeline(&p.commands, state),
        Tree::Command(cmd) => execute_pipeline(std::slice::from_ref(cmd), state),
    }
}

fn execute_pipeline(commands: &[Command], state: &mut ShellState) -> ExecutionAction {
    if commands.iter().any(|c| c.invalid) {
        return ExecutionAction::Continue(1);
    }

    if commands.len() == 1
        && builtins::is_builtin(&commands[0].argv.first().cloned().unwrap_or_default())
    {
        return run_builtin(&commands[0], state);
    }

    let background = commands.first().map(|c| c.background).unwrap_or(false);
    let command_text = commands
        .iter()
        .map(|c| c.raw_str.as_str())
        .collect::<Vec<_>>()
        .join(" | ");

    #[allow(unused_mut)]
    let mut pipeline_pgid: Option<i32> = None;
    let mut processes: Vec<Process> = Vec::new();
    let mut children: Vec<std::process::Child> = Vec::new();
    let mut prev_pipe: Option<PipeReader> = None;
    let mut last_status = 0;

    for (idx, cmd) in commands.iter().enumerate() {
        let is_last = idx + 1 == commands.len();
        let program = cmd.argv.first().cloned().unwrap_or_default();
        let is_builtin = builtins::is_builtin(&program);

        let stdin_default = prev_pipe
            .take()
            .map(InputHandle::Pipe)
            .unwrap_or(InputHandle::Inherit);

        let (stdout_default, next_reader) = if !is_last {
            match pipe() {
                Ok((reader, writer)) => (OutputHandle::Pipe(writer), Some(reader)),
                Err(e) => {
                    eprintln!("jsh: failed to create pipe: {e}");
                    wait_children(&mut children);
                    return ExecutionAction::Continue(1);
                }
            }
        } else {
            (OutputHandle::Inherit, None)
        };

        let defaults = RedirectionDefaults {
            stdin: stdin_default,
            stdout: stdout_default,
            stderr: OutputHandle::Inherit,
        };

        let resolved = match resolve_redirections(&cmd.redirections, defaults) {
            Ok(r) => r,
            Err(msg) => {
                eprintln!("{msg}");
                wait_children(&mut children);
                return ExecutionAction::Continue(1);
            }
        };

        // Every stage of a multi-command pipeline — external or builtin,
        // first or last — is a real forked child, never a thread (§4.5, §5).
        // A builtin stage gets there by re-exec'ing this binary with
        // `INTERNAL_EXEC_FLAG`; `main.rs` dispatches straight into
        // `builtins::execute` on a fresh `ShellState`, so `cd`/`export`
        // mid-pipeline behave like they do in any other POSIX shell: the
        // mutation dies with the subshell instead of reaching the parent. A
        // lone builtin with no pipe at all is the one case that still runs
        // in-process, via `run_builtin` above.
        let args = cmd.argv.get(1..).unwrap_or(&[]).to_vec();
        let mut process = if is_builtin {
            let mut p = OsCommand::new(current_exe_path());
            p.arg(builtins::INTERNAL_EXEC_FLAG).arg(&program);
            p
        } else {
            OsCommand::new(&program)
        };
        process.args(&args);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let captured_pgid = pipeline_pgid;
            unsafe {
                process.pre_exec(move || {
                    for &sig in &[libc::SIGINT, libc::SIGTSTP, libc::SIGQUIT, libc::SIGPIPE] {
                        if libc::signal(sig, libc::SIG_DFL) == libc::SIG_ERR {
                            return Err(std::io::Error::last_os_error());
                        }
                    }
                    let target = captured_pgid.unwrap_or(0);
                    if libc::setpgid(0, target) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let (stdin_stdio, here_string) = match resolved.stdin.into_stdio() {
            Ok(r) => r,
            Err(msg) => {
                eprintln!("{msg}");
                wait_children(&mut children);
                return ExecutionAction::Continue(1);
            }
        };
        let stdout_stdio = match resolved.stdout.into_stdio() {
            Ok(s) => s,
            Err(msg) => {
                eprintln!("{msg}");
                wait_children(&mut children);
                return ExecutionAction::Continue(1);
            }
        };
        let stderr_stdio = match resolved.stderr.into_stdio() {
            Ok(s) => s,
            Err(msg) => {
                eprintln!("{msg}");
                wait_children(&mut children);
                return ExecutionAction::Continue(1);
            }
        };

        process
            .stdin(stdin_stdio)
            .stdout(stdout_stdio)
            .stderr(stderr_stdio);

        let mut child = match process.spawn() {
            Ok(c) => c,
            Err(e) => {
                let code = command_error(&program, e);
                wait_children(&mut children);
                return ExecutionAction::Continue(code);
            }
        };

        #[cfg(unix)]
        if pipeline_pgid.is_none() {
            let pid = child.id() as libc::pid_t;
            unsafe {
                libc::setpgid(pid, pid);
            }
            pipeline_pgid = Some(pid);
        }

        if let Some(text) = here_string {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = writeln!(stdin, "{text}");
            }
        }

        processes.push(Process {
            pid: child.id() as i32,
            argv0: program.clone(),
            status: ProcessStatus::Running,
        });
        children.push(child);

        prev_pipe = next_reader;
    }

    if background {
        if !processes.is_empty() {
            let pgid = pipeline_pgid.unwrap_or(processes[0].pid);
            let last_pid = processes.last().map(|p| p.pid);
            let id = state.jobs.add(pgid, processes, command_text.clone());
            state.last_exec.last_bg_pid = last_pid;
            println!("[{}] {}", id.0, pgid);
        }
        // Not waited on here; the next `reaper::drain` sweep (before the
        // next prompt, or from the editor's idle hook) picks up its exit.
        drop(children);
        return ExecutionAction::Continue(0);
    }

    #[cfg(unix)]
    {
        if children.is_empty() {
            return ExecutionAction::Continue(last_status);
        }

        let fg_pgid = pipeline_pgid.unwrap_or(processes[0].pid);
        let guard = job_control::ForegroundTerminalGuard::new(fg_pgid)
            .map_err(|e| eprintln!("jsh: failed to move terminal to job group {fg_pgid}: {e}"))
            .ok();

        let last_pid = processes.last().map(|p| p.pid);
        let result = wait_for_pipeline(&mut processes, fg_pgid, last_pid);
        drop(guard);

        match result {
            Ok(PipelineOutcome::Exited(code)) => ExecutionAction::Continue(code),
            Ok(PipelineOutcome::Stopped) => {
                let id = state.jobs.add(fg_pgid, processes, command_text.clone());
                println!("[{}]  Stopped  {}", id.0, command_text);
                ExecutionAction::Continue(status::STOPPED_SENTINEL)
            }
            Err(e) => {
                eprintln!("jsh: failed waiting for pipeline: {e}");
                ExecutionAction::Continue(1)
            }
        }
    }

    #[cfg(not(unix))]
    {
        for (idx, mut child) in children.into_iter().enumerate() {
            match child.wait() {
                Ok(status) => {
                    if idx + 1 == processes.len() {
                        last_status = status::exit_code(status);
                    }
                }
                Err(_) => return ExecutionAction::Continue(1),
            }
        }
        ExecutionAction::Continue(last_status)
    }
}

#[cfg(unix)]
enum PipelineOutcome {
    Exited(i32),
    Stopped,
}

/// Wait for every process in a just-spawned foreground pipeline, updating
/// each `Process`'s status in place. Returns the last stage's exit code
/// (pipeline status, §4.5) or `Stopped` the first time any stage is
/// Ctrl-Z'd — the whole group is considered stopped together, matching
/// terminal job-control semantics.
#[cfg(unix)]
fn wait_for_pipeline(
    processes: &mut [Process],
    pgid: libc::pid_t,
    last_pid: Option<i32>,
) -> io::Result<PipelineOutcome> {
    use std::collections::HashSet;

    let mut remaining: HashSet<i32> = processes.iter().map(|p| p.pid).collect();
    let mut last_exit_code = 0;

    while !remaining.is_empty() {
        let mut raw_status: libc::c_int = 0;
        let waited = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };

        if waited < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            for p in processes.iter_mut() {
                if p.status == ProcessStatus::Running {
                    p.status = ProcessStatus::Stopped;
                }
            }
            return Ok(PipelineOutcome::Stopped);
        }

        let (new_status, code) = if unsafe { libc::WIFEXITED(raw_status) } {
            let code = unsafe { libc::WEXITSTATUS(raw_status) };
            (ProcessStatus::Exited(code), code)
        } else if unsafe { libc::WIFSIGNALED(raw_status) } {
            let sig = unsafe { libc::WTERMSIG(raw_status) };
            (ProcessStatus::Killed(sig), status::signal_exit_code(sig))
        } else {
            continue;
        };

        if !remaining.remove(&waited) {
            continue;
        }
        if let Some(p) = processes.iter_mut().find(|p| p.pid == waited) {
            p.status = new_status;
        }
        if Some(waited) == last_pid {
            last_exit_code = code;
        }
    }

    Ok(PipelineOutcome::Exited(last_exit_code))
}

fn run_builtin(cmd: &Command, state: &mut ShellState) -> ExecutionAction {
    let defaults = RedirectionDefaults {
        stdin: InputHandle::Inherit,
        stdout: OutputHandle::Inherit,
        stderr: OutputHandle::Inherit,
    };
    let resolved = match resolve_redirections(&cmd.redirections, defaults) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("{msg}");
            return ExecutionAction::Continue(1);
        }
    };

    let mut stdin_reader = match resolved.stdin.into_reader() {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("{msg}");
            return ExecutionAction::Continue(1);
        }
    };
    let mut stdout_writer = match resolved.stdout.into_writer("stdout") {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("{msg}");
            return ExecutionAction::Continue(1);
        }
    };
    let mut stderr_writer = match resolved.stderr.into_writer("stderr") {
        Ok(w) => w,
        Err(msg) => {
            eprintln!("{msg}");
            return ExecutionAction::Continue(1);
        }
    };

    let program = cmd.argv.first().cloned().unwrap_or_default();
    let args = cmd.argv.get(1..).unwrap_or(&[]).to_vec();

    let mut ctx = BuiltinContext {
        stdin: stdin_reader.as_mut(),
        stdout: stdout_writer.as_mut(),
        stderr: stderr_writer.as_mut(),
        state,
    };
    let action = match builtins::execute(&program, &args, &mut ctx) {
        BuiltinAction::Continue(code) => ExecutionAction::Continue(code),
        BuiltinAction::Exit(code) => ExecutionAction::Exit(code),
    };

    let _ = stdout_writer.flush();
    let _ = stderr_writer.flush();
    action
}

fn command_error(program: &str, e: std::io::Error) -> i32 {
    if e.kind() == std::io::ErrorKind::NotFound {
        eprintln!("jsh: command not found: {program}");
        127
    } else {
        let err = ShellError::Spawn {
            program: program.to_string(),
            source: e,
        };
        crate::logging::warn("executor", &err.to_string());
        eprintln!("{err}");
        126
    }
}

fn wait_children(children: &mut Vec<std::process::Child>) {
    for mut child in children.drain(..) {
        let _ = child.wait();
    }
}

/// This binary's own path, for re-exec'ing a builtin pipeline stage as a
/// real child (see the `INTERNAL_EXEC_FLAG` branch above).
fn current_exe_path() -> std::ffi::OsString {
    std::env::current_exe()
        .map(std::ffi::OsString::from)
        .unwrap_or_else(|_| std::ffi::OsString::from("jsh"))
}

// ── Redirection resolution (per fd, not just 0/1/2) ──

enum InputHandle {
    Inherit,
    Pipe(PipeReader),
    File(File),
    HereString(String),
}

enum OutputHandle {
    Inherit,
    Null,
    File(File),
    Pipe(PipeWriter),
}

impl OutputHandle {
    fn try_clone(&self) -> Result<OutputHandle, ShellError> {
        match self {
            OutputHandle::Inherit => Ok(OutputHandle::Inherit),
            OutputHandle::Null => Ok(OutputHandle::Null),
            OutputHandle::File(f) => f
                .try_clone()
                .map(OutputHandle::File)
                .map_err(|e| ShellError::Redirect(format!("failed to duplicate file: {e}"))),
            OutputHandle::Pipe(w) => w
                .try_clone()
                .map(OutputHandle::Pipe)
                .map_err(|e| ShellError::Redirect(format!("failed to duplicate pipe: {e}"))),
        }
    }

    fn into_stdio(self) -> Result<Stdio, ShellError> {
        Ok(match self {
            OutputHandle::Inherit => Stdio::inherit(),
            OutputHandle::Null => Stdio::null(),
            OutputHandle::File(f) => Stdio::from(f),
            OutputHandle::Pipe(w) => Stdio::from(w),
        })
    }

    fn into_writer(self, label: &str) -> Result<Box<dyn Write + Send>, ShellError> {
        match self {
            OutputHandle::Inherit if label == "stderr" => Ok(Box::new(io::stderr())),
            OutputHandle::Inherit => Ok(Box::new(io::stdout())),
            OutputHandle::Null => Ok(Box::new(io::sink())),
            OutputHandle::File(f) => Ok(Box::new(f)),
            OutputHandle::Pipe(w) => Ok(Box::new(w)),
        }
    }
}

impl InputHandle {
    fn into_stdio(self) -> Result<(Stdio, Option<String>), ShellError> {
        Ok(match self {
            InputHandle::Inherit => (Stdio::inherit(), None),
            InputHandle::Pipe(r) => (Stdio::from(r), None),
            InputHandle::File(f) => (Stdio::from(f), None),
            InputHandle::HereString(text) => (Stdio::piped(), Some(text)),
        })
    }

    fn into_reader(self) -> Result<Box<dyn Read + Send>, ShellError> {
        Ok(match self {
            InputHandle::Inherit => Box::new(io::stdin()),
            InputHandle::Pipe(r) => Box::new(r),
            InputHandle::File(f) => Box::new(f),
            InputHandle::HereString(text) => Box::new(io::Cursor::new(format!("{text}\n"))),
        })
    }
}

struct RedirectionDefaults {
    stdin: InputHandle,
    stdout: OutputHandle,
    stderr: OutputHandle,
}

struct ResolvedRedirections {
    stdin: InputHandle,
    stdout: OutputHandle,
    stderr: OutputHandle,
}

/// Apply a command's redirection list on top of its pipeline-assigned
/// defaults (§4.5). Returns a typed [`ShellError::Redirect`] rather than a
/// bare string — the few places in this module that need a structured error
/// for diagnostics, per error.rs's doc comment.
fn resolve_redirections(
    redirections: &[Redirection],
    defaults: RedirectionDefaults,
) -> Result<ResolvedRedirections, ShellError> {
    let mut stdin = defaults.stdin;
    let mut stdout = defaults.stdout;
    let mut stderr = defaults.stderr;

    for redir in redirections {
        let target = redir.resolved.as_ref().ok_or_else(|| {
            ShellError::Redirect("internal error: unresolved redirection".to_string())
        })?;

        match (redir.fd, target) {
            (fd, RedirectTarget::DupFd(target_fd)) if fd == *target_fd => {} // self-dup is a no-op
            (1, RedirectTarget::Path(path)) => {
                stdout = open_output(path, redir.kind == crate::redirect::RedirectKind::Append)?;
            }
            (2, RedirectTarget::Path(path)) => {
                stderr = open_output(path, redir.kind == crate::redirect::RedirectKind::Append)?;
            }
            (0, RedirectTarget::Path(path)) => {
                stdin = InputHandle::File(
                    File::open(path)
                        .map_err(|e| ShellError::Redirect(format!("{path}: {e}")))?,
                );
            }
            (fd, RedirectTarget::Path(path)) => {
                return Err(ShellError::Redirect(format!(
                    "unsupported redirection target for fd {fd}: {path}"
                )));
            }
            (2, RedirectTarget::DupFd(1)) => stderr = stdout.try_clone()?,
            (1, RedirectTarget::DupFd(2)) => stdout = stderr.try_clone()?,
            (fd, RedirectTarget::DupFd(target)) => {
                return Err(ShellError::Redirect(format!(
                    "unsupported fd duplication: {fd}>&{target}"
                )));
            }
            (0, RedirectTarget::HereString(text)) => {
                stdin = InputHandle::HereString(text.clone());
            }
            (fd, RedirectTarget::HereString(_)) => {
                return Err(ShellError::Redirect(format!(
                    "here-string only valid on fd 0, got {fd}"
                )));
            }
        }
    }

    Ok(ResolvedRedirections {
        stdin,
        stdout,
        stderr,
    })
}

fn open_output(path: &str, append: bool) -> Result<OutputHandle, ShellError> {
    if is_null_device(path) {
        return Ok(OutputHandle::Null);
    }
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    };
    file.map(OutputHandle::File)
        .map_err(|e| ShellError::Redirect(format!("{path}: {e}")))
}
