mod ast;
mod builtins;
mod editor;
mod error;
mod executor;
mod expander;
mod job_control;
mod jobs;
mod lexer;
mod logging;
mod parser;
mod reaper;
mod redirect;
mod state;
mod status;

use std::io::{self, Write};

use editor::LineEditor;
use executor::ExecutionAction;
use jobs::JobStatus;
use state::ShellState;

const PROMPT: &str = "jsh> ";

fn main() {
    // A builtin stage of a pipeline re-execs this binary with
    // `INTERNAL_EXEC_FLAG` as argv[1] instead of running on a thread or
    // in-process (§4.5, §5); dispatch straight to the builtin and exit,
    // skipping the REPL.
    let mut argv = std::env::args();
    let _argv0 = argv.next();
    if argv.next().as_deref() == Some(builtins::INTERNAL_EXEC_FLAG) {
        std::process::exit(run_builtin_child(argv.collect()));
    }

    seed_environment();

    ctrlc::set_handler(|| {
        // Raw mode disables ISIG, so Ctrl-C reaches the editor as a key
        // event, not this handler; this only fires on the non-tty fallback
        // path and on platforms without job control (§5, §9 REDESIGN note).
        if !editor::EDITOR_ACTIVE.load(std::sync::atomic::Ordering::Relaxed) {
            println!();
            let _ = io::stdout().flush();
        }
    })
    .expect("failed to install Ctrl-C handler");

    #[cfg(unix)]
    let _signal_fd = job_control::setup_signal_fd()
        .map_err(|e| logging::warn("main", &format!("failed to block job-control signals: {e}")))
        .ok();

    let mut state = ShellState::new();
    let mut editor = LineEditor::new();
    let mut exit_code = 0;
    let mut warned_live_jobs = false;

    loop {
        report_job_changes(&mut state);

        let line = editor.read_line(PROMPT, || report_job_changes(&mut state));

        match line {
            Ok(Some(line)) => {
                warned_live_jobs = false;
                editor.add_to_history(&line);

                match parser::parse_line(&line) {
                    Ok(None) => continue,
                    Ok(Some(mut tree)) => {
                        expander::expand_tree(&mut tree, &state);
                        match executor::exec_node(&tree, &mut state) {
                            ExecutionAction::Continue(code) => exit_code = code,
                            ExecutionAction::Exit(code) => {
                                exit_code = code;
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        let shell_err = error::ShellError::Parse(err.0.clone());
                        logging::warn("main", &shell_err.to_string());
                        eprintln!("{}", err.0);
                        state.last_exec.exit_code = 2;
                        exit_code = 2;
                    }
                }
            }
            Ok(None) => {
                if !state.jobs.is_empty() && !warned_live_jobs {
                    eprintln!("jsh: you have stopped or running jobs");
                    warned_live_jobs = true;
                    continue;
                }
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("jsh: {e}");
                break;
            }
        }
    }

    report_job_changes(&mut state);
    editor.flush_on_exit();
    std::process::exit(exit_code);
}

/// Run a single builtin as a forked child's whole program: `args[0]` is the
/// builtin name, the rest its argv. Started with a fresh [`ShellState`],
/// same as any other subprocess in a pipeline — mutations like `cd`/`export`
/// never reach the parent shell, matching how any pipeline stage but the
/// single-command fast path behaves in any other POSIX shell.
fn run_builtin_child(args: Vec<String>) -> i32 {
    let Some((name, rest)) = args.split_first() else {
        return 1;
    };
    let mut state = ShellState::new();
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut ctx = builtins::BuiltinContext {
        stdin: &mut stdin,
        stdout: &mut stdout,
        stderr: &mut stderr,
        state: &mut state,
    };
    let code = match builtins::execute(name, rest, &mut ctx) {
        builtins::BuiltinAction::Continue(code) | builtins::BuiltinAction::Exit(code) => code,
    };
    let _ = stdout.flush();
    let _ = stderr.flush();
    code
}

/// Drain the reaper and print `Done`/`Stopped` lines for any job whose state
/// changed since the last report (§4.6, §4.7). Called before every prompt
/// and from the line editor's idle hook, the two suspension points named in
/// §5's concurrency model.
fn report_job_changes(state: &mut ShellState) {
    let changed = reaper::drain(&mut state.jobs);
    let most_recent = state.jobs.most_recent_id();

    for id in changed {
        let Some(job) = state.jobs.get(id) else {
            continue;
        };
        if job.notified {
            continue;
        }
        match job.status() {
            JobStatus::Done(_) | JobStatus::Killed(_) => {
                println!("{}", job.display_line(Some(id) == most_recent))
            }
            JobStatus::Stopped => {
                println!("{}", job.display_line(Some(id) == most_recent));
                if let Some(job) = state.jobs.get_mut(id) {
                    job.notified = true;
                }
            }
            JobStatus::Running => {}
        }
    }

    state.jobs.sweep_completed();
}

/// Seed `SHELL` and `HISTFILE` into the process environment on entry (§6).
/// `HOME` and `PATH` are left untouched — they are inherited, never
/// synthesized.
fn seed_environment() {
    if std::env::var("SHELL").is_err() {
        let shell = std::fs::read_link("/proc/self/exe")
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| std::env::args().next())
            .unwrap_or_else(|| "jsh".to_string());
        unsafe { std::env::set_var("SHELL", shell) };
    }

    if std::env::var("HISTFILE").is_err() {
        if let Ok(cwd) = std::env::current_dir() {
            unsafe { std::env::set_var("HISTFILE", cwd.join(".jsh_history")) };
        }
    }
}
