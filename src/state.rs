//! Shell-wide state (§9 design note: no static mutable storage — one
//! `ShellState` value is built in `main` and threaded by `&mut` reference
//! through the lexer/parser/expander/executor/builtins chain).

use crate::jobs::JobTable;

/// Flags reported by the `$-` parameter (§4.3 "`$-` flags"). `debug` has no
/// way to be set yet — it is tracked for completeness and stays `false`
/// (an Open Question resolution: `$-` reports whatever subset is active and
/// never errors on an unset flag).
#[derive(Debug, Clone)]
pub struct Flags {
    pub interactive: bool,
    pub monitor: bool,
    pub history: bool,
    pub debug: bool,
}

impl Default for Flags {
    /// `im h` — interactive, job-control, and history all on by default
    /// (§4.3); `debug` stays off until `-d` has a setter.
    fn default() -> Self {
        Flags {
            interactive: true,
            monitor: true,
            history: true,
            debug: false,
        }
    }
}

impl Flags {
    /// Render as the `$-` string, e.g. `"imh"`.
    pub fn as_str(&self) -> String {
        let mut s = String::new();
        if self.interactive {
            s.push('i');
        }
        if self.monitor {
            s.push('m');
        }
        if self.history {
            s.push('h');
        }
        if self.debug {
            s.push('d');
        }
        s
    }
}

/// The record of the most recently executed command line, for `$!` and for
/// `jobs`/history display of the last background pid (§3, §4.6).
#[derive(Debug, Clone, Default)]
pub struct LastExec {
    pub exit_code: i32,
    pub last_bg_pid: Option<i32>,
}

/// Everything an interactive session carries between lines.
pub struct ShellState {
    pub pid: i32,
    pub pgid: i32,
    pub uid: u32,
    pub gid: u32,
    pub hostname: String,
    pub flags: Flags,
    pub last_exec: LastExec,
    pub jobs: JobTable,
}

impl ShellState {
    pub fn new() -> Self {
        let pid = std::process::id() as i32;
        ShellState {
            pid,
            pgid: pid,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            hostname: hostname(),
            flags: Flags::default(),
            last_exec: LastExec::default(),
            jobs: JobTable::new(),
        }
    }
}

fn hostname() -> String {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_are_im_h() {
        assert_eq!(Flags::default().as_str(), "imh");
    }

    #[test]
    fn debug_flag_is_off_by_default_but_renders_when_set() {
        let mut flags = Flags::default();
        assert!(!flags.debug);
        flags.debug = true;
        assert_eq!(flags.as_str(), "imhd");
    }

    #[test]
    fn new_shell_state_has_default_flags() {
        let state = ShellState::new();
        assert_eq!(state.flags.as_str(), "imh");
    }
}
