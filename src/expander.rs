//! §4.3 Expander — four passes applied to every word after parsing:
//! parameter, tilde, filename-pattern (glob), and redirection-target.
//!
//! Quote context gates which passes run on a fragment (§4.3, mirrored by
//! `QuoteContext` in `ast.rs`): single-quoted fragments are copied verbatim,
//! double-quoted fragments get parameter expansion only, unquoted fragments
//! get the full pipeline.

use crate::ast::{Command, QuoteContext, Tree, Word, WordFragment};
use crate::error::ShellError;
use crate::redirect::{RedirectKind, RedirectTarget};
use crate::state::ShellState;

/// Expand every command in a tree in place, walking pipelines and
/// conditionals/sequences without flattening them (§4.3 applies per
/// command, not per line).
pub fn expand_tree(tree: &mut Tree, state: &ShellState) {
    match tree {
        Tree::Command(cmd) => expand_command(cmd, state),
        Tree::Pipeline(p) => {
            for cmd in &mut p.commands {
                expand_command(cmd, state);
            }
        }
        Tree::Conditional { left, right, .. } => {
            expand_tree(left, state);
            expand_tree(right, state);
        }
        Tree::Sequence(nodes) => {
            for node in nodes {
                expand_tree(node, state);
            }
        }
    }
}

/// Mark a command invalid and emit the diagnostic the spec requires for
/// expansion failures (§4.3 step 2 edge case, §7 "Expansion errors" — unknown
/// `~user`, glob with no match invalidate just the owning command, not the
/// whole line).
fn invalidate(cmd: &mut Command, err: ShellError) {
    eprintln!("{err}");
    crate::logging::warn("expander", &err.to_string());
    cmd.invalid = true;
}

fn expand_command(cmd: &mut Command, state: &ShellState) {
    let mut argv = Vec::new();
    for word in &cmd.words {
        match expand_word(word, state) {
            Ok(values) => argv.extend(values),
            Err(err) => {
                invalidate(cmd, err);
                return;
            }
        }
    }
    cmd.argv = argv;

    for redir in &mut cmd.redirections {
        // A fd-duplication target (`2>&1`) is fully resolved at parse time —
        // there is no word to expand (§4.2 Expansion).
        if redir.resolved.is_some() {
            continue;
        }
        let joined = expand_word(&redir.target_word, state);
        match joined {
            Ok(parts) if parts.len() == 1 => {
                redir.resolved = Some(wrap_target(redir.kind, parts.into_iter().next().unwrap()));
            }
            Ok(parts) => {
                // A redirection target that globs to multiple files has no
                // single destination (§4.3 step 4 edge case); the first
                // match is used and a diagnostic is left to the executor.
                redir.resolved = Some(wrap_target(
                    redir.kind,
                    parts.into_iter().next().unwrap_or_default(),
                ));
            }
            Err(err) => invalidate(cmd, err),
        }
    }
}

/// Wrap an expanded redirection-target string according to the
/// redirection's kind: `<<<` produces a here-string payload, everything
/// else a path (§4.3 step 4).
fn wrap_target(kind: RedirectKind, text: String) -> RedirectTarget {
    if kind == RedirectKind::HereString {
        RedirectTarget::HereString(text)
    } else {
        RedirectTarget::Path(text)
    }
}

/// Expand a single word into one or more final argument strings. A word with
/// no glob fragment always yields exactly one string; a glob fragment that
/// matches nothing invalidates the command rather than passing the literal
/// pattern through (§4.3 edge case, a deliberate stricter-than-teacher
/// choice — see DESIGN.md).
fn expand_word(word: &Word, state: &ShellState) -> Result<Vec<String>, ShellError> {
    let mut combined = String::new();
    let mut has_unquoted_glob_char = false;

    for frag in word {
        match frag {
            WordFragment::Literal { value, .. } => combined.push_str(value),
            WordFragment::Parameter { value, quote } => {
                combined.push_str(&expand_parameter(value, state));
                let _ = quote;
            }
            WordFragment::Tilde { value, quote } => {
                if *quote == QuoteContext::None {
                    match expand_tilde(value) {
                        Some(expanded) => combined.push_str(&expanded),
                        None => {
                            return Err(ShellError::Expansion(format!(
                                "no such user: {value}"
                            )));
                        }
                    }
                } else {
                    combined.push_str(value);
                }
            }
            WordFragment::Glob { value, quote } => {
                combined.push_str(value);
                if *quote == QuoteContext::None {
                    has_unquoted_glob_char = true;
                }
            }
        }
    }

    if has_unquoted_glob_char {
        expand_glob(&combined)
    } else {
        Ok(vec![combined])
    }
}

fn expand_parameter(name: &str, state: &ShellState) -> String {
    match name {
        "?" => state.last_exec.exit_code.to_string(),
        "$" => state.pid.to_string(),
        "!" => state
            .last_exec
            .last_bg_pid
            .map(|p| p.to_string())
            .unwrap_or_default(),
        "-" => state.flags.as_str(),
        _ => std::env::var(name).unwrap_or_default(),
    }
}

/// `~` and `~/path` expand to `$HOME`; `~user` and `~user/path` look the
/// user up via `getpwnam_r` (§4.3 step 2). Returns `None` if `~user` names
/// an unknown user, invalidating the command per §4.3's edge case.
fn expand_tilde(token: &str) -> Option<String> {
    if token == "~" {
        return Some(home_dir());
    }
    if let Some(rest) = token.strip_prefix("~/") {
        return Some(format!("{}/{}", home_dir(), rest));
    }

    let (user, rest) = match token[1..].split_once('/') {
        Some((u, r)) => (u, Some(r)),
        None => (&token[1..], None),
    };
    let home = lookup_user_home(user)?;
    Some(match rest {
        Some(r) => format!("{home}/{r}"),
        None => home,
    })
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/".to_string())
}

#[cfg(unix)]
fn lookup_user_home(user: &str) -> Option<String> {
    use std::ffi::CString;

    let cuser = CString::new(user).ok()?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0i8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwnam_r(
            cuser.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return None;
    }

    let home = unsafe { std::ffi::CStr::from_ptr(pwd.pw_dir) };
    Some(home.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn lookup_user_home(_user: &str) -> Option<String> {
    None
}

fn expand_glob(pattern: &str) -> Result<Vec<String>, ShellError> {
    let mut matches: Vec<String> = match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .map(|path| path.to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            return Err(ShellError::Expansion(format!(
                "bad glob pattern {pattern}: {e}"
            )));
        }
    };

    if matches.is_empty() {
        return Err(ShellError::Expansion(format!(
            "no match: {pattern}"
        )));
    }
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::QuoteContext;

    fn lit(s: &str, quote: QuoteContext) -> WordFragment {
        WordFragment::Literal {
            value: s.into(),
            quote,
        }
    }

    fn state_with_exit(code: i32) -> ShellState {
        let mut s = ShellState::new();
        s.last_exec.exit_code = code;
        s
    }

    #[test]
    fn single_quoted_word_is_untouched() {
        let state = ShellState::new();
        let word = vec![lit("$HOME", QuoteContext::Single)];
        assert_eq!(expand_word(&word, &state).unwrap(), vec!["$HOME"]);
    }

    #[test]
    fn parameter_exit_code() {
        let state = state_with_exit(42);
        let word = vec![WordFragment::Parameter {
            value: "?".into(),
            quote: QuoteContext::None,
        }];
        assert_eq!(expand_word(&word, &state).unwrap(), vec!["42"]);
    }

    #[test]
    fn parameter_pid() {
        let state = ShellState::new();
        let word = vec![WordFragment::Parameter {
            value: "$".into(),
            quote: QuoteContext::None,
        }];
        let result = expand_word(&word, &state).unwrap();
        assert_eq!(result[0], state.pid.to_string());
    }

    #[test]
    fn env_var_expands() {
        unsafe { std::env::set_var("JSH_EXP_TEST", "value") };
        let state = ShellState::new();
        let word = vec![WordFragment::Parameter {
            value: "JSH_EXP_TEST".into(),
            quote: QuoteContext::None,
        }];
        assert_eq!(expand_word(&word, &state).unwrap(), vec!["value"]);
        unsafe { std::env::remove_var("JSH_EXP_TEST") };
    }

    #[test]
    fn undefined_var_is_empty() {
        let state = ShellState::new();
        let word = vec![WordFragment::Parameter {
            value: "JSH_DEFINITELY_UNSET_XYZ".into(),
            quote: QuoteContext::None,
        }];
        assert_eq!(expand_word(&word, &state).unwrap(), vec![""]);
    }

    #[test]
    fn tilde_alone_expands_home() {
        unsafe { std::env::set_var("HOME", "/home/test") };
        let expanded = expand_tilde("~").unwrap();
        assert_eq!(expanded, "/home/test");
    }

    #[test]
    fn tilde_with_path_expands() {
        unsafe { std::env::set_var("HOME", "/home/test") };
        let expanded = expand_tilde("~/projects").unwrap();
        assert_eq!(expanded, "/home/test/projects");
    }

    #[test]
    fn unknown_tilde_user_fails() {
        assert!(expand_tilde("~definitely_not_a_real_user_xyz123").is_none());
    }

    #[test]
    fn no_glob_match_invalidates_command() {
        let state = ShellState::new();
        let word = vec![WordFragment::Glob {
            value: "*.definitely_not_a_real_extension_xyz".into(),
            quote: QuoteContext::None,
        }];
        assert!(expand_word(&word, &state).is_err());
    }

    #[test]
    fn double_quoted_glob_char_is_literal() {
        let state = ShellState::new();
        let word = vec![lit("*.rs", QuoteContext::Double)];
        assert_eq!(expand_word(&word, &state).unwrap(), vec!["*.rs"]);
    }

    #[test]
    fn parameter_flags_defaults_to_imh() {
        let state = ShellState::new();
        let word = vec![WordFragment::Parameter {
            value: "-".into(),
            quote: QuoteContext::None,
        }];
        assert_eq!(expand_word(&word, &state).unwrap(), vec!["imh"]);
    }
}
