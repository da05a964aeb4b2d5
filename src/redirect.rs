//! Redirection data model (§3 "Redirection") and the concrete `RedirectTarget`
//! an expanded redirection resolves to.
//!
//! The parser builds a `Redirection` per `redirection := fd? ('<'|'>'|'>>')
//! word` production with its pre-expansion target `Word`; the expander's
//! redirection-target pass (§4.3 step 4) fills in `resolved`.

use crate::ast::Word;

/// Direction of a redirection, matching §3's `kind ∈ {in, out, append}`, plus
/// `HereString` for the `<<<` form (§4.2 Expansion, grounded in the teacher's
/// `redirect.rs`; a Non-goals-excluded `<<` heredoc never lexes to this
/// variant — see the lexer's `<<<`-only three-char lookahead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    In,
    Out,
    Append,
    HereString,
}

impl RedirectKind {
    pub fn default_fd(self) -> i32 {
        match self {
            RedirectKind::In | RedirectKind::HereString => 0,
            RedirectKind::Out | RedirectKind::Append => 1,
        }
    }
}

/// What a resolved redirection target points at. `DupFd` and `HereString`
/// are not named by `spec.md`'s grammar but are carried over from the
/// teacher's redirection support (`2>&1`, `<<<`) — neither conflicts with
/// the Non-goal excluding heredocs (`<<`), so they stay as an enrichment
/// (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    Path(String),
    DupFd(i32),
    HereString(String),
}

/// A single I/O redirection instruction (§3).
#[derive(Debug, Clone)]
pub struct Redirection {
    pub fd: i32,
    pub kind: RedirectKind,
    /// Pre-expansion fragment list for the target (§4.3 step 4 input). Empty
    /// for a fd-duplication target (`2>&1`), which is fully resolved at
    /// parse time instead (no word to expand).
    pub target_word: Word,
    /// Filled in by the expander; `None` before expansion runs. Already
    /// `Some` at construction time for fd-duplication targets.
    pub resolved: Option<RedirectTarget>,
}

impl Redirection {
    pub fn new(fd: i32, kind: RedirectKind, target_word: Word) -> Self {
        Redirection {
            fd,
            kind,
            target_word,
            resolved: None,
        }
    }

    /// `N>&M` / `>&M` — duplicate fd `target_fd` onto `fd` (§4.2 Expansion).
    /// Resolved immediately; the expander's redirection-target pass skips
    /// any `Redirection` that already carries a `resolved` value.
    pub fn new_dup(fd: i32, kind: RedirectKind, target_fd: i32) -> Self {
        Redirection {
            fd,
            kind,
            target_word: Vec::new(),
            resolved: Some(RedirectTarget::DupFd(target_fd)),
        }
    }
}

/// Check if a path refers to a null device (cross-platform, per teacher).
pub fn is_null_device(path: &str) -> bool {
    if cfg!(windows) {
        path.eq_ignore_ascii_case("NUL") || path.eq_ignore_ascii_case("/dev/null")
    } else {
        path == "/dev/null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fds_match_spec() {
        assert_eq!(RedirectKind::In.default_fd(), 0);
        assert_eq!(RedirectKind::Out.default_fd(), 1);
        assert_eq!(RedirectKind::Append.default_fd(), 1);
    }

    #[test]
    fn null_device_detection() {
        assert!(is_null_device("/dev/null"));
        assert!(!is_null_device("/dev/null1"));
    }
}
