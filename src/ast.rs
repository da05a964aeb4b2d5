//! The command tree: the shared vocabulary between the parser, the expander,
//! and the executor.

use crate::redirect::Redirection;

/// Quote context a word fragment was lexed under. Controls which expansion
/// passes apply to it (§4.3): single quotes suppress everything, double
/// quotes suppress tilde and glob, unquoted fragments get the full pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteContext {
    None,
    Single,
    Double,
}

/// One piece of a word. `value` is already escape-decoded; concatenating the
/// `value`s of every fragment in a word reproduces the post-escape,
/// pre-expansion text (§3 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordFragment {
    Literal { value: String, quote: QuoteContext },
    Parameter { value: String, quote: QuoteContext },
    Tilde { value: String, quote: QuoteContext },
    Glob { value: String, quote: QuoteContext },
}

impl WordFragment {
    pub fn value(&self) -> &str {
        match self {
            WordFragment::Literal { value, .. }
            | WordFragment::Parameter { value, .. }
            | WordFragment::Tilde { value, .. }
            | WordFragment::Glob { value, .. } => value,
        }
    }

    pub fn quote(&self) -> QuoteContext {
        match self {
            WordFragment::Literal { quote, .. }
            | WordFragment::Parameter { quote, .. }
            | WordFragment::Tilde { quote, .. }
            | WordFragment::Glob { quote, .. } => *quote,
        }
    }
}

/// A shell word: an ordered sequence of typed fragments (§3).
pub type Word = Vec<WordFragment>;

/// Connector gating whether a chain entry runs, based on the previous exit
/// status (§3, §4.2 grammar).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `&&` — run only if the previous command succeeded.
    And,
    /// `||` — run only if the previous command failed.
    Or,
}

/// A single parsed, not-yet-expanded command: program + argument words plus
/// its redirections (§3 "Command node").
#[derive(Debug, Clone)]
pub struct Command {
    /// Pre-expansion argv, one `Word` per source token.
    pub words: Vec<Word>,
    /// Post-expansion argv. Empty until the expander runs; may contain more
    /// entries than `words` once globs have split into multiple matches.
    pub argv: Vec<String>,
    pub redirections: Vec<Redirection>,
    pub background: bool,
    /// Original source text, kept for `jobs`/history display (§3 Ownership).
    pub raw_str: String,
    /// Set by the expander when a command is invalidated (unresolved
    /// `~user`, a glob with no match) and must not be forked (§4.3, §7).
    pub invalid: bool,
}

impl Command {
    pub fn new(words: Vec<Word>, redirections: Vec<Redirection>, raw_str: String) -> Self {
        Command {
            words,
            argv: Vec::new(),
            redirections,
            background: false,
            raw_str,
            invalid: false,
        }
    }
}

/// An ordered list of commands joined by `|` (§3 "Pipeline"). A length-1
/// pipeline is collapsed to a bare `Command` at parse time and never
/// constructed as a `Tree::Pipeline` (§4.2 invariant).
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// The command tree (§3 "Tree node").
#[derive(Debug, Clone)]
pub enum Tree {
    Sequence(Vec<Tree>),
    Conditional {
        left: Box<Tree>,
        right: Box<Tree>,
        op: Connector,
    },
    Pipeline(Pipeline),
    Command(Command),
}

impl Tree {
    /// Attach a trailing `&` to whichever command(s) this node's trailing
    /// pipeline owns. Resolves the §9 Open Question ("whether `&` marks only
    /// the preceding command or the entire preceding conditional group") by
    /// scoping to the last pipeline of the conditional chain — see
    /// SPEC_FULL.md §4.2.
    pub fn set_background(&mut self, background: bool) {
        match self {
            Tree::Command(cmd) => cmd.background = background,
            Tree::Pipeline(p) => {
                for cmd in &mut p.commands {
                    cmd.background = background;
                }
            }
            Tree::Conditional { right, .. } => right.set_background(background),
            Tree::Sequence(children) => {
                if let Some(last) = children.last_mut() {
                    last.set_background(background);
                }
            }
        }
    }
}
