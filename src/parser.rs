//! §4.2 Parser — recursive descent over the lexer's token stream, building a
//! [`Tree`] per the grammar:
//!
//! ```text
//! line        := sequence end
//! sequence    := conditional ((';'|'&') conditional)* (';'|'&')?
//! conditional := pipeline (('&&'|'||') pipeline)*
//! pipeline    := command ('|' command)+ | command
//! command     := word+ redirection*
//! redirection := fd? ('<'|'>'|'>>') word
//! ```

use crate::ast::{Command, Connector, Pipeline, Tree};
use crate::lexer::{self, Token, TokenKind};
use crate::redirect::{RedirectKind, RedirectTarget, Redirection};

pub struct ParseError(pub String);

impl ParseError {
    fn unexpected(tok: &Token) -> Self {
        match &tok.kind {
            TokenKind::End => ParseError("jsh: syntax error: unexpected end of input".into()),
            kind => ParseError(format!(
                "jsh: syntax error near unexpected token `{}'",
                kind.display()
            )),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse one input line into a `Tree`. Returns `Ok(None)` for a line with no
/// commands (blank, or all whitespace/comments at the lexer level).
pub fn parse_line(input: &str) -> Result<Option<Tree>, ParseError> {
    let tokens = lexer::tokenize(input);
    let mut parser = Parser { tokens, pos: 0 };
    if matches!(parser.peek().kind, TokenKind::End) {
        return Ok(None);
    }
    let tree = parser.parse_sequence()?;
    parser.expect_end()?;
    Ok(Some(tree))
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek().kind, TokenKind::End) {
            Ok(())
        } else {
            Err(ParseError::unexpected(self.peek()))
        }
    }

    /// `sequence := conditional ((';'|'&') conditional)* (';'|'&')?`
    ///
    /// A run of consecutive separators collapses (no empty commands between
    /// them); a trailing `&` marks the preceding conditional's last pipeline
    /// as backgrounded (§4.2, resolving the Open Question on `&` scope).
    fn parse_sequence(&mut self) -> Result<Tree, ParseError> {
        let mut nodes = Vec::new();

        loop {
            if matches!(
                self.peek().kind,
                TokenKind::Semicolon | TokenKind::Background | TokenKind::End
            ) {
                break;
            }
            let mut node = self.parse_conditional()?;

            match self.peek().kind {
                TokenKind::Background => {
                    self.advance();
                    node.set_background(true);
                    nodes.push(node);
                    if matches!(self.peek().kind, TokenKind::Semicolon) {
                        self.advance();
                    }
                }
                TokenKind::Semicolon => {
                    self.advance();
                    nodes.push(node);
                }
                _ => {
                    nodes.push(node);
                    break;
                }
            }
        }

        if nodes.len() == 1 {
            Ok(nodes.into_iter().next().unwrap())
        } else {
            Ok(Tree::Sequence(nodes))
        }
    }

    /// `conditional := pipeline (('&&'|'||') pipeline)*`, left-associative.
    fn parse_conditional(&mut self) -> Result<Tree, ParseError> {
        let mut left = self.parse_pipeline()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::LogicalAnd => Connector::And,
                TokenKind::LogicalOr => Connector::Or,
                _ => break,
            };
            self.advance();
            if matches!(
                self.peek().kind,
                TokenKind::Semicolon | TokenKind::Background | TokenKind::End
            ) {
                return Err(ParseError::unexpected(self.peek()));
            }
            let right = self.parse_pipeline()?;
            left = Tree::Conditional {
                left: Box::new(left),
                right: Box::new(right),
                op,
            };
        }

        Ok(left)
    }

    /// `pipeline := command ('|' command)+ | command`. A length-1 pipeline
    /// collapses to a bare `Tree::Command` (§4.2 invariant).
    fn parse_pipeline(&mut self) -> Result<Tree, ParseError> {
        let mut commands = vec![self.parse_command()?];

        while matches!(self.peek().kind, TokenKind::Pipe) {
            self.advance();
            if matches!(
                self.peek().kind,
                TokenKind::Semicolon
                    | TokenKind::Background
                    | TokenKind::End
                    | TokenKind::LogicalAnd
                    | TokenKind::LogicalOr
            ) {
                return Err(ParseError::unexpected(self.peek()));
            }
            commands.push(self.parse_command()?);
        }

        if commands.len() == 1 {
            Ok(Tree::Command(commands.into_iter().next().unwrap()))
        } else {
            Ok(Tree::Pipeline(Pipeline { commands }))
        }
    }

    /// `command := word+ redirection*`. Words and redirections may interleave
    /// in the source; this loop keeps consuming either until a terminator.
    fn parse_command(&mut self) -> Result<Command, ParseError> {
        let mut words = Vec::new();
        let mut redirections = Vec::new();
        let mut raw_parts: Vec<String> = Vec::new();

        loop {
            match &self.peek().kind {
                TokenKind::Word(_) => {
                    let tok = self.advance();
                    raw_parts.push(tok.raw);
                    let TokenKind::Word(word) = tok.kind else {
                        unreachable!()
                    };
                    words.push(word);
                }
                TokenKind::FdNumber(_) => {
                    // An fd number not immediately consumed by a following
                    // redirection operator degrades to an ordinary word (the
                    // lexer only retypes it speculatively).
                    let TokenKind::FdNumber(n) = self.peek().kind else {
                        unreachable!()
                    };
                    if !matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.kind),
                        Some(TokenKind::RedirectIn)
                            | Some(TokenKind::RedirectOut)
                            | Some(TokenKind::RedirectAppend)
                            | Some(TokenKind::HereString)
                    ) {
                        let tok = self.advance();
                        raw_parts.push(tok.raw.clone());
                        words.push(vec![crate::ast::WordFragment::Literal {
                            value: tok.raw,
                            quote: crate::ast::QuoteContext::None,
                        }]);
                        continue;
                    }
                    self.advance();
                    let redir = self.parse_redirection(Some(n))?;
                    raw_parts.push(redirection_raw(&redir));
                    redirections.push(redir);
                }
                TokenKind::RedirectIn
                | TokenKind::RedirectOut
                | TokenKind::RedirectAppend
                | TokenKind::HereString => {
                    let redir = self.parse_redirection(None)?;
                    raw_parts.push(redirection_raw(&redir));
                    redirections.push(redir);
                }
                _ => break,
            }
        }

        if words.is_empty() && redirections.is_empty() {
            return Err(ParseError::unexpected(self.peek()));
        }
        if words.is_empty() {
            return Err(ParseError(
                "jsh: syntax error: redirection with no command".into(),
            ));
        }

        Ok(Command::new(words, redirections, raw_parts.join(" ")))
    }

    fn parse_redirection(&mut self, fd: Option<i32>) -> Result<Redirection, ParseError> {
        let op = self.advance();
        let kind = match op.kind {
            TokenKind::RedirectIn => RedirectKind::In,
            TokenKind::RedirectOut => RedirectKind::Out,
            TokenKind::RedirectAppend => RedirectKind::Append,
            TokenKind::HereString => RedirectKind::HereString,
            _ => unreachable!("parse_redirection called on non-redirect token"),
        };
        let target_fd = fd.unwrap_or_else(|| kind.default_fd());

        // `N>&M` / `>&M` fd duplication (§4.2 Expansion). The lexer has no
        // notion of "redirect context", so `&M` always lexes as a separate
        // `Background` token immediately followed by a digit word; seeing
        // that pair right after a redirect operator is unambiguous (a literal
        // unquoted `&` can never otherwise start a word).
        if matches!(self.peek().kind, TokenKind::Background) {
            self.advance();
            let digits = match &self.peek().kind {
                TokenKind::Word(word) => word.iter().map(|f| f.value()).collect::<String>(),
                _ => return Err(ParseError::unexpected(self.peek())),
            };
            let dup_fd: i32 = digits.parse().map_err(|_| {
                ParseError(format!(
                    "jsh: syntax error: invalid fd duplication target `&{digits}'"
                ))
            })?;
            self.advance();
            return Ok(Redirection::new_dup(target_fd, kind, dup_fd));
        }

        let target = match &self.peek().kind {
            TokenKind::Word(_) => {
                let tok = self.advance();
                let TokenKind::Word(word) = tok.kind else {
                    unreachable!()
                };
                word
            }
            _ => return Err(ParseError::unexpected(self.peek())),
        };
        Ok(Redirection::new(target_fd, kind, target))
    }
}

fn redirection_raw(redir: &Redirection) -> String {
    let op = match redir.kind {
        RedirectKind::In => "<",
        RedirectKind::Out => ">",
        RedirectKind::Append => ">>",
        RedirectKind::HereString => "<<<",
    };
    if let Some(RedirectTarget::DupFd(target)) = &redir.resolved {
        return format!("{}{op}&{target}", redir.fd);
    }
    let target: String = redir.target_word.iter().map(|f| f.value()).collect();
    format!("{}{op}{target}", redir.fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Tree {
        parse_line(input).expect("parse error").expect("empty line")
    }

    fn commands_in(tree: &Tree) -> Vec<&Command> {
        match tree {
            Tree::Command(c) => vec![c],
            Tree::Pipeline(p) => p.commands.iter().collect(),
            Tree::Conditional { left, right, .. } => {
                let mut v = commands_in(left);
                v.extend(commands_in(right));
                v
            }
            Tree::Sequence(nodes) => nodes.iter().flat_map(commands_in).collect(),
        }
    }

    fn argv_words(cmd: &Command) -> Vec<String> {
        cmd.words
            .iter()
            .map(|w| w.iter().map(|f| f.value()).collect())
            .collect()
    }

    #[test]
    fn simple_command() {
        let tree = parse("echo hello world");
        let Tree::Command(cmd) = &tree else {
            panic!("expected bare command")
        };
        assert_eq!(argv_words(cmd), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn pipeline_collapses_single_command() {
        let tree = parse("echo hi");
        assert!(matches!(tree, Tree::Command(_)));
    }

    #[test]
    fn two_stage_pipeline() {
        let tree = parse("ls | wc -l");
        let Tree::Pipeline(p) = &tree else {
            panic!("expected pipeline")
        };
        assert_eq!(p.commands.len(), 2);
    }

    #[test]
    fn and_or_left_associative() {
        let tree = parse("false && echo skipped || echo ran");
        let Tree::Conditional { op, left, .. } = &tree else {
            panic!("expected conditional")
        };
        assert_eq!(*op, Connector::Or);
        assert!(matches!(**left, Tree::Conditional { op: Connector::And, .. }));
    }

    #[test]
    fn sequence_of_three() {
        let tree = parse("echo a; echo b; echo c");
        let Tree::Sequence(nodes) = &tree else {
            panic!("expected sequence")
        };
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn trailing_ampersand_backgrounds_last_pipeline() {
        let tree = parse("sleep 1 &");
        let Tree::Command(cmd) = &tree else {
            panic!("expected command")
        };
        assert!(cmd.background);
    }

    #[test]
    fn background_scopes_to_last_pipeline_of_conditional() {
        let tree = parse("a && b &");
        let Tree::Conditional { left, right, .. } = &tree else {
            panic!("expected conditional")
        };
        let Tree::Command(left_cmd) = &**left else {
            panic!()
        };
        let Tree::Command(right_cmd) = &**right else {
            panic!()
        };
        assert!(!left_cmd.background);
        assert!(right_cmd.background);
    }

    #[test]
    fn redirections_attach_to_command() {
        let tree = parse("sort < in.txt > out.txt 2>> err.txt");
        let Tree::Command(cmd) = &tree else {
            panic!("expected command")
        };
        assert_eq!(cmd.redirections.len(), 3);
        assert_eq!(cmd.redirections[0].fd, 0);
        assert_eq!(cmd.redirections[1].fd, 1);
        assert_eq!(cmd.redirections[2].fd, 2);
        assert_eq!(cmd.redirections[2].kind, RedirectKind::Append);
    }

    #[test]
    fn fd_duplication_redirection() {
        let tree = parse("echo hi 2>&1");
        let Tree::Command(cmd) = &tree else {
            panic!("expected command")
        };
        assert_eq!(cmd.redirections.len(), 1);
        assert_eq!(cmd.redirections[0].fd, 2);
        assert!(matches!(
            cmd.redirections[0].resolved,
            Some(crate::redirect::RedirectTarget::DupFd(1))
        ));
    }

    #[test]
    fn fd_duplication_without_explicit_source_fd_defaults_to_stdout() {
        let tree = parse("echo hi >&2");
        let Tree::Command(cmd) = &tree else {
            panic!("expected command")
        };
        assert_eq!(cmd.redirections[0].fd, 1);
        assert!(matches!(
            cmd.redirections[0].resolved,
            Some(crate::redirect::RedirectTarget::DupFd(2))
        ));
    }

    #[test]
    fn here_string_redirection() {
        let tree = parse("cat <<< hello");
        let Tree::Command(cmd) = &tree else {
            panic!("expected command")
        };
        assert_eq!(cmd.redirections[0].kind, RedirectKind::HereString);
        assert_eq!(cmd.redirections[0].fd, 0);
    }

    #[test]
    fn leading_operator_is_error() {
        assert!(parse_line("&& echo hi").is_err());
    }

    #[test]
    fn trailing_operator_is_error() {
        assert!(parse_line("echo hi &&").is_err());
    }

    #[test]
    fn dangling_pipe_is_error() {
        assert!(parse_line("echo hi |").is_err());
    }

    #[test]
    fn redirection_without_command_is_error() {
        assert!(parse_line("> out.txt").is_err());
    }

    #[test]
    fn blank_line_is_none() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn pipe_and_conditional_combine() {
        let tree = parse("ls | grep x && echo found");
        let Tree::Conditional { left, right, op } = &tree else {
            panic!("expected conditional")
        };
        assert_eq!(*op, Connector::And);
        assert!(matches!(**left, Tree::Pipeline(_)));
        assert!(matches!(**right, Tree::Command(_)));
    }

    #[test]
    fn all_commands_found() {
        let tree = parse("a | b && c || d; e");
        assert_eq!(commands_in(&tree).len(), 5);
    }
}
