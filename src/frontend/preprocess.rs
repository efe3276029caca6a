//! Preprocessor boundary.
//!
//! Macro and include expansion live outside the compiler. The compiler only
//! needs something implementing [`Preprocessor`]; [`PassThrough`] is used when
//! no external preprocessor is configured.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::frontend::token::{Token, TokenKind};
use crate::lang::diagnostic::{AlertLevel, Diagnostics, ErrorCode};
use crate::lang::flags::CompileFlags;

/// A `#define`-style entry, either passed in or produced by expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Define {
    pub identifier: String,
    pub value: String,
}

impl Define {
    pub fn new(identifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Define {
    type Err = String;

    /// Parses `NAME` or `NAME=VALUE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => (name, value),
            None => (s, ""),
        };
        let valid = name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
        if name.is_empty() || !valid {
            return Err(format!("'{}' is not a valid define name", name));
        }
        Ok(Define::new(name, value))
    }
}

/// Output of a preprocessing run.
#[derive(Debug)]
pub struct Preprocessed {
    pub tokens: Vec<Token>,
    pub defines: Vec<Define>,
    pub diagnostics: Diagnostics,
}

pub trait Preprocessor {
    fn process(
        &mut self,
        tokens: Vec<Token>,
        flags: CompileFlags,
        defines: &[Define],
        include_paths: &[PathBuf],
    ) -> Preprocessed;
}

/// Forwards tokens untouched. Directives are reported and dropped up to the
/// end of their line.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Preprocessor for PassThrough {
    fn process(
        &mut self,
        tokens: Vec<Token>,
        flags: CompileFlags,
        defines: &[Define],
        _include_paths: &[PathBuf],
    ) -> Preprocessed {
        let mut diagnostics = Diagnostics::new(flags);
        let mut out = Vec::with_capacity(tokens.len());
        let mut directive_line: Option<(usize, String)> = None;

        for token in tokens {
            if let Some((line, file)) = &directive_line {
                if token.line == *line && token.file == *file {
                    continue;
                }
                directive_line = None;
            }
            if token.kind == TokenKind::Hash {
                diagnostics.report(
                    ErrorCode::UnsupportedDirective,
                    AlertLevel::Error,
                    "preprocessor directives require an external preprocessor",
                    token.line,
                    token.offset,
                    &token.file,
                );
                directive_line = Some((token.line, token.file));
                continue;
            }
            out.push(token);
        }

        Preprocessed {
            tokens: out,
            defines: defines.to_vec(),
            diagnostics,
        }
    }
}
