use serde::Serialize;

use crate::lang::flags::CompileFlags;

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Message,
    Warning,
    Error,
    FatalError,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertLevel::Message => "message",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::FatalError => "fatal error",
        };
        write!(f, "{}", s)
    }
}

/// Every problem the lexer or compiler can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    // lexical
    InvalidCharacter,
    UnfinishedStringLiteral,
    InvalidEscapeSequence,
    MalformedDataTypeSpecifier,
    MalformedNumber,
    UnfinishedComment,

    // syntactic
    UnexpectedToken,
    ExpectingToken,
    ExpectingExpression,
    UnexpectedEndOfFile,

    // semantic
    UndeclaredSymbol,
    InvalidFunction,
    InvalidCast,
    InvalidOperator,
    InvalidScope,
    DuplicateSymbol,
    InvalidIndex,
    IllegalAssignment,
    MissingDefaultState,
    DuplicateDefaultState,
    InvalidFlags,
    InvalidParameter,
    InvalidReturn,
    InvalidBreak,
    InvalidContinue,
    InvalidLabel,
    InvalidState,
    InvalidIndexer,
    NestedLock,
    NestedAtom,
    InvalidLiteral,
    UnsupportedDirective,
    UnusedSymbol,
    ImplicitCast,

    InternalError,
}

/// One reported problem with its source position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    pub level: AlertLevel,
    pub line: usize,
    pub offset: usize,
    pub file: String,
}

impl std::fmt::Display for Diagnostic {
    /// Formats as `file:line:offset: level[code]: message`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}[{:?}]: {}",
            self.file, self.line, self.offset, self.level, self.code, self.message
        )
    }
}

/// Ordered diagnostic list for one compilation.
///
/// Levels are escalated on insertion according to the
/// `TREAT_*_AS_ERRORS` flags, so counts always reflect effective severity.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    flags: CompileFlags,
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(flags: CompileFlags) -> Self {
        Self {
            flags,
            items: Vec::new(),
        }
    }

    /// Records a diagnostic and returns the level it was stored with.
    pub fn push(&mut self, mut diagnostic: Diagnostic) -> AlertLevel {
        diagnostic.level = self.escalate(diagnostic.level);
        let level = diagnostic.level;
        self.items.push(diagnostic);
        level
    }

    pub fn report(
        &mut self,
        code: ErrorCode,
        level: AlertLevel,
        message: impl Into<String>,
        line: usize,
        offset: usize,
        file: &str,
    ) -> AlertLevel {
        self.push(Diagnostic {
            code,
            message: message.into(),
            level,
            line,
            offset,
            file: file.to_string(),
        })
    }

    fn escalate(&self, level: AlertLevel) -> AlertLevel {
        match level {
            AlertLevel::Warning if self.flags.contains(CompileFlags::TREAT_WARNINGS_AS_ERRORS) => {
                AlertLevel::FatalError
            }
            AlertLevel::Message if self.flags.contains(CompileFlags::TREAT_MESSAGES_AS_ERRORS) => {
                AlertLevel::FatalError
            }
            other => other,
        }
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for d in other.items {
            self.push(d);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.count(|l| l >= AlertLevel::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(|l| l == AlertLevel::Warning)
    }

    pub fn message_count(&self) -> usize {
        self.count(|l| l == AlertLevel::Message)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn has_fatal(&self) -> bool {
        self.items.iter().any(|d| d.level == AlertLevel::FatalError)
    }

    /// Number of diagnostics carrying `code`.
    pub fn count_code(&self, code: ErrorCode) -> usize {
        self.items.iter().filter(|d| d.code == code).count()
    }

    fn count(&self, pred: impl Fn(AlertLevel) -> bool) -> usize {
        self.items.iter().filter(|d| pred(d.level)).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} error(s), {} warning(s), {} message(s)",
            self.error_count(),
            self.warning_count(),
            self.message_count()
        )
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(d: &mut Diagnostics, level: AlertLevel) -> AlertLevel {
        d.report(ErrorCode::UnusedSymbol, level, "x", 1, 1, "a.ks")
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(AlertLevel::Message < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::FatalError);
    }

    #[test]
    fn test_counts() {
        let mut d = Diagnostics::new(CompileFlags::empty());
        push(&mut d, AlertLevel::Message);
        push(&mut d, AlertLevel::Warning);
        push(&mut d, AlertLevel::Error);
        push(&mut d, AlertLevel::FatalError);
        assert_eq!(d.error_count(), 2);
        assert_eq!(d.warning_count(), 1);
        assert_eq!(d.message_count(), 1);
        assert_eq!(d.summary(), "2 error(s), 1 warning(s), 1 message(s)");
    }

    #[test]
    fn test_warnings_escalate() {
        let mut d = Diagnostics::new(CompileFlags::TREAT_WARNINGS_AS_ERRORS);
        assert_eq!(push(&mut d, AlertLevel::Warning), AlertLevel::FatalError);
        assert_eq!(push(&mut d, AlertLevel::Message), AlertLevel::Message);
        assert!(d.has_fatal());
    }

    #[test]
    fn test_messages_escalate() {
        let mut d = Diagnostics::new(CompileFlags::TREAT_MESSAGES_AS_ERRORS);
        assert_eq!(push(&mut d, AlertLevel::Message), AlertLevel::FatalError);
        assert_eq!(push(&mut d, AlertLevel::Warning), AlertLevel::Warning);
    }

    #[test]
    fn test_display_format() {
        let mut d = Diagnostics::new(CompileFlags::empty());
        d.report(
            ErrorCode::InvalidFunction,
            AlertLevel::Error,
            "no function named 'foo'",
            3,
            5,
            "main.ks",
        );
        let text = d.iter().next().unwrap().to_string();
        assert_eq!(
            text,
            "main.ks:3:5: error[InvalidFunction]: no function named 'foo'"
        );
    }
}
