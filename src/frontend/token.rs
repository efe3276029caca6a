use serde::{Deserialize, Serialize};

use crate::lang::data_type::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    StringLiteral,
    BooleanLiteral,
    ByteLiteral,
    ShortLiteral,
    IntegerLiteral,
    LongLiteral,
    FloatLiteral,
    DoubleLiteral,

    Identifier,

    // Type keywords
    Object,
    String,
    Bool,
    Byte,
    Int,
    Short,
    Float,
    Long,
    Double,
    Void,
    Null,

    // Declaration keywords
    State,
    Event,
    Engine,
    Editor,
    Default,
    Thread,
    Console,
    Import,
    Export,
    Static,
    Const,
    Property,
    Public,
    Private,
    Protected,
    Enum,
    Namespace,

    // Statement keywords
    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Return,
    Break,
    Continue,
    Goto,
    GotoState,
    Lock,
    Atom,
    Breakpoint,
    New,
    Indexer,

    // Arithmetic / bitwise
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Pipe,
    Ampersand,
    Tilde,
    ShiftLeft,
    ShiftRight,
    Increment,
    Decrement,

    // Logic / comparison
    Not,
    LogicalAnd,
    LogicalOr,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    CaretAssign,
    PipeAssign,
    AmpersandAssign,
    ShiftLeftAssign,
    ShiftRightAssign,

    // Punctuation
    Arrow,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Period,
    Colon,
    Hash,
}

impl TokenKind {
    /// Reserved-word lookup; the match is case-insensitive.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        use TokenKind::*;
        let lower = ident.to_ascii_lowercase();
        Some(match lower.as_str() {
            "object" => Object,
            "string" => String,
            "bool" => Bool,
            "byte" => Byte,
            "int" => Int,
            "short" => Short,
            "float" => Float,
            "long" => Long,
            "double" => Double,
            "void" => Void,
            "null" => Null,
            "true" | "false" => BooleanLiteral,
            "state" => State,
            "event" => Event,
            "engine" => Engine,
            "editor" => Editor,
            "default" => Default,
            "thread" => Thread,
            "console" => Console,
            "import" => Import,
            "export" => Export,
            "static" => Static,
            "const" => Const,
            "property" => Property,
            "public" => Public,
            "private" => Private,
            "protected" => Protected,
            "enum" => Enum,
            "namespace" => Namespace,
            "if" => If,
            "else" => Else,
            "while" => While,
            "do" => Do,
            "for" => For,
            "switch" => Switch,
            "case" => Case,
            "return" => Return,
            "break" => Break,
            "continue" => Continue,
            "goto" => Goto,
            "gotostate" => GotoState,
            "lock" => Lock,
            "atom" => Atom,
            "breakpoint" => Breakpoint,
            "new" => New,
            "indexer" => Indexer,
            _ => return None,
        })
    }

    /// Canonical source text for fixed tokens; `None` for literals and
    /// identifiers.
    pub fn symbol(self) -> Option<&'static str> {
        use TokenKind::*;
        Some(match self {
            StringLiteral | BooleanLiteral | ByteLiteral | ShortLiteral | IntegerLiteral
            | LongLiteral | FloatLiteral | DoubleLiteral | Identifier => return None,
            Object => "object",
            String => "string",
            Bool => "bool",
            Byte => "byte",
            Int => "int",
            Short => "short",
            Float => "float",
            Long => "long",
            Double => "double",
            Void => "void",
            Null => "null",
            State => "state",
            Event => "event",
            Engine => "engine",
            Editor => "editor",
            Default => "default",
            Thread => "thread",
            Console => "console",
            Import => "import",
            Export => "export",
            Static => "static",
            Const => "const",
            Property => "property",
            Public => "public",
            Private => "private",
            Protected => "protected",
            Enum => "enum",
            Namespace => "namespace",
            If => "if",
            Else => "else",
            While => "while",
            Do => "do",
            For => "for",
            Switch => "switch",
            Case => "case",
            Return => "return",
            Break => "break",
            Continue => "continue",
            Goto => "goto",
            GotoState => "gotostate",
            Lock => "lock",
            Atom => "atom",
            Breakpoint => "breakpoint",
            New => "new",
            Indexer => "indexer",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            Caret => "^",
            Pipe => "|",
            Ampersand => "&",
            Tilde => "~",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            Increment => "++",
            Decrement => "--",
            Not => "!",
            LogicalAnd => "&&",
            LogicalOr => "||",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            Greater => ">",
            LessEqual => "<=",
            GreaterEqual => ">=",
            Assign => "=",
            PlusAssign => "+=",
            MinusAssign => "-=",
            StarAssign => "*=",
            SlashAssign => "/=",
            PercentAssign => "%=",
            CaretAssign => "^=",
            PipeAssign => "|=",
            AmpersandAssign => "&=",
            ShiftLeftAssign => "<<=",
            ShiftRightAssign => ">>=",
            Arrow => "->",
            LParen => "(",
            RParen => ")",
            LBrace => "{",
            RBrace => "}",
            LBracket => "[",
            RBracket => "]",
            Semicolon => ";",
            Comma => ",",
            Period => ".",
            Colon => ":",
            Hash => "#",
        })
    }

    /// Human readable name used in diagnostics.
    pub fn describe(self) -> std::string::String {
        use TokenKind::*;
        match self {
            StringLiteral => "string literal".to_string(),
            BooleanLiteral => "boolean literal".to_string(),
            ByteLiteral | ShortLiteral | IntegerLiteral | LongLiteral | FloatLiteral
            | DoubleLiteral => "numeric literal".to_string(),
            Identifier => "identifier".to_string(),
            other => format!("'{}'", other.symbol().unwrap_or("?")),
        }
    }

    pub fn is_literal(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            StringLiteral
                | BooleanLiteral
                | ByteLiteral
                | ShortLiteral
                | IntegerLiteral
                | LongLiteral
                | FloatLiteral
                | DoubleLiteral
        )
    }

    pub fn is_keyword(self) -> bool {
        !self.is_literal() && self != TokenKind::Identifier && self.symbol().map_or(false, |s| {
            s.chars().all(|c| c.is_ascii_alphabetic())
        })
    }

    /// Primitive named by a type keyword.
    pub fn data_type(self) -> Option<DataType> {
        use TokenKind::*;
        Some(match self {
            Object => DataType::Object,
            String => DataType::String,
            Bool => DataType::Bool,
            Byte => DataType::Byte,
            Int => DataType::Int,
            Short => DataType::Short,
            Float => DataType::Float,
            Long => DataType::Long,
            Double => DataType::Double,
            Void => DataType::Void,
            _ => return None,
        })
    }

    /// Type a literal token of this kind produces.
    pub fn literal_type(self) -> Option<DataType> {
        use TokenKind::*;
        Some(match self {
            StringLiteral => DataType::String,
            BooleanLiteral => DataType::Bool,
            ByteLiteral => DataType::Byte,
            ShortLiteral => DataType::Short,
            IntegerLiteral => DataType::Int,
            LongLiteral => DataType::Long,
            FloatLiteral => DataType::Float,
            DoubleLiteral => DataType::Double,
            Null => DataType::Null,
            _ => return None,
        })
    }

    pub fn is_assignment(self) -> bool {
        self == TokenKind::Assign || self.compound_operator().is_some()
    }

    /// For a compound assignment, the binary operator it applies.
    pub fn compound_operator(self) -> Option<TokenKind> {
        use TokenKind::*;
        Some(match self {
            PlusAssign => Plus,
            MinusAssign => Minus,
            StarAssign => Star,
            SlashAssign => Slash,
            PercentAssign => Percent,
            CaretAssign => Caret,
            PipeAssign => Pipe,
            AmpersandAssign => Ampersand,
            ShiftLeftAssign => ShiftLeft,
            ShiftRightAssign => ShiftRight,
            _ => return None,
        })
    }
}

/// One lexical token with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Identifier or keyword as written, decoded string contents, or the
    /// digits of a number without its type suffix.
    pub text: String,
    pub line: usize,
    pub offset: usize,
    pub file: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, offset: usize, file: &str) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            offset,
            file: file.to_string(),
        }
    }

    /// Source text that lexes back to this token.
    pub fn render(&self) -> String {
        match self.kind {
            TokenKind::StringLiteral => format!("\"{}\"", escape(&self.text)),
            TokenKind::ByteLiteral => format!("{}b", self.text),
            TokenKind::ShortLiteral => format!("{}s", self.text),
            TokenKind::LongLiteral => format!("{}l", self.text),
            TokenKind::DoubleLiteral => format!("{}d", self.text),
            TokenKind::FloatLiteral if !self.text.contains('.') => format!("{}f", self.text),
            _ => self.text.clone(),
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Inverse of the lexer's escape decoding.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{b}' => out.push_str("\\v"),
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup_ignores_case() {
        assert_eq!(TokenKind::keyword("While"), Some(TokenKind::While));
        assert_eq!(TokenKind::keyword("GOTOSTATE"), Some(TokenKind::GotoState));
        assert_eq!(TokenKind::keyword("TRUE"), Some(TokenKind::BooleanLiteral));
        assert_eq!(TokenKind::keyword("whilst"), None);
    }

    #[test]
    fn test_compound_operator() {
        assert_eq!(
            TokenKind::ShiftLeftAssign.compound_operator(),
            Some(TokenKind::ShiftLeft)
        );
        assert!(TokenKind::Assign.is_assignment());
        assert!(!TokenKind::Equal.is_assignment());
    }

    #[test]
    fn test_render_literals() {
        let t = Token::new(TokenKind::LongLiteral, "0x1F", 1, 1, "a.ks");
        assert_eq!(t.render(), "0x1Fl");
        let t = Token::new(TokenKind::StringLiteral, "a\"b\n", 1, 1, "a.ks");
        assert_eq!(t.render(), "\"a\\\"b\\n\"");
        let t = Token::new(TokenKind::FloatLiteral, "1.5", 1, 1, "a.ks");
        assert_eq!(t.render(), "1.5");
    }

    #[test]
    fn test_keywords_are_alphabetic() {
        assert!(TokenKind::Indexer.is_keyword());
        assert!(!TokenKind::Arrow.is_keyword());
        assert!(!TokenKind::Identifier.is_keyword());
    }
}
