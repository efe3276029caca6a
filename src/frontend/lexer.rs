use crate::frontend::token::{Token, TokenKind};
use crate::lang::diagnostic::{AlertLevel, Diagnostics, ErrorCode};
use crate::lang::flags::CompileFlags;

/// Tokenizes `source`, collecting every lexical problem instead of stopping
/// at the first one.
pub fn analyse(source: &str, flags: CompileFlags, file: &str) -> (Vec<Token>, Diagnostics) {
    let mut lexer = Lexer::new(source, flags, file);
    lexer.tokenize();
    (lexer.tokens, lexer.diagnostics)
}

pub struct Lexer<'f> {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    file: &'f str,
    tokens: Vec<Token>,
    diagnostics: Diagnostics,
}

impl<'f> Lexer<'f> {
    pub fn new(source: &str, flags: CompileFlags, file: &'f str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            file,
            tokens: Vec::new(),
            diagnostics: Diagnostics::new(flags),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn error(&mut self, code: ErrorCode, message: String, line: usize, col: usize) {
        self.diagnostics
            .report(code, AlertLevel::Error, message, line, col, self.file);
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, line: usize, col: usize) {
        self.tokens
            .push(Token::new(kind, text, line, col, self.file));
    }

    /// Panic mode: drop everything up to the next whitespace.
    fn recover(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Skips a `/* */` comment, honouring nested openers.
    fn skip_block_comment(&mut self) {
        let (line, col) = (self.line, self.col);
        self.advance();
        self.advance();
        let mut depth = 1usize;
        while depth > 0 {
            match (self.current(), self.peek()) {
                (Some('/'), Some('*')) => {
                    self.advance();
                    self.advance();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.advance();
                    self.advance();
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.advance();
                }
                (None, _) => {
                    self.error(
                        ErrorCode::UnfinishedComment,
                        "comment is not closed before end of file".to_string(),
                        line,
                        col,
                    );
                    return;
                }
            }
        }
    }

    fn read_string(&mut self) {
        let (line, col) = (self.line, self.col);
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    self.push(TokenKind::StringLiteral, string, line, col);
                    return;
                }
                Some('\\') => {
                    let (esc_line, esc_col) = (self.line, self.col);
                    self.advance();
                    let decoded = match self.current() {
                        Some('a') => Some('\u{7}'),
                        Some('b') => Some('\u{8}'),
                        Some('f') => Some('\u{c}'),
                        Some('n') => Some('\n'),
                        Some('r') => Some('\r'),
                        Some('t') => Some('\t'),
                        Some('v') => Some('\u{b}'),
                        Some('0') => Some('\0'),
                        Some('\\') => Some('\\'),
                        Some('"') => Some('"'),
                        Some('\n') | None => continue,
                        Some(ch) => {
                            self.error(
                                ErrorCode::InvalidEscapeSequence,
                                format!("unknown escape sequence: \\{}", ch),
                                esc_line,
                                esc_col,
                            );
                            None
                        }
                    };
                    if let Some(ch) = decoded {
                        string.push(ch);
                    }
                    self.advance();
                }
                Some('\n') | None => {
                    self.error(
                        ErrorCode::UnfinishedStringLiteral,
                        "string literal is not closed before end of line".to_string(),
                        line,
                        col,
                    );
                    return;
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) {
        let (line, col) = (self.line, self.col);

        // Hex: 0x... or 0X...
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();

            let mut hex = String::from("0x");
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }

            if hex.len() == 2 || self.current() == Some('.') {
                self.error(
                    ErrorCode::MalformedNumber,
                    format!("malformed hexadecimal literal '{}'", hex),
                    line,
                    col,
                );
                self.recover();
                return;
            }

            let kind = match self.current() {
                Some('l') | Some('L') => TokenKind::LongLiteral,
                Some('s') | Some('S') => TokenKind::ShortLiteral,
                _ => TokenKind::IntegerLiteral,
            };
            if kind != TokenKind::IntegerLiteral {
                self.advance();
            }
            if self.current().map_or(false, is_ident_char) {
                self.error(
                    ErrorCode::MalformedDataTypeSpecifier,
                    format!("invalid suffix on hexadecimal literal '{}'", hex),
                    line,
                    col,
                );
                self.recover();
                return;
            }
            self.push(kind, hex, line, col);
            return;
        }

        let mut digits = String::new();
        let mut has_dot = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' {
                if has_dot {
                    self.error(
                        ErrorCode::MalformedNumber,
                        format!("number '{}' has more than one radix point", digits),
                        line,
                        col,
                    );
                    self.recover();
                    return;
                }
                has_dot = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        let suffix = match self.current() {
            Some('f') | Some('F') => Some(TokenKind::FloatLiteral),
            Some('d') | Some('D') => Some(TokenKind::DoubleLiteral),
            Some('l') | Some('L') => Some(TokenKind::LongLiteral),
            Some('s') | Some('S') => Some(TokenKind::ShortLiteral),
            Some('b') | Some('B') => Some(TokenKind::ByteLiteral),
            _ => None,
        };
        if suffix.is_some() {
            self.advance();
        }

        let integral_suffix = matches!(
            suffix,
            Some(TokenKind::LongLiteral | TokenKind::ShortLiteral | TokenKind::ByteLiteral)
        );
        if self.current().map_or(false, is_ident_char) || (has_dot && integral_suffix) {
            self.error(
                ErrorCode::MalformedDataTypeSpecifier,
                format!("malformed type specifier on number '{}'", digits),
                line,
                col,
            );
            self.recover();
            return;
        }

        let kind = suffix.unwrap_or(if has_dot {
            TokenKind::FloatLiteral
        } else {
            TokenKind::IntegerLiteral
        });
        self.push(kind, digits, line, col);
    }

    fn read_identifier(&mut self) {
        let (line, col) = (self.line, self.col);
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if is_ident_char(ch) {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match TokenKind::keyword(&ident) {
            Some(TokenKind::BooleanLiteral) => {
                self.push(TokenKind::BooleanLiteral, ident.to_ascii_lowercase(), line, col)
            }
            Some(kind) => self.push(kind, ident, line, col),
            None => self.push(TokenKind::Identifier, ident, line, col),
        }
    }

    /// Operators and punctuation, longest match first.
    fn read_operator(&mut self) -> Option<TokenKind> {
        use TokenKind::*;
        let ch = self.current()?;
        let next = self.peek();
        let third = self.source.get(self.pos + 2).copied();

        let (kind, len) = match (ch, next) {
            ('<', Some('<')) if third == Some('=') => (ShiftLeftAssign, 3),
            ('>', Some('>')) if third == Some('=') => (ShiftRightAssign, 3),
            ('<', Some('<')) => (ShiftLeft, 2),
            ('>', Some('>')) => (ShiftRight, 2),
            ('<', Some('=')) => (LessEqual, 2),
            ('>', Some('=')) => (GreaterEqual, 2),
            ('=', Some('=')) => (Equal, 2),
            ('!', Some('=')) => (NotEqual, 2),
            ('&', Some('&')) => (LogicalAnd, 2),
            ('|', Some('|')) => (LogicalOr, 2),
            ('+', Some('+')) => (Increment, 2),
            ('-', Some('-')) => (Decrement, 2),
            ('-', Some('>')) => (Arrow, 2),
            ('+', Some('=')) => (PlusAssign, 2),
            ('-', Some('=')) => (MinusAssign, 2),
            ('*', Some('=')) => (StarAssign, 2),
            ('/', Some('=')) => (SlashAssign, 2),
            ('%', Some('=')) => (PercentAssign, 2),
            ('^', Some('=')) => (CaretAssign, 2),
            ('|', Some('=')) => (PipeAssign, 2),
            ('&', Some('=')) => (AmpersandAssign, 2),
            ('<', _) => (Less, 1),
            ('>', _) => (Greater, 1),
            ('=', _) => (Assign, 1),
            ('!', _) => (Not, 1),
            ('&', _) => (Ampersand, 1),
            ('|', _) => (Pipe, 1),
            ('+', _) => (Plus, 1),
            ('-', _) => (Minus, 1),
            ('*', _) => (Star, 1),
            ('/', _) => (Slash, 1),
            ('%', _) => (Percent, 1),
            ('^', _) => (Caret, 1),
            ('~', _) => (Tilde, 1),
            ('(', _) => (LParen, 1),
            (')', _) => (RParen, 1),
            ('{', _) => (LBrace, 1),
            ('}', _) => (RBrace, 1),
            ('[', _) => (LBracket, 1),
            (']', _) => (RBracket, 1),
            (';', _) => (Semicolon, 1),
            (',', _) => (Comma, 1),
            ('.', _) => (Period, 1),
            (':', _) => (Colon, 1),
            ('#', _) => (Hash, 1),
            _ => return None,
        };

        for _ in 0..len {
            self.advance();
        }
        Some(kind)
    }

    pub fn tokenize(&mut self) {
        loop {
            self.skip_whitespace();
            let (line, col) = (self.line, self.col);

            match self.current() {
                None => break,
                Some('/') if self.peek() == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek() == Some('*') => self.skip_block_comment(),
                Some('"') => self.read_string(),
                Some(ch) if ch.is_ascii_digit() => self.read_number(),
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(kind) => {
                        let text = kind.symbol().unwrap_or_default();
                        self.push(kind, text, line, col);
                    }
                    None => {
                        self.error(
                            ErrorCode::InvalidCharacter,
                            format!("unexpected character: '{}'", ch),
                            line,
                            col,
                        );
                        self.recover();
                    }
                },
            }
        }
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lex(source: &str) -> (Vec<Token>, Diagnostics) {
        analyse(source, CompileFlags::empty(), "test.ks")
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = lex(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn texts(source: &str) -> Vec<(TokenKind, String)> {
        lex(source).0.into_iter().map(|t| (t.kind, t.text)).collect()
    }

    fn codes(source: &str) -> Vec<ErrorCode> {
        lex(source).1.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_declaration() {
        use TokenKind::*;
        assert_eq!(
            kinds("int x = 5;"),
            vec![Int, Identifier, Assign, IntegerLiteral, Semicolon]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        use TokenKind::*;
        assert_eq!(kinds("WHILE While while"), vec![While, While, While]);
        assert_eq!(
            texts("TRUE"),
            vec![(BooleanLiteral, "true".to_string())]
        );
    }

    #[test]
    fn test_keyword_vs_ident() {
        use TokenKind::*;
        assert_eq!(
            texts("if iff state states"),
            vec![
                (If, "if".to_string()),
                (Identifier, "iff".to_string()),
                (State, "state".to_string()),
                (Identifier, "states".to_string()),
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        use TokenKind::*;
        assert_eq!(
            kinds("<<= << <= < >>= >> >= > == = != ! && & || | -> -- -= -"),
            vec![
                ShiftLeftAssign,
                ShiftLeft,
                LessEqual,
                Less,
                ShiftRightAssign,
                ShiftRight,
                GreaterEqual,
                Greater,
                Equal,
                Assign,
                NotEqual,
                Not,
                LogicalAnd,
                Ampersand,
                LogicalOr,
                Pipe,
                Arrow,
                Decrement,
                MinusAssign,
                Minus,
            ]
        );
    }

    #[test]
    fn test_member_access() {
        use TokenKind::*;
        assert_eq!(
            kinds("a->(int)b"),
            vec![Identifier, Arrow, LParen, Int, RParen, Identifier]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(
            kinds("a // line\n/* block /* nested */ still */ b"),
            vec![Identifier, Identifier]
        );
    }

    #[test]
    fn test_unfinished_comment() {
        assert_eq!(codes("a /* /* */"), vec![ErrorCode::UnfinishedComment]);
    }

    #[test]
    fn test_number_suffixes() {
        use TokenKind::*;
        assert_eq!(
            texts("1 2.5 3f 4.0d 5l 6s 7b 8D"),
            vec![
                (IntegerLiteral, "1".to_string()),
                (FloatLiteral, "2.5".to_string()),
                (FloatLiteral, "3".to_string()),
                (DoubleLiteral, "4.0".to_string()),
                (LongLiteral, "5".to_string()),
                (ShortLiteral, "6".to_string()),
                (ByteLiteral, "7".to_string()),
                (DoubleLiteral, "8".to_string()),
            ]
        );
    }

    #[test]
    fn test_hex_numbers() {
        use TokenKind::*;
        assert_eq!(
            texts("0x2a 0XFFl 0x10s"),
            vec![
                (IntegerLiteral, "0x2a".to_string()),
                (LongLiteral, "0xFF".to_string()),
                (ShortLiteral, "0x10".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_numbers_recover() {
        let (tokens, diags) = lex("1.2.3 x");
        assert_eq!(diags.count_code(ErrorCode::MalformedNumber), 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "x");

        assert_eq!(codes("0x1.5"), vec![ErrorCode::MalformedNumber]);
        assert_eq!(codes("0x"), vec![ErrorCode::MalformedNumber]);
    }

    #[test]
    fn test_suffix_must_be_last() {
        assert_eq!(codes("1f2"), vec![ErrorCode::MalformedDataTypeSpecifier]);
        assert_eq!(codes("1lf"), vec![ErrorCode::MalformedDataTypeSpecifier]);
        assert_eq!(codes("1.5b"), vec![ErrorCode::MalformedDataTypeSpecifier]);
        assert_eq!(codes("12abc"), vec![ErrorCode::MalformedDataTypeSpecifier]);
    }

    #[test]
    fn test_string_escapes() {
        let (tokens, diags) = lex(r#""a\nb\tc\\\"\0\a\v""#);
        assert!(diags.is_empty());
        assert_eq!(tokens[0].text, "a\nb\tc\\\"\0\u{7}\u{b}");
    }

    #[test]
    fn test_invalid_escape_keeps_string() {
        let (tokens, diags) = lex(r#""a\qb""#);
        assert_eq!(diags.count_code(ErrorCode::InvalidEscapeSequence), 1);
        assert_eq!(tokens[0].text, "ab");
    }

    #[test]
    fn test_unterminated_string() {
        let (tokens, diags) = lex("\"hello\nworld");
        assert_eq!(diags.count_code(ErrorCode::UnfinishedStringLiteral), 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn test_invalid_character_recovers() {
        let (tokens, diags) = lex("a @@@ b");
        assert_eq!(diags.count_code(ErrorCode::InvalidCharacter), 1);
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_positions() {
        let (tokens, _) = lex("int x;\n  x = 10;");
        let pos: Vec<(usize, usize)> = tokens.iter().map(|t| (t.line, t.offset)).collect();
        assert_eq!(
            pos,
            vec![(1, 1), (1, 5), (1, 6), (2, 3), (2, 5), (2, 7), (2, 9)]
        );
        assert!(tokens.iter().all(|t| t.file == "test.ks"));
    }

    fn literal_token() -> impl Strategy<Value = Token> {
        let make = |kind: TokenKind| move |text: String| Token::new(kind, text, 1, 1, "test.ks");
        prop_oneof![
            "[0-9]{1,9}".prop_map(make(TokenKind::IntegerLiteral)),
            "0x[0-9a-fA-F]{1,8}".prop_map(make(TokenKind::IntegerLiteral)),
            "0x[0-9a-fA-F]{1,8}".prop_map(make(TokenKind::LongLiteral)),
            "[0-9]{1,5}".prop_map(make(TokenKind::ShortLiteral)),
            "[0-9]{1,3}".prop_map(make(TokenKind::ByteLiteral)),
            "[0-9]{1,12}".prop_map(make(TokenKind::LongLiteral)),
            "[0-9]{1,6}(\\.[0-9]{1,6})?".prop_map(make(TokenKind::FloatLiteral)),
            "[0-9]{1,6}(\\.[0-9]{1,6})?".prop_map(make(TokenKind::DoubleLiteral)),
            "(true|false)".prop_map(make(TokenKind::BooleanLiteral)),
            "[a-zA-Z0-9 \\n\\t\\r\\\\\"\\x07\\x08\\x0B\\x0C\\x00]{0,16}"
                .prop_map(make(TokenKind::StringLiteral)),
        ]
    }

    proptest! {
        #[test]
        fn test_literal_round_trip(token in literal_token()) {
            let (tokens, diags) = lex(&token.render());
            prop_assert!(diags.is_empty());
            prop_assert_eq!(tokens, vec![token]);
        }
    }
}
