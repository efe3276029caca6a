use std::fmt::Write;

use crate::frontend::token::{Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_file: bool,
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_file: false,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.show_file = true;
        self
    }

    pub fn dump(&self, tokens: &[Token]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for t in tokens {
            self.render_one(&mut out, t);
        }
        out
    }

    fn render_one(&self, out: &mut String, t: &Token) {
        let kind = self.kind(t.kind);
        let colr = if self.color { self.color(t.kind) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };
        let dim = if self.color { Self::DIM } else { "" };

        if self.show_file {
            let _ = write!(out, "{}{}:{}", dim, t.file, reset);
        }
        let _ = writeln!(
            out,
            "{}[{:02}:{:02}]{} {}{:<8} {:?} {}{}",
            dim,
            t.line,
            t.offset,
            reset,
            colr,
            kind,
            t.kind,
            t.render(),
            reset
        );
    }

    fn kind(&self, k: TokenKind) -> &'static str {
        use TokenKind::*;
        match k {
            StringLiteral => "STRING",
            BooleanLiteral => "BOOL",
            ByteLiteral | ShortLiteral | IntegerLiteral | LongLiteral => "INT",
            FloatLiteral | DoubleLiteral => "FLOAT",
            Identifier => "IDENT",
            LParen | RParen | LBrace | RBrace | LBracket | RBracket | Semicolon | Comma
            | Period | Colon | Hash => "PUNCT",
            k if k.is_assignment() => "ASSIGN",
            Equal | NotEqual | Less | Greater | LessEqual | GreaterEqual => "CMP",
            k if k.is_keyword() => "KEYWORD",
            _ => "OP",
        }
    }

    fn color(&self, k: TokenKind) -> &'static str {
        use TokenKind::*;
        match k {
            StringLiteral => Self::GRN,
            k if k.is_literal() => Self::CYN,
            Identifier => Self::YEL,
            k if k.is_keyword() => Self::BLU,
            LParen | RParen | LBrace | RBrace | LBracket | RBracket | Semicolon | Comma
            | Period | Colon | Hash => Self::DIM,
            _ => Self::MAG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::analyse;
    use crate::lang::flags::CompileFlags;

    #[test]
    fn test_plain_dump() {
        let (tokens, _) = analyse("int x = \"a\";", CompileFlags::empty(), "a.ks");
        let text = TokenDumper::new().no_color().render(&tokens);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "[01:01] KEYWORD  Int int");
        assert_eq!(lines[1], "[01:05] IDENT    Identifier x");
        assert_eq!(lines[2], "[01:07] ASSIGN   Assign =");
        assert_eq!(lines[3], "[01:09] STRING   StringLiteral \"a\"");
        assert_eq!(lines[4], "[01:12] PUNCT    Semicolon ;");
    }

    #[test]
    fn test_color_codes_present() {
        let (tokens, _) = analyse("x", CompileFlags::empty(), "a.ks");
        let text = TokenDumper::new().with_file().render(&tokens);
        assert!(text.starts_with("\x1b[2ma.ks:"));
        assert!(text.contains(TokenDumper::YEL));
    }
}
