//! # Frontend
//!
//! Source text to token list: lexing, the preprocessor boundary and the
//! binary token-stream interchange.

pub mod lexer;
pub mod preprocess;
pub mod token;
pub mod token_dumper;
pub mod token_stream;

pub use lexer::analyse;
pub use preprocess::{Define, PassThrough, Preprocessor};
pub use token::{Token, TokenKind};
