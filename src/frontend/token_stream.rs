//! Compact binary interchange of token lists, so an out-of-process
//! preprocessor can consume lexer output and hand processed tokens back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frontend::preprocess::Define;
use crate::frontend::token::Token;

pub const TOKEN_STREAM_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStream {
    pub version: u16,
    pub tokens: Vec<Token>,
    pub defines: Vec<Define>,
}

#[derive(Debug, Error)]
pub enum TokenStreamError {
    #[error("malformed token stream: {0}")]
    Codec(#[from] postcard::Error),

    #[error("unsupported token stream version {0}")]
    Version(u16),
}

pub fn encode(tokens: &[Token], defines: &[Define]) -> Result<Vec<u8>, TokenStreamError> {
    let stream = TokenStream {
        version: TOKEN_STREAM_VERSION,
        tokens: tokens.to_vec(),
        defines: defines.to_vec(),
    };
    Ok(postcard::to_allocvec(&stream)?)
}

pub fn decode(bytes: &[u8]) -> Result<TokenStream, TokenStreamError> {
    let stream: TokenStream = postcard::from_bytes(bytes)?;
    if stream.version != TOKEN_STREAM_VERSION {
        return Err(TokenStreamError::Version(stream.version));
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::analyse;
    use crate::lang::flags::CompileFlags;

    #[test]
    fn test_encode_decode() {
        let (tokens, _) = analyse(
            "state engine Main { event void Tick() { x->(int)y = 0x10l; } }",
            CompileFlags::empty(),
            "main.ks",
        );
        let defines = vec![Define::new("DEBUG", "1")];
        let bytes = encode(&tokens, &defines).unwrap();
        let stream = decode(&bytes).unwrap();
        assert_eq!(stream.tokens, tokens);
        assert_eq!(stream.defines, defines);
    }

    #[test]
    fn test_version_mismatch() {
        let stream = TokenStream {
            version: TOKEN_STREAM_VERSION + 1,
            tokens: Vec::new(),
            defines: Vec::new(),
        };
        let bytes = postcard::to_allocvec(&stream).unwrap();
        assert!(matches!(decode(&bytes), Err(TokenStreamError::Version(_))));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(decode(&[1]), Err(TokenStreamError::Codec(_))));
    }
}
