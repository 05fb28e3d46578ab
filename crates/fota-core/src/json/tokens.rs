//! Flat JSON tokenizer.
//!
//! Produces a bounded, flat sequence of tokens over one JSON text, without
//! building a tree or copying data. Consumers walk the token stream and
//! slice the original text; the server schema is small and known, so a
//! general-purpose document model is not needed.

use thiserror::Error;

/// Token budget per document. Sized for one software module with a single
/// artifact in a deployment resource.
pub const MAX_TOKENS: usize = 60;

const UNCLOSED: usize = usize::MAX;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JsonError {
    #[error("Token budget exceeded ({MAX_TOKENS} tokens)")]
    OutOfTokens,

    #[error("Invalid character at byte {0}")]
    InvalidCharacter(usize),

    #[error("Incomplete JSON document")]
    Incomplete,

    #[error("Document root is not an object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Object,
    Array,
    String,
    Primitive,
}

/// One token over the source text: `start..end` is the byte range,
/// `children` the number of direct children (key/value pairs for objects,
/// elements for arrays, 1 for an object key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonToken {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub children: usize,
}

/// Tokenize one JSON document within the fixed token budget.
pub fn tokenize(text: &str) -> Result<Vec<JsonToken>, JsonError> {
    let bytes = text.as_bytes();
    let mut tokens: Vec<JsonToken> = Vec::new();
    let mut parents: Vec<Option<usize>> = Vec::new();
    // The token new values attach to: an open container, or a key after ':'.
    let mut superior: Option<usize> = None;

    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' | b'[' => {
                if tokens.len() == MAX_TOKENS {
                    return Err(JsonError::OutOfTokens);
                }
                let kind = if bytes[pos] == b'{' {
                    TokenKind::Object
                } else {
                    TokenKind::Array
                };
                if let Some(s) = superior {
                    tokens[s].children += 1;
                }
                tokens.push(JsonToken {
                    kind,
                    start: pos,
                    end: UNCLOSED,
                    children: 0,
                });
                parents.push(superior);
                superior = Some(tokens.len() - 1);
            }
            b'}' | b']' => {
                let kind = if bytes[pos] == b'}' {
                    TokenKind::Object
                } else {
                    TokenKind::Array
                };
                let mut idx = match tokens.len().checked_sub(1) {
                    Some(idx) => idx,
                    None => return Err(JsonError::InvalidCharacter(pos)),
                };
                // Walk up to the innermost unclosed container.
                loop {
                    if tokens[idx].end == UNCLOSED {
                        if tokens[idx].kind != kind {
                            return Err(JsonError::InvalidCharacter(pos));
                        }
                        tokens[idx].end = pos + 1;
                        superior = parents[idx];
                        break;
                    }
                    match parents[idx] {
                        Some(p) => idx = p,
                        None => return Err(JsonError::InvalidCharacter(pos)),
                    }
                }
            }
            b'"' => {
                let start = pos + 1;
                let mut j = start;
                let mut closed = false;
                while j < bytes.len() {
                    match bytes[j] {
                        b'\\' => j += 2,
                        b'"' => {
                            closed = true;
                            break;
                        }
                        _ => j += 1,
                    }
                }
                if !closed {
                    return Err(JsonError::Incomplete);
                }
                if tokens.len() == MAX_TOKENS {
                    return Err(JsonError::OutOfTokens);
                }
                if let Some(s) = superior {
                    tokens[s].children += 1;
                }
                tokens.push(JsonToken {
                    kind: TokenKind::String,
                    start,
                    end: j,
                    children: 0,
                });
                parents.push(superior);
                pos = j;
            }
            b':' => {
                if tokens.is_empty() {
                    return Err(JsonError::InvalidCharacter(pos));
                }
                superior = Some(tokens.len() - 1);
            }
            b',' => {
                if let Some(s) = superior {
                    if !matches!(tokens[s].kind, TokenKind::Object | TokenKind::Array) {
                        superior = parents[s];
                    }
                }
            }
            b' ' | b'\t' | b'\r' | b'\n' => {}
            b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => {
                let start = pos;
                let mut j = pos;
                while j < bytes.len()
                    && !matches!(
                        bytes[j],
                        b' ' | b'\t' | b'\r' | b'\n' | b',' | b']' | b'}' | b':'
                    )
                {
                    j += 1;
                }
                if tokens.len() == MAX_TOKENS {
                    return Err(JsonError::OutOfTokens);
                }
                if let Some(s) = superior {
                    tokens[s].children += 1;
                }
                tokens.push(JsonToken {
                    kind: TokenKind::Primitive,
                    start,
                    end: j,
                    children: 0,
                });
                parents.push(superior);
                pos = j - 1;
            }
            _ => return Err(JsonError::InvalidCharacter(pos)),
        }
        pos += 1;
    }

    if tokens.iter().any(|t| t.end == UNCLOSED) {
        return Err(JsonError::Incomplete);
    }

    Ok(tokens)
}
