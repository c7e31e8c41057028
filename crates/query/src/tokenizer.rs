//! Tokenizing and literal escaping for the query sublanguage
//!
//! Query text is a sequence of tokens separated by single spaces. Literals
//! that contain spaces or the reserved `^` are escaped:
//!
//! | literal | written as       |
//! |---------|------------------|
//! | ` `     | `^^`             |
//! | `^`     | `(^)`            |
//! | empty   | `^EMPTY_STRING`  |

use crate::keyword::{EMPTY_STRING, SPACE, SPACE_ESCAPE, SPECIAL, SPECIAL_ESCAPE};

/// Split query text into raw tokens
///
/// Leading and trailing spaces are dropped. Consecutive interior spaces yield
/// empty tokens, which no handler accepts as a keyword.
pub fn tokenize(text: &str) -> Vec<&str> {
    let trimmed = text.trim_matches(' ');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split(' ').collect()
}

/// Decode an escaped literal token
pub fn unescape(token: &str) -> String {
    if token == EMPTY_STRING {
        return String::new();
    }
    token
        .replace(SPACE_ESCAPE, SPACE)
        .replace(SPECIAL_ESCAPE, SPECIAL)
}

/// Encode a literal so it survives tokenizing as a single token
pub fn escape(literal: &str) -> String {
    if literal.is_empty() {
        return EMPTY_STRING.to_string();
    }
    literal
        .replace(SPECIAL, SPECIAL_ESCAPE)
        .replace(SPACE, SPACE_ESCAPE)
}

/// Bounds-checked reader over a token array
#[derive(Debug)]
pub struct TokenCursor<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    /// Tokenize `text` and position the cursor on the first token
    pub fn new(text: &'a str) -> Self {
        Self {
            tokens: tokenize(text),
            pos: 0,
        }
    }

    /// Whether every token has been consumed
    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Index of the next unread token
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of tokens not yet consumed
    pub fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.pos)
    }

    /// Next token without consuming it
    pub fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    /// Consume exactly `N` tokens
    ///
    /// Returns `None` and leaves the cursor in place when fewer than `N`
    /// tokens remain.
    pub fn consume<const N: usize>(&mut self) -> Option<[&'a str; N]> {
        let end = self.pos.checked_add(N)?;
        let window = self.tokens.get(self.pos..end)?;
        let taken: [&'a str; N] = window.try_into().ok()?;
        self.pos = end;
        Some(taken)
    }

    /// Consume one token
    pub fn next_token(&mut self) -> Option<&'a str> {
        self.consume::<1>().map(|[t]| t)
    }

    /// Consume tokens up to and including `marker`, returning those before it
    ///
    /// Returns `None` and leaves the cursor in place when `marker` never
    /// appears.
    pub fn consume_until(&mut self, marker: &str) -> Option<Vec<&'a str>> {
        let rest = self.tokens.get(self.pos..)?;
        let idx = rest.iter().position(|t| *t == marker)?;
        let items = rest[..idx].to_vec();
        self.pos += idx + 1;
        Some(items)
    }
}
