//! Path patterns used by deny and permit matchers.
//!
//! A literal pattern covers the path itself and everything below it on a
//! segment boundary, so `/validate` matches `/validate/x` but not `/validated`.
//! `*` matches inside a single segment and `**` matches across segments. A
//! trailing `/**` also matches the bare prefix.

use regex::Regex;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("pattern must start with '/': {0}")]
    NotAbsolute(String),
    #[error("pattern {pattern} does not compile: {reason}")]
    Invalid { pattern: String, reason: String },
}

#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern {
    source: String,
    regex: Regex,
    specificity: usize,
}

impl Pattern {
    /// Compile a path pattern.
    /// # Errors
    /// Returns an error if the pattern is empty, relative, or cannot be compiled.
    pub fn new(source: &str) -> Result<Self, PatternError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        if !source.starts_with('/') {
            return Err(PatternError::NotAbsolute(source.to_string()));
        }

        let expression = if let Some(prefix) = source.strip_suffix("/**") {
            format!("^{}(?:/.*)?$", translate(prefix))
        } else if source.contains('*') {
            format!("^{}$", translate(source))
        } else {
            let literal = source.trim_end_matches('/');
            format!("^{}(?:/.*)?$", regex::escape(literal))
        };

        let regex = Regex::new(&expression).map_err(|e| PatternError::Invalid {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;

        let specificity = source.find('*').unwrap_or(source.len());

        Ok(Self {
            source: source.to_string(),
            regex,
            specificity,
        })
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Number of literal characters before the first wildcard.
    #[must_use]
    pub const fn specificity(&self) -> usize {
        self.specificity
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

// `**` crosses segments, `*` stays inside one, everything else is literal.
fn translate(glob: &str) -> String {
    let mut expression = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                expression.push_str(".*");
            } else {
                expression.push_str("[^/]*");
            }
        } else {
            let mut buf = [0u8; 4];
            expression.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }

    expression
}

impl TryFrom<String> for Pattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
