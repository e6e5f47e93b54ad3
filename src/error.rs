//! Error types shared by the query, traversal, tag and graph engines.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::rewrite::MutationSummary;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

/// A malformed query expression. Always surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of expression (expected PATH, tag:NAME, find:PATTERN or KEY:VALUE)")]
    UnexpectedEnd,

    /// `found` is the token in place of the closing parenthesis, or
    /// "end of input".
    #[error("expected ')' but found {found}")]
    UnclosedParen { found: String },

    #[error("unexpected operator {0:?} in operand position (expected PATH, tag:NAME, find:PATTERN or KEY:VALUE)")]
    UnexpectedOperator(String),

    #[error("unexpected token {0:?} (expected PATH, tag:NAME, find:PATTERN or KEY:VALUE)")]
    UnexpectedToken(String),

    #[error("invalid tag value in {0:?}: tag cannot be empty or a wildcard (*)")]
    InvalidTag(String),

    #[error("invalid find pattern in {0:?}: pattern cannot be empty or a wildcard (*)")]
    InvalidFind(String),

    #[error("invalid property input {0:?}: both key and value are required")]
    InvalidProperty(String),
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The corpus root cannot be listed at all.
    #[error("vault unavailable at {}: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read {id}: {source}")]
    DocumentUnreadable {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {id}: {source}")]
    DocumentUnwritable {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid path pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    #[error("invalid property {key:?}: {reason}")]
    InvalidProperty { key: String, reason: &'static str },

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

/// A mutation batch stopped at its first failing document.
///
/// Documents rewritten before the failure stay rewritten; `completed`
/// describes them.
#[derive(Error, Debug)]
#[error("batch cancelled after {} file(s) changed: {source}", .completed.files_changed.len())]
pub struct BatchFailure {
    pub completed: MutationSummary,
    #[source]
    pub source: VaultError,
}

/// A batch rejected before any document was touched.
impl From<VaultError> for BatchFailure {
    fn from(source: VaultError) -> Self {
        BatchFailure {
            completed: MutationSummary::default(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_name_the_token() {
        let err = ParseError::UnexpectedOperator("AND".to_string());
        let msg = err.to_string();
        assert!(msg.contains("\"AND\""));
        assert!(msg.contains("tag:NAME"));

        let err = ParseError::UnclosedParen { found: "tag:x".to_string() };
        assert_eq!(err.to_string(), "expected ')' but found tag:x");
    }

    #[test]
    fn test_store_unavailable_names_path() {
        let err = VaultError::StoreUnavailable {
            path: PathBuf::from("/no/such/vault"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/no/such/vault"));
    }
}
