//! Correlation tokens tying a reply to the request that caused it.

use std::borrow::Borrow;
use std::fmt;

/// Opaque identifier carried by a request and echoed by its reply
///
/// Equality is exact string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generate a new random (UUID v4) token
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for CorrelationToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Source of correlation tokens for a run
///
/// Tokens must not collide for the lifetime of a run.
pub trait TokenGenerator: Send + Sync {
    fn new_token(&self) -> CorrelationToken;
}

/// Generates UUID v4 tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenGenerator;

impl TokenGenerator for UuidTokenGenerator {
    fn new_token(&self) -> CorrelationToken {
        CorrelationToken::new()
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
