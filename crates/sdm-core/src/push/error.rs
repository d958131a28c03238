//! Push-test error types.

use thiserror::Error;

/// Errors that can occur while evaluating a push test.
///
/// A transient lookup failure is an error, never `false`; the planner
/// retries the whole evaluation when the triggering event is redelivered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PushTestError {
    /// A `use` node named a predicate that is not registered.
    #[error("unknown push test: {name}")]
    UnknownPredicate {
        /// The unresolved predicate name.
        name: String,
    },

    /// A regex payload failed to compile.
    #[error("invalid regex {pattern:?} in {node}: {source}")]
    InvalidRegex {
        /// The node kind carrying the pattern.
        node: &'static str,
        /// The malformed pattern.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
    },

    /// A glob payload failed to compile.
    #[error("invalid glob {pattern:?}: {source}")]
    InvalidGlob {
        /// The malformed pattern.
        pattern: String,
        /// The underlying glob error.
        source: glob::PatternError,
    },

    /// Reading the project working tree failed.
    #[error("project read failed: {0}")]
    Project(#[from] std::io::Error),

    /// A store or provider lookup failed.
    #[error("lookup failed: {message}")]
    Lookup {
        /// Description of the failed lookup.
        message: String,
    },
}

impl PushTestError {
    /// Creates a lookup error from any displayable source.
    pub fn lookup(message: impl std::fmt::Display) -> Self {
        Self::Lookup {
            message: message.to_string(),
        }
    }
}
