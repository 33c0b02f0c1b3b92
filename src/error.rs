//! Error types for the lazy configuration merge engine.

use thiserror::Error;

/// Errors raised while validating sources or resolving merged values.
///
/// The type is `Clone` because deferred slot results are shared futures:
/// every reader of a rejected slot receives its own copy of the failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    /// A top-level source was neither absent nor a plain mapping.
    #[error("source at position {position} is not a plain mapping (found {found})")]
    InvalidSource { position: usize, found: &'static str },

    /// A slot's resolution re-entered itself while still in progress.
    #[error("cycle detected at {path}")]
    Cycle { path: String },

    /// A failure re-raised with the dotted path of the slot it crossed.
    #[error("{path}: {message}")]
    At { path: String, message: String },

    /// A failure raised by an override function.
    #[error("{0}")]
    Override(String),

    /// No source defines the requested key.
    #[error("no source defines {path}")]
    UnknownKey { path: String },

    /// A synchronous read of a slot whose value is still deferred.
    #[error("{path} is still resolving asynchronously")]
    Pending { path: String },

    /// A lazy slot was read after the merge root was dropped.
    #[error("merge root was dropped before {path} resolved")]
    RootDropped { path: String },
}

impl MergeError {
    /// Build an override failure from any displayable message.
    pub fn custom(message: impl Into<String>) -> Self {
        MergeError::Override(message.into())
    }

    /// Qualify this error with the dotted path of the resolver it crossed.
    ///
    /// Applied once per resolver frame, so an error propagating through
    /// several override reads accumulates one prefix per slot it traversed.
    pub(crate) fn at(self, path: &str) -> Self {
        MergeError::At {
            path: path.to_string(),
            message: self.to_string(),
        }
    }
}
