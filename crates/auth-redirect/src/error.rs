//! Redirect flow error types.

use thiserror::Error;

/// Failures of the local redirect machinery itself.
///
/// Provider-side outcomes (consent denied, provider errors) are not errors
/// here; they are reported through [`crate::PromptOutcome`].
#[derive(Error, Debug)]
pub enum RedirectError {
    /// Could not bind the loopback listener
    #[error("Failed to bind callback listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error while serving the callback
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Authorization URL could not be built
    #[error("Invalid authorization URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias using RedirectError.
pub type RedirectResult<T> = Result<T, RedirectError>;
