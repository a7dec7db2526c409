//! Error types for catalog, cipher and transfer operations.

use bagpack_core::BagError;
use thiserror::Error;

/// Result type for lifecycle operations.
pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Failure inside the packaging engine (verify, digest, extract).
    #[error(transparent)]
    Bag(#[from] BagError),

    /// SQL catalog failure.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Caller or configuration error: unknown location, bad URL, wrong
    /// scheme, missing transport.
    #[error("configuration error: {0}")]
    Config(String),

    /// The archive name is already cataloged.
    #[error("bagit '{0}' is already cataloged")]
    AlreadyExists(String),

    /// A plaintext transfer produced a hash that does not match the
    /// catalog value.
    #[error("archive hash mismatch for '{name}': catalog {expected}, transferred {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// An encrypted transfer produced a ciphertext hash that does not
    /// match the recorded `sha512_aes`.
    #[error("ciphertext hash mismatch for '{name}': catalog {expected}, transferred {actual}")]
    CiphertextHashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Remote transport failure.
    #[error("remote transport error: {0}")]
    Transport(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying stream failure, with the operation that hit it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        IngestError::Catalog(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(source: std::io::Error) -> Self {
        IngestError::Io {
            context: "i/o error".into(),
            source,
        }
    }
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::Config(format!("invalid location url: {err}"))
    }
}

/// Attaches an operation breadcrumb to raw I/O results.
pub(crate) trait IoResultExt<T> {
    fn io_context<F, S>(self, context: F) -> IngestResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<F, S>(self, context: F) -> IngestResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| IngestError::Io {
            context: context().into(),
            source,
        })
    }
}
