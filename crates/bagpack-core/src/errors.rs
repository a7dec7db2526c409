//! Error types for the packaging engine.

use crate::digest::DigestAlgorithm;
use thiserror::Error;

/// Result type for packaging operations.
pub type BagResult<T> = Result<T, BagError>;

/// Errors raised while building, verifying or extracting a bag.
#[derive(Debug, Error)]
pub enum BagError {
    /// Malformed `bagit.txt`, bad manifest line, or other structural rot.
    #[error("format error: {0}")]
    Format(String),

    /// Tag files declare an encoding this engine does not decode.
    #[error("unsupported tag-file encoding '{0}': only UTF-8 is handled")]
    UnsupportedEncoding(String),

    /// `bag-info.txt` declares payload totals that do not match the archive.
    #[error(
        "payload-oxum mismatch: bag-info.txt declares {declared_octets}.{declared_streams}, \
         archive holds {observed_octets}.{observed_streams}"
    )]
    OxumMismatch {
        declared_octets: u64,
        declared_streams: u64,
        observed_octets: u64,
        observed_streams: u64,
    },

    /// The archive carries no manifest with a recognized digest algorithm.
    #[error("no manifest with a known digest algorithm")]
    NoManifest,

    /// A manifest digest does not match the recomputed one.
    #[error("digest mismatch for '{path}': manifest says {expected}, archive has {actual} ({algorithm})")]
    DigestMismatch {
        path: String,
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },

    /// A manifest line names an entry the archive does not contain.
    #[error("manifest references '{0}', which is not in the archive")]
    ManifestReferenceMissing(String),

    /// The target archive path (or another must-not-exist target) collides.
    #[error("'{0}' already exists")]
    AlreadyExists(String),

    /// Caller or configuration error: unknown algorithm, empty algorithm
    /// set, duplicate entry names, unusable source directory.
    #[error("configuration error: {0}")]
    Config(String),

    /// Scratch catalog failure.
    #[error("scratch catalog error: {0}")]
    Catalog(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying container failure.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Underlying stream failure, with the operation that hit it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BagError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BagError::Cancelled)
    }
}

impl From<std::io::Error> for BagError {
    fn from(source: std::io::Error) -> Self {
        BagError::Io {
            context: "i/o error".into(),
            source,
        }
    }
}

impl From<rusqlite::Error> for BagError {
    fn from(err: rusqlite::Error) -> Self {
        BagError::Catalog(err.to_string())
    }
}

impl From<serde_json::Error> for BagError {
    fn from(err: serde_json::Error) -> Self {
        BagError::Format(format!("malformed JSON record: {err}"))
    }
}

/// Attaches an operation breadcrumb to raw I/O results.
pub(crate) trait IoResultExt<T> {
    fn io_context<F, S>(self, context: F) -> BagResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<F, S>(self, context: F) -> BagResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| BagError::Io {
            context: context().into(),
            source,
        })
    }
}
