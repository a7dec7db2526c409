//! bagpack-core — packaging engine for BagIt-conformant ZIP archives.
//!
//! A bag is a single ZIP file: payload under `data/`, tag files at the
//! top level (`bagit.txt`, `bag-info.txt`, per-algorithm manifests and
//! tagmanifests, `bagarc/metainfo.json`, `bagarc/renames.csv`).
//!
//! # Components
//!
//! - [`BagBuilder`]: walk a tree, digest every file in a single fan-out
//!   pass while compressing it, emit manifests and tag files.
//! - [`BagVerifier`]: structural pass plus a full digest recomputation
//!   checked against the strongest manifest present.
//! - [`extract`]: reverse of the builder, restoring normalized names and
//!   re-checking digests from disk.
//!
//! The engine is synchronous; the only internal parallelism is the
//! per-file digest fan-out. Long operations honor a [`CancelToken`]
//! checked at file boundaries.

pub mod archive;
pub mod bag;
pub mod cancel;
pub mod digest;
pub mod errors;
pub mod fanout;
pub mod names;
pub mod scratch;
pub mod types;

pub use bag::builder::{BagBuilder, BuildOptions, BuildReport};
pub use bag::extractor::{extract, ExtractOptions, ExtractReport};
pub use bag::verifier::{BagVerifier, VerifyOptions, VerifyReport};
pub use bag::Oxum;
pub use cancel::CancelToken;
pub use digest::{digest_file, digest_reader, DigestAlgorithm, DigestEngine, DigestMap};
pub use errors::{BagError, BagResult};
pub use fanout::fanout;
pub use names::normalize;
pub use types::{BagFile, Classification, FormatClassifier};
