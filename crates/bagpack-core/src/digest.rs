//! Digest algorithms and engines.
//!
//! Algorithm names use the canonical lower-case tags that also appear in
//! manifest file names (`manifest-sha512.txt`). Selection between several
//! manifests follows the fixed hierarchy
//! `sha512 > sha3-512 > sha256 > sha3-256 > sha1 > md5`.

use crate::errors::{BagError, BagResult, IoResultExt};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_384, Sha3_512};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Map from algorithm to lower-case hex digest.
pub type DigestMap = BTreeMap<DigestAlgorithm, String>;

/// A supported digest algorithm, named by its canonical tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
    #[serde(rename = "sha3-256")]
    Sha3_256,
    #[serde(rename = "sha3-384")]
    Sha3_384,
    #[serde(rename = "sha3-512")]
    Sha3_512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 7] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha3_256,
        DigestAlgorithm::Sha3_384,
        DigestAlgorithm::Sha3_512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha3_256 => "sha3-256",
            DigestAlgorithm::Sha3_384 => "sha3-384",
            DigestAlgorithm::Sha3_512 => "sha3-512",
        }
    }

    /// Position in the manifest selection hierarchy. Higher wins.
    ///
    /// sha3-384 never appears in a recognized manifest file name, so it
    /// ranks below everything selectable.
    pub fn strength(&self) -> u8 {
        match self {
            DigestAlgorithm::Sha3_384 => 0,
            DigestAlgorithm::Md5 => 1,
            DigestAlgorithm::Sha1 => 2,
            DigestAlgorithm::Sha3_256 => 3,
            DigestAlgorithm::Sha256 => 4,
            DigestAlgorithm::Sha3_512 => 5,
            DigestAlgorithm::Sha512 => 6,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DigestAlgorithm::ALL
            .iter()
            .find(|alg| alg.as_str() == s)
            .copied()
            .ok_or_else(|| BagError::Config(format!("unknown digest algorithm '{s}'")))
    }
}

/// Streaming hash engine for one algorithm.
pub enum DigestEngine {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Sha3_256(Sha3_256),
    Sha3_384(Sha3_384),
    Sha3_512(Sha3_512),
}

impl DigestEngine {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => DigestEngine::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => DigestEngine::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => DigestEngine::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => DigestEngine::Sha512(Sha512::new()),
            DigestAlgorithm::Sha3_256 => DigestEngine::Sha3_256(Sha3_256::new()),
            DigestAlgorithm::Sha3_384 => DigestEngine::Sha3_384(Sha3_384::new()),
            DigestAlgorithm::Sha3_512 => DigestEngine::Sha3_512(Sha3_512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestEngine::Md5(h) => h.update(data),
            DigestEngine::Sha1(h) => h.update(data),
            DigestEngine::Sha256(h) => h.update(data),
            DigestEngine::Sha512(h) => h.update(data),
            DigestEngine::Sha3_256(h) => h.update(data),
            DigestEngine::Sha3_384(h) => h.update(data),
            DigestEngine::Sha3_512(h) => h.update(data),
        }
    }

    /// Consumes the engine and returns the lower-case hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            DigestEngine::Md5(h) => hex::encode(h.finalize()),
            DigestEngine::Sha1(h) => hex::encode(h.finalize()),
            DigestEngine::Sha256(h) => hex::encode(h.finalize()),
            DigestEngine::Sha512(h) => hex::encode(h.finalize()),
            DigestEngine::Sha3_256(h) => hex::encode(h.finalize()),
            DigestEngine::Sha3_384(h) => hex::encode(h.finalize()),
            DigestEngine::Sha3_512(h) => hex::encode(h.finalize()),
        }
    }
}

/// One-shot digest of a reader.
pub fn digest_reader<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: DigestAlgorithm,
) -> BagResult<String> {
    let mut engine = DigestEngine::new(algorithm);
    let mut buf = [0u8; 64 * 1024];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => engine.update(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BagError::Io {
                    context: format!("computing {algorithm} digest"),
                    source: e,
                })
            }
        }
    }
    Ok(engine.finalize_hex())
}

/// One-shot digest of a file on disk.
pub fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> BagResult<String> {
    let mut file = File::open(path).io_context(|| format!("cannot open '{}'", path.display()))?;
    digest_reader(&mut file, algorithm)
}
