//! Payload file records and the external classifier seam.

use crate::digest::DigestMap;
use crate::errors::BagResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One payload file as recorded in the scratch catalog and reflected into
/// `bagarc/metainfo.json`.
///
/// `path` is the original path relative to the source root, slash form
/// with the leading slash preserved; `zip_path` equals `path` unless name
/// normalization rewrote it. Field order here is the element order in
/// `metainfo.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagFile {
    pub path: String,
    #[serde(rename = "zippath")]
    pub zip_path: String,
    #[serde(rename = "checksum")]
    pub digests: DigestMap,
    pub size: u64,
    /// Opaque output of the external format classifier, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexer: Option<serde_json::Value>,
}

impl BagFile {
    /// True when normalization rewrote the in-archive name.
    pub fn renamed(&self) -> bool {
        self.zip_path != self.path
    }

    /// In-archive entry name under the payload prefix.
    pub fn data_name(&self) -> String {
        if self.zip_path.starts_with('/') {
            format!("data{}", self.zip_path)
        } else {
            format!("data/{}", self.zip_path)
        }
    }
}

/// Result of classifying one file.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Format identifier matched against the builder's store-only list.
    pub format_id: String,
    /// Opaque detail blob, stored verbatim as `BagFile::indexer`.
    pub details: serde_json::Value,
}

/// External format-identification service, consulted once per file at
/// build time. A failing classifier downgrades to a warning; the file is
/// still packed, just without `indexer` metadata.
pub trait FormatClassifier {
    fn classify(&self, path: &Path) -> BagResult<Classification>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;

    #[test]
    fn metainfo_element_shape() {
        let mut digests = DigestMap::new();
        digests.insert(DigestAlgorithm::Md5, "5d41402abc4b2a76b9719d911017c592".into());

        let file = BagFile {
            path: "/a/x.txt".into(),
            zip_path: "/a/x.txt".into(),
            digests,
            size: 5,
            indexer: None,
        };

        let json = serde_json::to_string(&file).unwrap();
        assert_eq!(
            json,
            r#"{"path":"/a/x.txt","zippath":"/a/x.txt","checksum":{"md5":"5d41402abc4b2a76b9719d911017c592"},"size":5}"#
        );

        let back: BagFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
        assert!(!back.renamed());
        assert_eq!(back.data_name(), "data/a/x.txt");
    }

    #[test]
    fn renamed_flag() {
        let file = BagFile {
            path: "/weird:name?.txt".into(),
            zip_path: "/weird_name_.txt".into(),
            digests: DigestMap::new(),
            size: 2,
            indexer: None,
        };
        assert!(file.renamed());
        assert_eq!(file.data_name(), "data/weird_name_.txt");
    }
}
