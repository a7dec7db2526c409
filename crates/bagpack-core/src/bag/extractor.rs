//! Bag extraction: re-materialize the payload to a directory.
//!
//! Runs the structural pass, then streams every entry to the target,
//! restoring original payload names through `bagarc/renames.csv` when
//! asked to. Each file is re-opened after close and its digest recomputed
//! from disk, so the final manifest check covers what actually landed on
//! the filesystem. File modes are not preserved; the target may live on a
//! filesystem that cannot represent them.

use crate::bag::verifier::{check_manifest_lines, BagVerifier};
use crate::bag::{
    manifest_name, parse_renames, tagmanifest_name, DATA_PREFIX, TAG_ENCODING_UTF8,
};
use crate::cancel::CancelToken;
use crate::digest::{digest_file, DigestAlgorithm};
use crate::errors::{BagError, BagResult, IoResultExt};
use crate::scratch::Scratch;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Restore original payload names recorded in `bagarc/renames.csv`.
    pub restore_names: bool,
    pub cancel: CancelToken,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            restore_names: true,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub target_dir: PathBuf,
    pub files: usize,
    pub restored: usize,
    pub algorithm: DigestAlgorithm,
}

/// Extracts `bag_path` into `target_dir`, verifying digests on the way
/// out. Any mismatch is fatal.
pub fn extract(
    bag_path: &Path,
    target_dir: &Path,
    options: ExtractOptions,
) -> BagResult<ExtractReport> {
    let mut verifier = BagVerifier::open(bag_path)?;
    let scan = verifier.scan_structure(&options.cancel)?;
    if scan.encoding != TAG_ENCODING_UTF8 {
        return Err(BagError::UnsupportedEncoding(scan.encoding.clone()));
    }

    let renames: Option<HashMap<String, String>> = if options.restore_names {
        scan.renames.as_deref().map(parse_renames).transpose()?
    } else {
        None
    };

    fs::create_dir_all(target_dir)
        .io_context(|| format!("cannot create '{}'", target_dir.display()))?;

    let scratch = Scratch::new()?;
    let mut restored = 0usize;
    let entries = verifier.reader.len();

    for index in 0..entries {
        options.cancel.checkpoint()?;
        let mut entry = verifier.reader.entry(index)?;
        let name = entry.name();

        let target_name = match (&renames, name.strip_prefix(DATA_PREFIX)) {
            (Some(map), Some(payload_name)) => match map.get(payload_name) {
                Some(original) => {
                    restored += 1;
                    format!("{DATA_PREFIX}{}", original.trim_start_matches('/'))
                }
                None => name.clone(),
            },
            _ => name.clone(),
        };

        let dest = safe_join(target_dir, &target_name)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("cannot create '{}'", parent.display()))?;
        }

        debug!(entry = %name, dest = %dest.display(), "extracting");
        let mut out =
            File::create(&dest).io_context(|| format!("cannot create '{}'", dest.display()))?;
        std::io::copy(&mut entry, &mut out)
            .io_context(|| format!("cannot extract '{name}' to '{}'", dest.display()))?;
        drop(out);

        // Digest what is actually on disk, not what went through the pipe.
        let digest = digest_file(&dest, scan.algorithm)?;
        scratch.put(&name, &digest)?;
    }

    let manifest = scan
        .manifests
        .get(&scan.algorithm)
        .ok_or(BagError::NoManifest)?;
    check_manifest_lines(
        manifest,
        &manifest_name(scan.algorithm),
        scan.algorithm,
        &scratch,
    )?;
    if let Some(tag_manifest) = scan.tag_manifests.get(&scan.algorithm) {
        check_manifest_lines(
            tag_manifest,
            &tagmanifest_name(scan.algorithm),
            scan.algorithm,
            &scratch,
        )?;
    }

    info!(
        bag = %bag_path.display(),
        dest = %target_dir.display(),
        files = entries,
        restored,
        "bag extracted"
    );

    Ok(ExtractReport {
        target_dir: target_dir.to_owned(),
        files: entries,
        restored,
        algorithm: scan.algorithm,
    })
}

/// Joins an in-archive name onto the target, rejecting traversal.
fn safe_join(base: &Path, name: &str) -> BagResult<PathBuf> {
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(BagError::Format(format!("unsafe entry path '{name}'")));
            }
        }
    }
    Ok(base.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_traversal() {
        let base = Path::new("/tmp/out");
        assert!(safe_join(base, "data/a.txt").is_ok());
        assert!(safe_join(base, "./data/a.txt").is_ok());
        assert!(safe_join(base, "../escape").is_err());
        assert!(safe_join(base, "/absolute").is_err());
        assert!(safe_join(base, "data/../../up").is_err());
    }
}
