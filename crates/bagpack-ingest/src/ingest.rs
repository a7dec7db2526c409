//! Batch ingest: verify bags sitting at the ingest location and catalog
//! them.
//!
//! The walker looks at regular `*.zip` files in the ingest directory,
//! skipping dotfiles and anything already cataloged (re-ingesting the
//! same name is a logged no-op). A bag that fails verification is
//! reported and skipped; the batch keeps going.

use crate::catalog::{Catalog, ContentRecord, LocationRecord, TransferRecord, TransferStatus};
use crate::error::{IngestError, IngestResult, IoResultExt};
use crate::transfer::file_url_dir;
use bagpack_core::{
    digest_file, BagFile, BagVerifier, CancelToken, DigestAlgorithm, VerifyOptions,
};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct IngestOptions {
    /// Value of the `creator` column on new bagit rows.
    pub creator: String,
    pub cancel: CancelToken,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            creator: "bagpack".into(),
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Ingested,
    Skipped,
    Failed,
}

/// Per-archive outcome of one batch run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub name: String,
    pub status: IngestStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    pub fn count(&self, status: IngestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

pub struct Ingest<'a> {
    catalog: &'a Catalog,
    ingest_location: LocationRecord,
    options: IngestOptions,
}

impl<'a> Ingest<'a> {
    pub fn new(
        catalog: &'a Catalog,
        ingest_location_name: &str,
        options: IngestOptions,
    ) -> IngestResult<Self> {
        let ingest_location = catalog
            .location_by_name(ingest_location_name)?
            .ok_or_else(|| {
                IngestError::Config(format!("unknown ingest location '{ingest_location_name}'"))
            })?;
        if ingest_location.path.scheme() != "file" {
            return Err(IngestError::Config(format!(
                "ingest location '{}' must use the file scheme, not '{}'",
                ingest_location.name,
                ingest_location.path.scheme()
            )));
        }
        Ok(Self {
            catalog,
            ingest_location,
            options,
        })
    }

    /// Walks the ingest directory once. Verification failures become
    /// `Failed` outcomes, not batch failures; catalog failures and
    /// cancellation abort.
    pub fn run(&self) -> IngestResult<IngestReport> {
        let dir = file_url_dir(&self.ingest_location.path)?;
        let mut report = IngestReport::default();

        for (name, path) in candidate_bags(&dir)? {
            if self.options.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            if self.catalog.bagit_by_name(&name)?.is_some() {
                info!(bag = %name, "already ingested");
                report.outcomes.push(IngestOutcome {
                    name,
                    status: IngestStatus::Skipped,
                    detail: "already cataloged".into(),
                });
                continue;
            }

            match self.ingest_one(&name, &path) {
                Ok(detail) => {
                    report.outcomes.push(IngestOutcome {
                        name,
                        status: IngestStatus::Ingested,
                        detail,
                    });
                }
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(err @ IngestError::Catalog(_)) => return Err(err),
                Err(err) => {
                    warn!(bag = %name, %err, "ingest failed, continuing batch");
                    report.outcomes.push(IngestOutcome {
                        name,
                        status: IngestStatus::Failed,
                        detail: err.to_string(),
                    });
                }
            }
        }

        info!(
            ingested = report.count(IngestStatus::Ingested),
            skipped = report.count(IngestStatus::Skipped),
            failed = report.count(IngestStatus::Failed),
            "ingest pass complete"
        );
        Ok(report)
    }

    fn ingest_one(&self, name: &str, path: &Path) -> IngestResult<String> {
        info!(bag = %name, "deep checking bag");

        let mut metainfo = Vec::new();
        let mut verifier = BagVerifier::open(path)?;
        verifier.verify(VerifyOptions {
            metainfo_sink: Some(&mut metainfo),
            bag_info_sink: None,
            cancel: self.options.cancel.clone(),
        })?;

        let files: Vec<BagFile> = serde_json::from_slice(&metainfo).map_err(|e| {
            IngestError::Config(format!("invalid metainfo.json in '{name}': {e}"))
        })?;

        let sha512 = digest_file(path, DigestAlgorithm::Sha512)?;
        let size = fs::metadata(path)
            .io_context(|| format!("cannot stat '{}'", path.display()))?
            .len() as i64;

        let bagit =
            self.catalog
                .insert_bagit(name, size, &sha512, &self.options.creator, Utc::now())?;

        let now = Utc::now();
        self.catalog.store_transfer(&TransferRecord {
            bagit_id: bagit.id,
            location_id: self.ingest_location.id,
            start: Some(now),
            end: Some(now),
            status: TransferStatus::Ok,
            message: "initial ingest location".into(),
        })?;

        for file in &files {
            self.catalog.add_content(&ContentRecord {
                bagit_id: bagit.id,
                zippath: file.zip_path.clone(),
                diskpath: file.path.clone(),
                filesize: file.size as i64,
                sha256: file.digests.get(&DigestAlgorithm::Sha256).cloned(),
                sha512: file.digests.get(&DigestAlgorithm::Sha512).cloned(),
                md5: file.digests.get(&DigestAlgorithm::Md5).cloned(),
            })?;
        }

        info!(bag = %name, files = files.len(), "ingested");
        Ok(format!("ingested with {} payload entries", files.len()))
    }
}

/// Regular `*.zip` files in the ingest directory, dotfiles excluded,
/// sorted by name for a stable batch order.
fn candidate_bags(dir: &Path) -> IngestResult<Vec<(String, PathBuf)>> {
    let entries =
        fs::read_dir(dir).io_context(|| format!("cannot read ingest dir '{}'", dir.display()))?;

    let mut bags = Vec::new();
    for entry in entries {
        let entry = entry.io_context(|| format!("cannot read ingest dir '{}'", dir.display()))?;
        let file_type = entry
            .file_type()
            .io_context(|| format!("cannot stat '{}'", entry.path().display()))?;
        if !file_type.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with('.') || !name.ends_with(".zip") {
            continue;
        }
        bags.push((name, entry.path()));
    }
    bags.sort();
    Ok(bags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.zip"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.zip"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub.zip")).unwrap();

        let bags = candidate_bags(dir.path()).unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].0, "good.zip");
    }
}
