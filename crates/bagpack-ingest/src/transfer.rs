//! Location-to-location replication of cataloged bags.
//!
//! The coordinator walks archives × locations and copies each bag from
//! the ingest location to every other registered location that has no
//! `ok` ledger row yet. Encrypted targets get the stream wrapped in
//! [`EncryptReader`]; every copy is teed through SHA-512 and the result
//! is checked against the catalog (`sha512` for plain copies,
//! `sha512_aes` for encrypted ones — recorded by the first encrypted
//! transfer, matched by every later one). Both outcomes end up in the
//! `bagit_location` ledger, so a re-run skips finished pairs and retries
//! failed ones.

use crate::catalog::{BagitRecord, Catalog, LocationRecord, TransferRecord, TransferStatus};
use crate::cipher::{EncryptReader, KeyDir, ENC_EXT};
use crate::error::{IngestError, IngestResult, IoResultExt};
use bagpack_core::{CancelToken, DigestAlgorithm, DigestEngine};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// External remote file transport (the sftp side of the world). The
/// implementation must hash what it actually sends.
pub trait RemoteTransport {
    /// Streams `reader` to `url` as `user`, returning the byte count and
    /// the SHA-512 hex of the transferred stream.
    fn put(
        &mut self,
        url: &Url,
        user: &str,
        reader: &mut dyn Read,
        deadline: Option<Duration>,
    ) -> IngestResult<(u64, String)>;
}

pub struct TransferOptions {
    /// Deadline handed to the remote transport; local file I/O carries
    /// none.
    pub remote_deadline: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            remote_deadline: None,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub transferred: usize,
    pub skipped: usize,
}

pub struct TransferCoordinator<'a> {
    catalog: &'a Catalog,
    keys: &'a KeyDir,
    ingest_location: LocationRecord,
    transport: Option<&'a mut dyn RemoteTransport>,
    options: TransferOptions,
}

impl<'a> TransferCoordinator<'a> {
    /// `transport` may be `None` when every non-ingest location is
    /// `file://`-addressed.
    pub fn new(
        catalog: &'a Catalog,
        keys: &'a KeyDir,
        ingest_location_name: &str,
        transport: Option<&'a mut dyn RemoteTransport>,
        options: TransferOptions,
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
            keys,
            ingest_location,
            transport,
            options,
        })
    }

    /// Plans and executes every missing (archive, location) copy, in
    /// catalog order. The first failure surfaces after its ledger row is
    /// written.
    pub fn run(&mut self) -> IngestResult<TransferSummary> {
        let locations = self.catalog.locations()?;
        let bagits = self.catalog.bagits()?;
        let mut summary = TransferSummary::default();

        for bagit in &bagits {
            for location in &locations {
                if location.id == self.ingest_location.id {
                    continue;
                }
                if self.options.cancel.is_cancelled() {
                    return Err(IngestError::Cancelled);
                }

                if let Some(existing) = self.catalog.transfer(bagit.id, location.id)? {
                    if existing.status == TransferStatus::Ok {
                        debug!(bag = %bagit.name, location = %location.name, "already transferred");
                        summary.skipped += 1;
                        continue;
                    }
                }

                self.transfer_one(bagit, location)?;
                summary.transferred += 1;
            }
        }

        info!(
            transferred = summary.transferred,
            skipped = summary.skipped,
            "transfer pass complete"
        );
        Ok(summary)
    }

    /// One copy, ledger row included on both outcomes.
    fn transfer_one(&mut self, bagit: &BagitRecord, target: &LocationRecord) -> IngestResult<()> {
        let start = Utc::now();
        match self.execute(bagit, target) {
            Ok(message) => {
                self.catalog.store_transfer(&TransferRecord {
                    bagit_id: bagit.id,
                    location_id: target.id,
                    start: Some(start),
                    end: Some(Utc::now()),
                    status: TransferStatus::Ok,
                    message: message.clone(),
                })?;
                info!(bag = %bagit.name, location = %target.name, %message, "transfer ok");
                Ok(())
            }
            Err(err) => {
                self.catalog.store_transfer(&TransferRecord {
                    bagit_id: bagit.id,
                    location_id: target.id,
                    start: Some(start),
                    end: Some(Utc::now()),
                    status: TransferStatus::Error,
                    message: err.to_string(),
                })?;
                warn!(bag = %bagit.name, location = %target.name, %err, "transfer failed");
                Err(err)
            }
        }
    }

    fn execute(&mut self, bagit: &BagitRecord, target: &LocationRecord) -> IngestResult<String> {
        let source_dir = file_url_dir(&self.ingest_location.path)?;
        let source_path = source_dir.join(&bagit.name);
        let metadata = fs::metadata(&source_path)
            .io_context(|| format!("cannot stat source '{}'", source_path.display()))?;
        if metadata.is_dir() {
            return Err(IngestError::Config(format!(
                "source '{}' is a directory",
                source_path.display()
            )));
        }
        let source = File::open(&source_path)
            .io_context(|| format!("cannot open source '{}'", source_path.display()))?;

        let (bytes, observed) = if target.encrypted {
            let (key, iv) = self.keys.load_or_generate(&bagit.name)?;
            let mut encrypted = EncryptReader::new(source, &key, &iv)?;
            let result = self.dispatch(&mut encrypted, bagit, target, true)?;
            debug!(
                bag = %bagit.name,
                tail = %encrypted.into_tail_hash(),
                "ciphertext hmac tail; decrypt with: openssl enc -aes-256-ctr -nosalt -d \
                 -K $(cat {name}.key) -iv $(cat {name}.iv)",
                name = bagit.name
            );
            result
        } else {
            let mut plain = source;
            self.dispatch(&mut plain, bagit, target, false)?
        };

        if target.encrypted {
            // Reload: an earlier encrypted transfer in this run may have
            // recorded the ciphertext hash already.
            let current = self
                .catalog
                .bagit_by_name(&bagit.name)?
                .ok_or_else(|| IngestError::Catalog(format!("bagit '{}' vanished", bagit.name)))?;
            match current.sha512_aes {
                None => self.catalog.set_sha512_aes(bagit.id, &observed)?,
                Some(expected) if expected.eq_ignore_ascii_case(&observed) => {}
                Some(expected) => {
                    return Err(IngestError::CiphertextHashMismatch {
                        name: bagit.name.clone(),
                        expected,
                        actual: observed,
                    })
                }
            }
        } else if !observed.eq_ignore_ascii_case(&bagit.sha512) {
            return Err(IngestError::DigestMismatch {
                name: bagit.name.clone(),
                expected: bagit.sha512.clone(),
                actual: observed,
            });
        }

        Ok(format!(
            "copied {bytes} bytes: {} -> {}",
            source_path.display(),
            target.name
        ))
    }

    /// Routes the prepared stream to the target by scheme.
    fn dispatch(
        &mut self,
        reader: &mut dyn Read,
        bagit: &BagitRecord,
        target: &LocationRecord,
        encrypted: bool,
    ) -> IngestResult<(u64, String)> {
        let file_name = if encrypted {
            format!("{}.{ENC_EXT}", bagit.name)
        } else {
            bagit.name.clone()
        };

        match target.path.scheme() {
            "file" => {
                let dest_path = file_url_dir(&target.path)?.join(&file_name);
                let mut dest = File::create(&dest_path)
                    .io_context(|| format!("cannot create target '{}'", dest_path.display()))?;
                debug!(dest = %dest_path.display(), "copying to file location");
                copy_with_sha512(reader, &mut dest)
            }
            "sftp" => {
                let url = join_url(&target.path, &file_name)?;
                let user = target.path.username().to_string();
                let deadline = self.options.remote_deadline;
                let transport = self.transport.as_deref_mut().ok_or_else(|| {
                    IngestError::Config(format!(
                        "location '{}' needs a remote transport, none configured",
                        target.name
                    ))
                })?;
                debug!(%url, "putting to remote location");
                transport.put(&url, &user, reader, deadline)
            }
            other => Err(IngestError::Config(format!(
                "invalid target scheme '{other}' for location '{}'",
                target.name
            ))),
        }
    }
}

/// Copies the stream while hashing it, so the observed SHA-512 is of the
/// bytes that actually moved.
fn copy_with_sha512(reader: &mut dyn Read, writer: &mut dyn Write) -> IngestResult<(u64, String)> {
    let mut engine = DigestEngine::new(DigestAlgorithm::Sha512);
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::Io {
                context: "reading transfer source".into(),
                source: e,
            }),
        };
        writer
            .write_all(&buf[..n])
            .io_context(|| "writing transfer target")?;
        engine.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, engine.finalize_hex()))
}

/// Resolves a `file://` location URL to its directory path.
pub(crate) fn file_url_dir(url: &Url) -> IngestResult<PathBuf> {
    url.to_file_path()
        .map_err(|_| IngestError::Config(format!("location path '{url}' is not a usable file url")))
}

/// Appends a file name to a location base URL.
fn join_url(base: &Url, file_name: &str) -> IngestResult<Url> {
    let base_str = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base_str}/{file_name}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_trailing_slash() {
        let base = Url::parse("sftp://user@host/bags/").unwrap();
        let url = join_url(&base, "a.zip.aes256").unwrap();
        assert_eq!(url.as_str(), "sftp://user@host/bags/a.zip.aes256");

        let base = Url::parse("sftp://user@host/bags").unwrap();
        let url = join_url(&base, "a.zip").unwrap();
        assert_eq!(url.as_str(), "sftp://user@host/bags/a.zip");
    }

    #[test]
    fn copy_with_sha512_hashes_what_it_writes() {
        let data = vec![7u8; 150_000];
        let mut out = Vec::new();
        let (n, digest) = copy_with_sha512(&mut data.as_slice(), &mut out).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);

        let expected =
            bagpack_core::digest_reader(&mut data.as_slice(), DigestAlgorithm::Sha512).unwrap();
        assert_eq!(digest, expected);
    }
}
