//! Bag builder: walks a source tree and writes a complete bag archive.
//!
//! Phase order matches the container contract: `bagit.txt` first, then
//! every payload entry (digested in a single fan-out pass while being
//! compressed), then per-algorithm payload manifests, then the tag files
//! (`bagarc/metainfo.json`, `bagarc/renames.csv` when needed,
//! `bag-info.txt`), each digested on write, and finally the per-algorithm
//! tagmanifests.

use crate::archive::{BagWriter, Compression};
use crate::bag::{
    bagit_txt_content, manifest_line, manifest_name, render_bag_info, render_renames,
    tagmanifest_name, Oxum, BAGIT_TXT, BAG_INFO_TXT, METAINFO_JSON, RENAMES_CSV,
};
use crate::cancel::CancelToken;
use crate::digest::{DigestAlgorithm, DigestMap};
use crate::errors::{BagError, BagResult, IoResultExt};
use crate::fanout::fanout;
use crate::names::normalize;
use crate::scratch::Scratch;
use crate::types::{BagFile, FormatClassifier};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Build-time knobs.
pub struct BuildOptions<'a> {
    /// Digest algorithms to compute; at least one, order is kept for
    /// manifest emission.
    pub algorithms: Vec<DigestAlgorithm>,
    /// Caller-provided `bag-info.txt` seed entries.
    pub bag_info: BTreeMap<String, String>,
    /// Rewrite unsafe payload names and record them in `renames.csv`.
    pub fix_names: bool,
    /// External format identifier, consulted once per file.
    pub classifier: Option<&'a dyn FormatClassifier>,
    /// Format ids whose files go into the archive uncompressed.
    pub store_only: Vec<String>,
    pub cancel: CancelToken,
}

impl<'a> BuildOptions<'a> {
    pub fn new(algorithms: Vec<DigestAlgorithm>) -> Self {
        Self {
            algorithms,
            bag_info: BTreeMap::new(),
            fix_names: false,
            classifier: None,
            store_only: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// What a finished build looked like.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub bag_path: PathBuf,
    pub payload_oxum: Oxum,
    pub renamed: usize,
}

pub struct BagBuilder<'a> {
    source: PathBuf,
    bag_path: PathBuf,
    options: BuildOptions<'a>,
}

impl<'a> BagBuilder<'a> {
    /// Prepares a build. The target path must not exist yet; the check is
    /// repeated when the file is created.
    pub fn new(source_dir: &Path, bag_path: &Path, mut options: BuildOptions<'a>) -> BagResult<Self> {
        if options.algorithms.is_empty() {
            return Err(BagError::Config(
                "at least one digest algorithm is required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        options.algorithms.retain(|alg| seen.insert(*alg));
        if !source_dir.is_dir() {
            return Err(BagError::Config(format!(
                "source '{}' is not a directory",
                source_dir.display()
            )));
        }
        if bag_path.exists() {
            return Err(BagError::AlreadyExists(bag_path.display().to_string()));
        }
        Ok(Self {
            source: source_dir.to_owned(),
            bag_path: bag_path.to_owned(),
            options,
        })
    }

    /// Runs the build. On error the partial archive file is closed and
    /// left on disk; the caller decides whether to delete it.
    pub fn run(self) -> BagResult<BuildReport> {
        info!(
            bag = %self.bag_path.display(),
            source = %self.source.display(),
            algorithms = ?self.options.algorithms,
            "building bag"
        );

        let mut writer = BagWriter::create(&self.bag_path)?;

        writer.begin_entry(BAGIT_TXT, Compression::Deflate)?;
        writer
            .write_all(bagit_txt_content().as_bytes())
            .io_context(|| "cannot write bagit.txt")?;

        let scratch = Scratch::new()?;
        let mut oxum = Oxum::default();
        let mut renames: Vec<(String, String)> = Vec::new();

        for entry in WalkDir::new(&self.source).sort_by_file_name() {
            self.options.cancel.checkpoint()?;
            let entry = entry.map_err(|e| {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                BagError::Io {
                    context: format!("walking '{}'", self.source.display()),
                    source,
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let bag_file = self.add_payload_file(entry.path(), &mut writer, &scratch, &mut oxum)?;
            if bag_file.renamed() {
                renames.push((bag_file.path, bag_file.zip_path));
            }
        }

        let manifests = self.render_manifests(&scratch)?;
        for algorithm in &self.options.algorithms {
            writer.begin_entry(&manifest_name(*algorithm), Compression::Deflate)?;
            writer
                .write_all(manifests[algorithm].as_bytes())
                .io_context(|| format!("cannot write {}", manifest_name(*algorithm)))?;
        }

        // Tag files, each digested on write for the tagmanifests.
        let mut tag_digests: Vec<(&str, DigestMap)> = Vec::new();

        let metainfo = render_metainfo(&scratch)?;
        tag_digests.push((METAINFO_JSON, self.write_tag_entry(&mut writer, METAINFO_JSON, &metainfo)?));

        if !renames.is_empty() {
            let csv_bytes = render_renames(&renames)?;
            tag_digests.push((RENAMES_CSV, self.write_tag_entry(&mut writer, RENAMES_CSV, &csv_bytes)?));
        }

        let bag_info = render_bag_info(&self.options.bag_info, oxum);
        tag_digests.push((
            BAG_INFO_TXT,
            self.write_tag_entry(&mut writer, BAG_INFO_TXT, bag_info.as_bytes())?,
        ));

        for algorithm in &self.options.algorithms {
            writer.begin_entry(&tagmanifest_name(*algorithm), Compression::Deflate)?;
            for (name, digests) in &tag_digests {
                writer
                    .write_all(manifest_line(&digests[algorithm], name).as_bytes())
                    .io_context(|| format!("cannot write {}", tagmanifest_name(*algorithm)))?;
            }
        }

        writer.finish()?;
        info!(
            streams = oxum.streams,
            octets = oxum.octets,
            renamed = renames.len(),
            "bag complete"
        );

        Ok(BuildReport {
            bag_path: self.bag_path,
            payload_oxum: oxum,
            renamed: renames.len(),
        })
    }

    fn add_payload_file(
        &self,
        path: &Path,
        writer: &mut BagWriter,
        scratch: &Scratch,
        oxum: &mut Oxum,
    ) -> BagResult<BagFile> {
        let metadata = path
            .metadata()
            .io_context(|| format!("cannot stat '{}'", path.display()))?;
        let rel = relative_slash_path(&self.source, path)?;
        let zip_path = if self.options.fix_names {
            normalize(&rel)
        } else {
            rel.clone()
        };

        let mut bag_file = BagFile {
            path: rel,
            zip_path,
            digests: DigestMap::new(),
            size: metadata.len(),
            indexer: None,
        };

        let mut compression = Compression::Deflate;
        if let Some(classifier) = self.options.classifier {
            match classifier.classify(path) {
                Ok(classification) => {
                    if self
                        .options
                        .store_only
                        .iter()
                        .any(|id| *id == classification.format_id)
                    {
                        compression = Compression::Store;
                    }
                    bag_file.indexer = Some(classification.details);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "format classifier failed");
                }
            }
        }

        writer.begin_entry(&bag_file.data_name(), compression)?;
        let mut source =
            File::open(path).io_context(|| format!("cannot open '{}'", path.display()))?;
        bag_file.digests = fanout(&mut source, writer, &self.options.algorithms)?;

        debug!(
            path = %bag_file.path,
            entry = %bag_file.data_name(),
            size = bag_file.size,
            ?compression,
            "packed payload file"
        );

        scratch.put(&bag_file.path, &serde_json::to_string(&bag_file)?)?;
        oxum.add_stream(bag_file.size);
        Ok(bag_file)
    }

    /// Renders every payload manifest by replaying the scratch catalog in
    /// insertion order.
    fn render_manifests(&self, scratch: &Scratch) -> BagResult<BTreeMap<DigestAlgorithm, String>> {
        let mut manifests: BTreeMap<DigestAlgorithm, String> = self
            .options
            .algorithms
            .iter()
            .map(|alg| (*alg, String::new()))
            .collect();

        scratch.for_each(|_key, value| {
            let bag_file: BagFile = serde_json::from_str(value)?;
            for (algorithm, digest) in &bag_file.digests {
                if let Some(body) = manifests.get_mut(algorithm) {
                    body.push_str(&manifest_line(digest, &bag_file.data_name()));
                }
            }
            Ok(())
        })?;

        Ok(manifests)
    }

    /// Writes one tag file, digesting it in the same pass.
    fn write_tag_entry(
        &self,
        writer: &mut BagWriter,
        name: &str,
        bytes: &[u8],
    ) -> BagResult<DigestMap> {
        writer.begin_entry(name, Compression::Deflate)?;
        fanout(&mut Cursor::new(bytes), writer, &self.options.algorithms)
    }
}

/// The metainfo array replays the scratch records verbatim, so the JSON
/// on disk is byte-identical to what was recorded per file.
fn render_metainfo(scratch: &Scratch) -> BagResult<Vec<u8>> {
    let mut out = Vec::from(*b"[");
    let mut first = true;
    scratch.for_each(|_key, value| {
        if !first {
            out.push(b',');
        }
        out.extend_from_slice(value.as_bytes());
        first = false;
        Ok(())
    })?;
    out.push(b']');
    Ok(out)
}

/// Slash-form path of `path` relative to `base`, leading slash preserved.
fn relative_slash_path(base: &Path, path: &Path) -> BagResult<String> {
    let rel = path.strip_prefix(base).map_err(|_| {
        BagError::Config(format!(
            "'{}' is outside the source root '{}'",
            path.display(),
            base.display()
        ))
    })?;

    let mut out = String::new();
    for component in rel.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(out)
}
