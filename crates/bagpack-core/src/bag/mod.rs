//! Bag format: tag-file names, grammars and helpers.
//!
//! The on-disk contract, in one place:
//! - `bagit.txt` — exactly two lines, version then tag-file encoding.
//! - `bag-info.txt` — `Key: value` lines, continuations indented.
//! - `manifest-<alg>.txt` / `tagmanifest-<alg>.txt` — `<hex>  <path>`.
//! - `bagarc/metainfo.json` — JSON array of payload records.
//! - `bagarc/renames.csv` — original path, normalized path.
//!
//! Payload lives under `data/`; everything else is a tag file.

pub mod builder;
pub mod extractor;
pub mod verifier;

use crate::digest::DigestAlgorithm;
use crate::errors::{BagError, BagResult};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const BAGIT_TXT: &str = "bagit.txt";
pub const BAG_INFO_TXT: &str = "bag-info.txt";
pub const METAINFO_JSON: &str = "bagarc/metainfo.json";
pub const RENAMES_CSV: &str = "bagarc/renames.csv";
pub const DATA_PREFIX: &str = "data/";

pub const BAGIT_VERSION: &str = "1.0";
pub const TAG_ENCODING_UTF8: &str = "UTF-8";

pub(crate) const SOFTWARE_AGENT: &str = concat!("bagpack ", env!("CARGO_PKG_VERSION"));

static MANIFEST_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^manifest-(md5|sha1|sha256|sha512|sha3-256|sha3-512)\.txt$").expect("static regex")
});
static TAGMANIFEST_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^tagmanifest-(md5|sha1|sha256|sha512|sha3-256|sha3-512)\.txt$")
        .expect("static regex")
});
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BagIt-Version: (\d+\.\d+)\s*$").expect("static regex"));
static ENCODING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Tag-File-Character-Encoding: (.+?)\s*$").expect("static regex"));
static OXUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Payload-Oxum\s*:\s*(\d+)\.(\d+)\s*$").expect("static regex"));
static MANIFEST_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Fa-f0-9]+)\s+(.+)$").expect("static regex"));

pub fn manifest_name(algorithm: DigestAlgorithm) -> String {
    format!("manifest-{algorithm}.txt")
}

pub fn tagmanifest_name(algorithm: DigestAlgorithm) -> String {
    format!("tagmanifest-{algorithm}.txt")
}

/// Parses `manifest-<alg>.txt` file names; `None` for anything else.
pub(crate) fn manifest_algorithm(entry_name: &str) -> Option<DigestAlgorithm> {
    MANIFEST_FILE_RE
        .captures(entry_name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Parses `tagmanifest-<alg>.txt` file names; `None` for anything else.
pub(crate) fn tagmanifest_algorithm(entry_name: &str) -> Option<DigestAlgorithm> {
    TAGMANIFEST_FILE_RE
        .captures(entry_name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Octet-stream totals over the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Oxum {
    pub octets: u64,
    pub streams: u64,
}

impl Oxum {
    pub fn add_stream(&mut self, octets: u64) {
        self.octets += octets;
        self.streams += 1;
    }
}

impl fmt::Display for Oxum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.octets, self.streams)
    }
}

/// The two declared lines of `bagit.txt`.
pub(crate) fn bagit_txt_content() -> String {
    format!("BagIt-Version: {BAGIT_VERSION}\nTag-File-Character-Encoding: {TAG_ENCODING_UTF8}\n")
}

/// Strict parse of `bagit.txt`: version line, then encoding line.
pub(crate) fn parse_bagit_txt(bytes: &[u8]) -> BagResult<(String, String)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| BagError::Format("bagit.txt is not valid UTF-8".into()))?;
    let mut lines = text.lines();

    let version_line = lines
        .next()
        .ok_or_else(|| BagError::Format("bagit.txt is empty".into()))?;
    let version = VERSION_RE
        .captures(version_line)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| BagError::Format(format!("invalid version line in bagit.txt: {version_line}")))?;

    let encoding_line = lines
        .next()
        .ok_or_else(|| BagError::Format("bagit.txt is missing the encoding line".into()))?;
    let encoding = ENCODING_RE
        .captures(encoding_line)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            BagError::Format(format!("invalid encoding line in bagit.txt: {encoding_line}"))
        })?;

    Ok((version, encoding))
}

/// Renders `bag-info.txt`. Synthesized keys overwrite any caller seed of
/// the same name; embedded newlines become indented continuation lines.
pub(crate) fn render_bag_info(seed: &BTreeMap<String, String>, oxum: Oxum) -> String {
    let mut entries = seed.clone();
    entries.insert("Bag-Software-Agent".into(), SOFTWARE_AGENT.into());
    entries.insert(
        "Bagging-Date".into(),
        Utc::now().format("%Y-%m-%d").to_string(),
    );
    entries.insert("Payload-Oxum".into(), oxum.to_string());

    let mut out = String::new();
    for (key, value) in &entries {
        let value = value.replace("\r\n", "\n").replace('\n', "\n    ");
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// Extracts a declared `Payload-Oxum` from `bag-info.txt`, if any.
pub(crate) fn parse_declared_oxum(bytes: &[u8]) -> BagResult<Option<Oxum>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| BagError::Format("bag-info.txt is not valid UTF-8".into()))?;
    for line in text.lines() {
        if let Some(caps) = OXUM_RE.captures(line) {
            let octets = caps[1]
                .parse::<u64>()
                .map_err(|_| BagError::Format(format!("invalid octet count in bag-info.txt: {line}")))?;
            let streams = caps[2].parse::<u64>().map_err(|_| {
                BagError::Format(format!("invalid stream count in bag-info.txt: {line}"))
            })?;
            return Ok(Some(Oxum { octets, streams }));
        }
    }
    Ok(None)
}

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ManifestLine {
    /// Lower-cased hex digest.
    pub digest: String,
    pub path: String,
}

/// Parses a manifest or tagmanifest body. Blank lines are skipped; any
/// other line must match `<hex> <path>`.
pub(crate) fn parse_manifest(bytes: &[u8], file_name: &str) -> BagResult<Vec<ManifestLine>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| BagError::Format(format!("{file_name} is not valid UTF-8")))?;

    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let caps = MANIFEST_LINE_RE
            .captures(line)
            .ok_or_else(|| BagError::Format(format!("invalid line in {file_name}: {line}")))?;
        lines.push(ManifestLine {
            digest: caps[1].to_lowercase(),
            path: caps[2].to_string(),
        });
    }
    Ok(lines)
}

/// Renders one manifest line.
pub(crate) fn manifest_line(digest: &str, path: &str) -> String {
    format!("{digest}  {path}\n")
}

/// Picks the strongest algorithm out of the recognized manifests present.
pub(crate) fn strongest<'a, I>(available: I) -> Option<DigestAlgorithm>
where
    I: IntoIterator<Item = &'a DigestAlgorithm>,
{
    available.into_iter().copied().max_by_key(|alg| alg.strength())
}

/// Renders `bagarc/renames.csv` from (original, normalized) pairs.
/// Leading slashes are stripped from both columns.
pub(crate) fn render_renames(pairs: &[(String, String)]) -> BagResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for (original, normalized) in pairs {
        writer
            .write_record([
                original.trim_start_matches('/'),
                normalized.trim_start_matches('/'),
            ])
            .map_err(|e| BagError::Format(format!("cannot write renames.csv: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| BagError::Format(format!("cannot flush renames.csv: {e}")))
}

/// Loads `bagarc/renames.csv` as a normalized → original lookup.
pub(crate) fn parse_renames(bytes: &[u8]) -> BagResult<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes);
    let mut map = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| BagError::Format(format!("invalid renames.csv: {e}")))?;
        if record.len() != 2 {
            return Err(BagError::Format(format!(
                "renames.csv row is not a pair: {record:?}"
            )));
        }
        map.insert(record[1].to_string(), record[0].to_string());
    }
    Ok(map)
}
