//! Durable registry of bags, storage locations and transfer state.
//!
//! Four tables: `bagit` (one row per archive; `sha512` is the hash of
//! the plain bytes, `sha512_aes` the hash of the encrypted bytes and
//! immutable once set), `location` (URL-addressed storage targets),
//! `bagit_location` (one row per (archive, location) pair — the transfer
//! ledger), and `content` (per-file manifest rows reflected from
//! `bagarc/metainfo.json`).
//!
//! Every statement is schema-qualified; the default schema `main` is
//! what SQLite calls the primary database, so an `ATTACH`ed schema works
//! without code changes.

use crate::error::{IngestError, IngestResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use url::Url;

/// Outcome recorded for one (archive, location) transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    Error,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Ok => "ok",
            TransferStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> IngestResult<Self> {
        match s {
            "ok" => Ok(TransferStatus::Ok),
            "error" => Ok(TransferStatus::Error),
            other => Err(IngestError::Catalog(format!(
                "unknown transfer status '{other}'"
            ))),
        }
    }
}

/// One archive row.
#[derive(Debug, Clone)]
pub struct BagitRecord {
    pub id: i64,
    pub name: String,
    pub size: i64,
    /// SHA-512 of the plain archive bytes.
    pub sha512: String,
    /// SHA-512 of the encrypted archive bytes; set by the first encrypted
    /// transfer and immutable afterwards.
    pub sha512_aes: Option<String>,
    pub report: Option<String>,
    pub creator: String,
    pub creation_date: DateTime<Utc>,
}

/// One storage location row.
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub id: i64,
    pub name: String,
    /// `file://` or `sftp://` base URL.
    pub path: Url,
    pub params: Option<String>,
    pub encrypted: bool,
    pub quality: f64,
    pub costs: f64,
}

/// One row of the transfer ledger.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub bagit_id: i64,
    pub location_id: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: TransferStatus,
    pub message: String,
}

/// One per-file manifest row.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub bagit_id: i64,
    pub zippath: String,
    pub diskpath: String,
    pub filesize: i64,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
    pub md5: Option<String>,
}

const LOCATION_SCHEMES: [&str; 2] = ["file", "sftp"];

pub struct Catalog {
    conn: Connection,
    schema: String,
}

impl Catalog {
    pub fn open(path: &Path) -> IngestResult<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
            schema: "main".into(),
        })
    }

    pub fn open_in_memory() -> IngestResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            schema: "main".into(),
        })
    }

    /// Uses a different schema name for every statement (e.g. after
    /// `ATTACH DATABASE`).
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    /// Creates any missing tables. Schema lifecycle proper belongs to the
    /// deployment; this is the bootstrap used by tests and first runs.
    pub fn ensure_schema(&self) -> IngestResult<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {bagit} (
                bagitid      INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT NOT NULL UNIQUE,
                filesize     INTEGER NOT NULL,
                sha512       TEXT NOT NULL,
                sha512_aes   TEXT,
                report       TEXT,
                creator      TEXT NOT NULL,
                creationdate TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS {location} (
                locationid INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL UNIQUE,
                path       TEXT NOT NULL,
                params     TEXT,
                encrypted  INTEGER NOT NULL DEFAULT 0,
                quality    REAL NOT NULL DEFAULT 0,
                costs      REAL NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS {bagit_location} (
                bagitid        INTEGER NOT NULL,
                locationid     INTEGER NOT NULL,
                transfer_start TEXT,
                transfer_end   TEXT,
                status         TEXT NOT NULL,
                message        TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (bagitid, locationid)
             );
             CREATE TABLE IF NOT EXISTS {content} (
                bagitid  INTEGER NOT NULL,
                zippath  TEXT NOT NULL,
                diskpath TEXT NOT NULL,
                filesize INTEGER NOT NULL,
                sha256   TEXT,
                sha512   TEXT,
                md5      TEXT
             );",
            bagit = self.table("bagit"),
            location = self.table("location"),
            bagit_location = self.table("bagit_location"),
            content = self.table("content"),
        ))?;
        Ok(())
    }

    /* bagit rows */

    pub fn insert_bagit(
        &self,
        name: &str,
        size: i64,
        sha512: &str,
        creator: &str,
        creation_date: DateTime<Utc>,
    ) -> IngestResult<BagitRecord> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (name, filesize, sha512, creator, creationdate)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.table("bagit")
                ),
                params![name, size, sha512, creator, format_ts(creation_date)],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    IngestError::AlreadyExists(name.to_string())
                }
                other => other.into(),
            })?;

        Ok(BagitRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            size,
            sha512: sha512.to_string(),
            sha512_aes: None,
            report: None,
            creator: creator.to_string(),
            creation_date,
        })
    }

    pub fn bagit_by_name(&self, name: &str) -> IngestResult<Option<BagitRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT bagitid, name, filesize, sha512, sha512_aes, report, creator, creationdate
                     FROM {} WHERE name = ?1",
                    self.table("bagit")
                ),
                params![name],
                raw_bagit_row,
            )
            .optional()?;
        row.map(bagit_from_raw).transpose()
    }

    pub fn bagits(&self) -> IngestResult<Vec<BagitRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT bagitid, name, filesize, sha512, sha512_aes, report, creator, creationdate
             FROM {} ORDER BY bagitid",
            self.table("bagit")
        ))?;
        let rows = stmt.query_map([], raw_bagit_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(bagit_from_raw(row?)?);
        }
        Ok(out)
    }

    /// Records the ciphertext hash. Once set, a different value is a
    /// configuration error; writing the same value again is a no-op.
    pub fn set_sha512_aes(&self, bagit_id: i64, sha512_aes: &str) -> IngestResult<()> {
        let existing: Option<String> = self.conn.query_row(
            &format!(
                "SELECT sha512_aes FROM {} WHERE bagitid = ?1",
                self.table("bagit")
            ),
            params![bagit_id],
            |row| row.get(0),
        )?;

        match existing {
            None => {
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET sha512_aes = ?1 WHERE bagitid = ?2",
                        self.table("bagit")
                    ),
                    params![sha512_aes, bagit_id],
                )?;
                Ok(())
            }
            Some(current) if current.eq_ignore_ascii_case(sha512_aes) => Ok(()),
            Some(current) => Err(IngestError::Config(format!(
                "sha512_aes for bagit {bagit_id} is already set to {current}, refusing {sha512_aes}"
            ))),
        }
    }

    /* location rows */

    pub fn insert_location(
        &self,
        name: &str,
        path: &Url,
        params_field: Option<&str>,
        encrypted: bool,
        quality: f64,
        costs: f64,
    ) -> IngestResult<LocationRecord> {
        if !LOCATION_SCHEMES.contains(&path.scheme()) {
            return Err(IngestError::Config(format!(
                "location '{name}' has unsupported scheme '{}'",
                path.scheme()
            )));
        }
        self.conn.execute(
            &format!(
                "INSERT INTO {} (name, path, params, encrypted, quality, costs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.table("location")
            ),
            params![name, path.as_str(), params_field, encrypted, quality, costs],
        )?;
        Ok(LocationRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            path: path.clone(),
            params: params_field.map(str::to_string),
            encrypted,
            quality,
            costs,
        })
    }

    /// All locations in configuration order (insertion order).
    pub fn locations(&self) -> IngestResult<Vec<LocationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT locationid, name, path, params, encrypted, quality, costs
             FROM {} ORDER BY locationid",
            self.table("location")
        ))?;
        let rows = stmt.query_map([], raw_location_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(location_from_raw(row?)?);
        }
        Ok(out)
    }

    pub fn location_by_name(&self, name: &str) -> IngestResult<Option<LocationRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT locationid, name, path, params, encrypted, quality, costs
                     FROM {} WHERE name = ?1",
                    self.table("location")
                ),
                params![name],
                raw_location_row,
            )
            .optional()?;
        row.map(location_from_raw).transpose()
    }

    /* transfer ledger */

    pub fn transfer(
        &self,
        bagit_id: i64,
        location_id: i64,
    ) -> IngestResult<Option<TransferRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT transfer_start, transfer_end, status, message
                     FROM {} WHERE bagitid = ?1 AND locationid = ?2",
                    self.table("bagit_location")
                ),
                params![bagit_id, location_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(start, end, status, message)| {
            Ok(TransferRecord {
                bagit_id,
                location_id,
                start: parse_ts_opt(start)?,
                end: parse_ts_opt(end)?,
                status: TransferStatus::parse(&status)?,
                message,
            })
        })
        .transpose()
    }

    /// Upserts the ledger row; (bagitid, locationid) is the primary key,
    /// so replaying a transfer stays idempotent.
    pub fn store_transfer(&self, record: &TransferRecord) -> IngestResult<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {}
                 (bagitid, locationid, transfer_start, transfer_end, status, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.table("bagit_location")
            ),
            params![
                record.bagit_id,
                record.location_id,
                record.start.map(format_ts),
                record.end.map(format_ts),
                record.status.as_str(),
                record.message,
            ],
        )?;
        Ok(())
    }

    /* content rows */

    pub fn add_content(&self, record: &ContentRecord) -> IngestResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (bagitid, zippath, diskpath, filesize, sha256, sha512, md5)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.table("content")
            ),
            params![
                record.bagit_id,
                record.zippath,
                record.diskpath,
                record.filesize,
                record.sha256,
                record.sha512,
                record.md5,
            ],
        )?;
        Ok(())
    }

    pub fn contents(&self, bagit_id: i64) -> IngestResult<Vec<ContentRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT bagitid, zippath, diskpath, filesize, sha256, sha512, md5
             FROM {} WHERE bagitid = ?1 ORDER BY rowid",
            self.table("content")
        ))?;
        let rows = stmt.query_map(params![bagit_id], |row| {
            Ok(ContentRecord {
                bagit_id: row.get(0)?,
                zippath: row.get(1)?,
                diskpath: row.get(2)?,
                filesize: row.get(3)?,
                sha256: row.get(4)?,
                sha512: row.get(5)?,
                md5: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/* row mapping */

type RawBagit = (
    i64,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn raw_bagit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawBagit> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn bagit_from_raw(raw: RawBagit) -> IngestResult<BagitRecord> {
    let (id, name, size, sha512, sha512_aes, report, creator, creationdate) = raw;
    Ok(BagitRecord {
        id,
        name,
        size,
        sha512,
        sha512_aes,
        report,
        creator,
        creation_date: parse_ts(&creationdate)?,
    })
}

type RawLocation = (i64, String, String, Option<String>, bool, f64, f64);

fn raw_location_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLocation> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn location_from_raw(raw: RawLocation) -> IngestResult<LocationRecord> {
    let (id, name, path, params, encrypted, quality, costs) = raw;
    Ok(LocationRecord {
        id,
        name,
        path: Url::parse(&path)?,
        params,
        encrypted,
        quality,
        costs,
    })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> IngestResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IngestError::Catalog(format!("invalid timestamp '{s}': {e}")))
}

fn parse_ts_opt(s: Option<String>) -> IngestResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.ensure_schema().unwrap();
        catalog
    }

    #[test]
    fn bagit_name_is_unique() {
        let catalog = catalog();
        catalog
            .insert_bagit("a.zip", 10, "deadbeef", "bagpack", Utc::now())
            .unwrap();
        let err = catalog
            .insert_bagit("a.zip", 11, "cafebabe", "bagpack", Utc::now())
            .unwrap_err();
        assert!(matches!(err, IngestError::AlreadyExists(name) if name == "a.zip"));
    }

    #[test]
    fn sha512_aes_immutable_once_set() {
        let catalog = catalog();
        let bagit = catalog
            .insert_bagit("a.zip", 10, "deadbeef", "bagpack", Utc::now())
            .unwrap();

        catalog.set_sha512_aes(bagit.id, "aaaa").unwrap();
        // Same value again: fine.
        catalog.set_sha512_aes(bagit.id, "AAAA").unwrap();
        // Different value: refused.
        let err = catalog.set_sha512_aes(bagit.id, "bbbb").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));

        let reloaded = catalog.bagit_by_name("a.zip").unwrap().unwrap();
        assert_eq!(reloaded.sha512_aes.as_deref(), Some("aaaa"));
    }

    #[test]
    fn location_scheme_validated() {
        let catalog = catalog();
        let err = catalog
            .insert_location(
                "web",
                &Url::parse("https://example.org/bags").unwrap(),
                None,
                false,
                1.0,
                0.0,
            )
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));

        catalog
            .insert_location(
                "mirror",
                &Url::parse("sftp://user@mirror.example.org/bags").unwrap(),
                None,
                true,
                1.0,
                2.5,
            )
            .unwrap();
        let loaded = catalog.location_by_name("mirror").unwrap().unwrap();
        assert!(loaded.encrypted);
        assert_eq!(loaded.path.scheme(), "sftp");
    }

    #[test]
    fn transfer_ledger_upserts_by_pair() {
        let catalog = catalog();
        let bagit = catalog
            .insert_bagit("a.zip", 10, "deadbeef", "bagpack", Utc::now())
            .unwrap();
        let loc = catalog
            .insert_location(
                "mirror",
                &Url::parse("file:///srv/mirror").unwrap(),
                None,
                false,
                1.0,
                0.0,
            )
            .unwrap();

        assert!(catalog.transfer(bagit.id, loc.id).unwrap().is_none());

        let now = Utc::now();
        catalog
            .store_transfer(&TransferRecord {
                bagit_id: bagit.id,
                location_id: loc.id,
                start: Some(now),
                end: None,
                status: TransferStatus::Error,
                message: "boom".into(),
            })
            .unwrap();
        catalog
            .store_transfer(&TransferRecord {
                bagit_id: bagit.id,
                location_id: loc.id,
                start: Some(now),
                end: Some(now),
                status: TransferStatus::Ok,
                message: "copied".into(),
            })
            .unwrap();

        let row = catalog.transfer(bagit.id, loc.id).unwrap().unwrap();
        assert_eq!(row.status, TransferStatus::Ok);
        assert_eq!(row.message, "copied");
        assert!(row.end.is_some());
    }

    #[test]
    fn content_rows_roundtrip() {
        let catalog = catalog();
        let bagit = catalog
            .insert_bagit("a.zip", 10, "deadbeef", "bagpack", Utc::now())
            .unwrap();

        catalog
            .add_content(&ContentRecord {
                bagit_id: bagit.id,
                zippath: "/a/x.txt".into(),
                diskpath: "/a/x.txt".into(),
                filesize: 5,
                sha256: None,
                sha512: Some("feed".into()),
                md5: Some("5d41402abc4b2a76b9719d911017c592".into()),
            })
            .unwrap();

        let contents = catalog.contents(bagit.id).unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].zippath, "/a/x.txt");
        assert_eq!(contents[0].sha256, None);
    }
}
