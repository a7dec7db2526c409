//! End-to-end lifecycle: ingest a built bag, replicate it to plain,
//! encrypted and remote locations, and prove the ledger keeps the whole
//! thing idempotent.

use anyhow::Result;
use bagpack_core::{BagBuilder, BuildOptions, DigestAlgorithm};
use bagpack_ingest::{
    Catalog, EncryptReader, Ingest, IngestError, IngestOptions, IngestStatus, KeyDir,
    RemoteTransport, TransferCoordinator, TransferOptions, TransferStatus,
};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use url::Url;

const BAG_NAME: &str = "archive-0001.zip";

/// Builds the reference bag into `ingest_dir`.
fn build_bag(work: &Path, ingest_dir: &Path) {
    let source = work.join("tree");
    fs::create_dir_all(source.join("a")).unwrap();
    fs::write(source.join("a/x.txt"), b"hello").unwrap();
    fs::write(source.join("a/y.bin"), vec![0u8; 16]).unwrap();

    fs::create_dir_all(ingest_dir).unwrap();
    BagBuilder::new(
        &source,
        &ingest_dir.join(BAG_NAME),
        BuildOptions::new(vec![
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha512,
        ]),
    )
    .unwrap()
    .run()
    .unwrap();
}

fn file_url(path: &Path) -> Url {
    Url::from_file_path(path).unwrap()
}

fn location(catalog: &Catalog, name: &str, dir: &Path, encrypted: bool) {
    fs::create_dir_all(dir).unwrap();
    catalog
        .insert_location(name, &file_url(dir), None, encrypted, 1.0, 0.0)
        .unwrap();
}

fn run_ingest(catalog: &Catalog) -> bagpack_ingest::IngestReport {
    Ingest::new(catalog, "ingest", IngestOptions::default())
        .unwrap()
        .run()
        .unwrap()
}

#[test]
fn ingest_then_transfer_is_idempotent() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    let mirror_dir = work.path().join("mirror");
    let cold_dir = work.path().join("cold");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    location(&catalog, "mirror", &mirror_dir, false);
    location(&catalog, "cold", &cold_dir, true);

    // First ingest catalogs the bag; the second is a no-op.
    let report = run_ingest(&catalog);
    assert_eq!(report.count(IngestStatus::Ingested), 1);

    let bagit = catalog.bagit_by_name(BAG_NAME)?.expect("cataloged");
    assert_eq!(bagit.creator, "bagpack");
    assert!(bagit.sha512_aes.is_none());
    let contents = catalog.contents(bagit.id)?;
    assert_eq!(contents.len(), 2);
    assert!(contents.iter().all(|c| c.sha256.is_some()
        && c.sha512.is_some()
        && c.md5.is_some()));
    assert_eq!(contents[0].zippath, "/a/x.txt");

    let report = run_ingest(&catalog);
    assert_eq!(report.count(IngestStatus::Skipped), 1);
    assert_eq!(catalog.bagits()?.len(), 1);

    // One ledger row already exists for the ingest location itself.
    let ingest_loc = catalog.location_by_name("ingest")?.unwrap();
    assert_eq!(
        catalog.transfer(bagit.id, ingest_loc.id)?.unwrap().status,
        TransferStatus::Ok
    );

    // Transfer fans out to every other location.
    let keys = KeyDir::new(work.path().join("keys"));
    let summary = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()?;
    assert_eq!(summary.transferred, 2);
    assert_eq!(summary.skipped, 0);

    let plain = fs::read(ingest_dir.join(BAG_NAME))?;
    let mirrored = fs::read(mirror_dir.join(BAG_NAME))?;
    assert_eq!(plain, mirrored, "plain copy is byte-identical");

    let encrypted = fs::read(cold_dir.join(format!("{BAG_NAME}.aes256")))?;
    assert_eq!(encrypted.len(), plain.len(), "CTR keeps the length");
    assert_ne!(encrypted, plain);

    // The ciphertext decrypts back with the persisted key material.
    let (key, iv) = keys.load_or_generate(BAG_NAME)?;
    let mut decrypter = EncryptReader::new(encrypted.as_slice(), &key, &iv)?;
    let mut decrypted = Vec::new();
    decrypter.read_to_end(&mut decrypted)?;
    assert_eq!(decrypted, plain);

    let bagit = catalog.bagit_by_name(BAG_NAME)?.unwrap();
    let recorded = bagit.sha512_aes.expect("first encrypted transfer records sha512_aes");
    let observed = bagpack_core::digest_reader(
        &mut encrypted.as_slice(),
        DigestAlgorithm::Sha512,
    )?;
    assert_eq!(recorded, observed);

    // Re-run: nothing to do, nothing rewritten.
    let mirrored_before = fs::metadata(mirror_dir.join(BAG_NAME))?.modified()?;
    let summary = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()?;
    assert_eq!(summary.transferred, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        fs::metadata(mirror_dir.join(BAG_NAME))?.modified()?,
        mirrored_before,
        "skipped transfer does not touch the copy"
    );
    Ok(())
}

#[test]
fn second_encrypted_location_reproduces_ciphertext_hash() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    location(&catalog, "cold-a", &work.path().join("cold-a"), true);
    location(&catalog, "cold-b", &work.path().join("cold-b"), true);

    run_ingest(&catalog);

    let keys = KeyDir::new(work.path().join("keys"));
    let summary = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()?;
    assert_eq!(summary.transferred, 2);

    let a = fs::read(work.path().join("cold-a").join(format!("{BAG_NAME}.aes256")))?;
    let b = fs::read(work.path().join("cold-b").join(format!("{BAG_NAME}.aes256")))?;
    assert_eq!(a, b, "same key and iv give the same ciphertext everywhere");

    let bagit = catalog.bagit_by_name(BAG_NAME)?.unwrap();
    assert!(bagit.sha512_aes.is_some());
    Ok(())
}

#[test]
fn tampered_key_material_fails_ciphertext_check() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    location(&catalog, "cold-a", &work.path().join("cold-a"), true);

    run_ingest(&catalog);

    let keys = KeyDir::new(work.path().join("keys"));
    TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?.run()?;

    // Swap the key under the archive: the next encrypted copy produces a
    // different ciphertext stream than the recorded sha512_aes.
    fs::write(
        work.path().join("keys").join(format!("{BAG_NAME}.key")),
        hex::encode([0xEEu8; 32]),
    )?;
    location(&catalog, "cold-b", &work.path().join("cold-b"), true);

    let err = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()
        .unwrap_err();
    assert!(
        matches!(err, IngestError::CiphertextHashMismatch { .. }),
        "got {err}"
    );

    let bagit = catalog.bagit_by_name(BAG_NAME)?.unwrap();
    let cold_b = catalog.location_by_name("cold-b")?.unwrap();
    let row = catalog.transfer(bagit.id, cold_b.id)?.unwrap();
    assert_eq!(row.status, TransferStatus::Error);
    assert!(row.message.contains("ciphertext hash mismatch"));
    Ok(())
}

#[test]
fn corrupted_source_fails_plain_digest_check() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    location(&catalog, "mirror", &work.path().join("mirror"), false);

    run_ingest(&catalog);

    // Corrupt the archive after it was cataloged.
    let mut bytes = fs::read(ingest_dir.join(BAG_NAME))?;
    bytes.push(0xFF);
    fs::write(ingest_dir.join(BAG_NAME), &bytes)?;

    let keys = KeyDir::new(work.path().join("keys"));
    let err = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()
        .unwrap_err();
    assert!(matches!(err, IngestError::DigestMismatch { .. }), "got {err}");

    let bagit = catalog.bagit_by_name(BAG_NAME)?.unwrap();
    let mirror = catalog.location_by_name("mirror")?.unwrap();
    let row = catalog.transfer(bagit.id, mirror.id)?.unwrap();
    assert_eq!(row.status, TransferStatus::Error);
    Ok(())
}

/// In-memory stand-in for the sftp transport.
#[derive(Default)]
struct FakeTransport {
    files: HashMap<String, Vec<u8>>,
    puts: usize,
}

impl RemoteTransport for FakeTransport {
    fn put(
        &mut self,
        url: &Url,
        _user: &str,
        reader: &mut dyn Read,
        _deadline: Option<Duration>,
    ) -> bagpack_ingest::IngestResult<(u64, String)> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let digest =
            bagpack_core::digest_reader(&mut bytes.as_slice(), DigestAlgorithm::Sha512)?;
        let len = bytes.len() as u64;
        self.files.insert(url.to_string(), bytes);
        self.puts += 1;
        Ok((len, digest))
    }
}

#[test]
fn remote_location_goes_through_the_transport() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    catalog.insert_location(
        "offsite",
        &Url::parse("sftp://archive@offsite.example.org/bags")?,
        None,
        true,
        1.0,
        4.0,
    )?;

    run_ingest(&catalog);

    let keys = KeyDir::new(work.path().join("keys"));
    let mut transport = FakeTransport::default();
    let summary = TransferCoordinator::new(
        &catalog,
        &keys,
        "ingest",
        Some(&mut transport),
        TransferOptions {
            remote_deadline: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    )?
    .run()?;
    assert_eq!(summary.transferred, 1);
    assert_eq!(transport.puts, 1);

    let key = format!("sftp://archive@offsite.example.org/bags/{BAG_NAME}.aes256");
    let ciphertext = transport.files.get(&key).expect("uploaded under .aes256 name");

    let plain = fs::read(ingest_dir.join(BAG_NAME))?;
    assert_ne!(*ciphertext, plain);

    let bagit = catalog.bagit_by_name(BAG_NAME)?.unwrap();
    assert!(bagit.sha512_aes.is_some(), "remote encrypted transfer records sha512_aes");

    // Idempotent: the ok row suppresses further network traffic.
    let summary = TransferCoordinator::new(
        &catalog,
        &keys,
        "ingest",
        Some(&mut transport),
        TransferOptions::default(),
    )?
    .run()?;
    assert_eq!(summary.transferred, 0);
    assert_eq!(transport.puts, 1, "no second put");
    Ok(())
}

#[test]
fn sftp_location_without_transport_is_a_config_error() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);
    catalog.insert_location(
        "offsite",
        &Url::parse("sftp://archive@offsite.example.org/bags")?,
        None,
        false,
        1.0,
        4.0,
    )?;
    run_ingest(&catalog);

    let keys = KeyDir::new(work.path().join("keys"));
    let err = TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())?
        .run()
        .unwrap_err();
    assert!(matches!(err, IngestError::Config(_)), "got {err}");
    Ok(())
}

#[test]
fn broken_bag_fails_but_batch_continues() -> Result<()> {
    let work = tempfile::tempdir()?;
    let ingest_dir = work.path().join("ingest");
    build_bag(work.path(), &ingest_dir);
    fs::write(ingest_dir.join("broken.zip"), b"this is not a zip archive")?;

    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    location(&catalog, "ingest", &ingest_dir, false);

    let report = run_ingest(&catalog);
    assert_eq!(report.count(IngestStatus::Ingested), 1);
    assert_eq!(report.count(IngestStatus::Failed), 1);

    let failed = report
        .outcomes
        .iter()
        .find(|o| o.status == IngestStatus::Failed)
        .unwrap();
    assert_eq!(failed.name, "broken.zip");

    assert!(catalog.bagit_by_name(BAG_NAME)?.is_some());
    assert!(catalog.bagit_by_name("broken.zip")?.is_none());
    Ok(())
}

#[test]
fn non_file_ingest_location_rejected() -> Result<()> {
    let catalog = Catalog::open_in_memory()?;
    catalog.ensure_schema()?;
    catalog.insert_location(
        "ingest",
        &Url::parse("sftp://archive@host/in")?,
        None,
        false,
        1.0,
        0.0,
    )?;

    let err = match Ingest::new(&catalog, "ingest", IngestOptions::default()) {
        Err(e) => e,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, IngestError::Config(_)));

    let keys = KeyDir::new("/tmp/unused-keydir");
    let err = match TransferCoordinator::new(&catalog, &keys, "ingest", None, TransferOptions::default())
    {
        Err(e) => e,
        Ok(_) => panic!("expected error"),
    };
    assert!(matches!(err, IngestError::Config(_)));
    Ok(())
}
