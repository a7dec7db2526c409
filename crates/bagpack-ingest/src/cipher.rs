//! At-rest encryption for replicated bags.
//!
//! Key material is per archive: a 32-byte key and a 16-byte IV, generated
//! on the first encrypted transfer and persisted hex-encoded as
//! `<keydir>/<name>.key` / `<keydir>/<name>.iv` with mode 0600. Later
//! encrypted transfers reuse them, which is what makes the recorded
//! ciphertext hash reproducible. The cipher is AES-256-CTR, so a stored
//! copy decrypts with stock tooling:
//! `openssl enc -aes-256-ctr -nosalt -d -K <key> -iv <iv>`.

use crate::error::{IngestError, IngestResult, IoResultExt};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File-name suffix for encrypted copies.
pub const ENC_EXT: &str = "aes256";

pub const KEY_LEN: usize = 32;
/// AES block size; CTR mode consumes a block-sized IV.
pub const IV_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Per-archive key material store.
pub struct KeyDir {
    dir: PathBuf,
}

impl KeyDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the archive's key and IV, generating and persisting them
    /// on first use.
    pub fn load_or_generate(&self, name: &str) -> IngestResult<([u8; KEY_LEN], [u8; IV_LEN])> {
        let key_path = self.dir.join(format!("{name}.key"));
        let iv_path = self.dir.join(format!("{name}.iv"));

        let key: [u8; KEY_LEN] = match self.read_hex(&key_path)? {
            Some(bytes) => bytes.try_into().map_err(|_| {
                IngestError::Config(format!("key file '{}' has the wrong length", key_path.display()))
            })?,
            None => {
                let mut key = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                self.write_hex(&key_path, &key)?;
                debug!(path = %key_path.display(), "generated archive key");
                key
            }
        };

        let iv: [u8; IV_LEN] = match self.read_hex(&iv_path)? {
            Some(bytes) => bytes.try_into().map_err(|_| {
                IngestError::Config(format!("iv file '{}' has the wrong length", iv_path.display()))
            })?,
            None => {
                let mut iv = [0u8; IV_LEN];
                OsRng.fill_bytes(&mut iv);
                self.write_hex(&iv_path, &iv)?;
                debug!(path = %iv_path.display(), "generated archive iv");
                iv
            }
        };

        Ok((key, iv))
    }

    fn read_hex(&self, path: &Path) -> IngestResult<Option<Vec<u8>>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)
            .io_context(|| format!("cannot read '{}'", path.display()))?;
        let bytes = hex::decode(text.trim()).map_err(|e| {
            IngestError::Config(format!("'{}' is not hex-encoded: {e}", path.display()))
        })?;
        Ok(Some(bytes))
    }

    fn write_hex(&self, path: &Path, bytes: &[u8]) -> IngestResult<()> {
        fs::create_dir_all(&self.dir)
            .io_context(|| format!("cannot create '{}'", self.dir.display()))?;
        fs::write(path, hex::encode(bytes))
            .io_context(|| format!("cannot write '{}'", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .io_context(|| format!("cannot chmod '{}'", path.display()))?;
        }
        Ok(())
    }
}

/// Pure `Read → Read` AES-256-CTR transform. Bytes read through it come
/// out as ciphertext; an HMAC-SHA256 keyed with the archive key runs over
/// the ciphertext for diagnostic logging.
pub struct EncryptReader<R> {
    inner: R,
    cipher: Aes256Ctr,
    mac: HmacSha256,
}

impl<R: Read> EncryptReader<R> {
    pub fn new(inner: R, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> IngestResult<Self> {
        let cipher = Aes256Ctr::new(key.into(), iv.into());
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|_| IngestError::Config("invalid hmac key length".into()))?;
        Ok(Self { inner, cipher, mac })
    }

    /// Hex tail hash over all ciphertext produced so far.
    pub fn into_tail_hash(self) -> String {
        hex::encode(self.mac.finalize().into_bytes())
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.cipher.apply_keystream(&mut buf[..n]);
            self.mac.update(&buf[..n]);
        }
        Ok(n)
    }
}
