use crate::errors::CustodyError;
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hkdf::Hkdf;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::PathBuf,
    sync::Arc,
};
use zeroize::Zeroizing;

const BOX_VERSION: u8 = 1;
const SHARE_KEY_INFO: &[u8] = b"keysplit:share:v1";
const DELIMITER: char = ':';

/// Serialized form of a sealed share. These JSON bytes are what the stores hold and what the
/// integrity hash covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoBox {
    pub v: u8,
    pub nonce_b64: String,
    pub ct_b64: String,
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

/// Per-provisioning binding nonce, hex encoded.
pub fn generate_nonce(num_bytes: usize) -> String {
    let mut buf = Zeroizing::new(vec![0_u8; num_bytes]);
    fill_random(&mut buf);
    hex::encode(buf.as_slice())
}

/// Source of the root encryption key.
pub trait KeyProvider: Send + Sync {
    fn root_key(&self) -> Result<Zeroizing<[u8; 32]>, CustodyError>;
}

fn key_from_hex(s: &str) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
    let bytes = Zeroizing::new(
        hex::decode(s.trim())
            .map_err(|e| CustodyError::DecryptionError(format!("root key hex: {e}")))?,
    );
    key_from_slice(&bytes)
}

fn key_from_slice(bytes: &[u8]) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
    if bytes.len() != 32 {
        return Err(CustodyError::DecryptionError(
            "root key must be 32 bytes".to_owned(),
        ));
    }
    let mut out = Zeroizing::new([0_u8; 32]);
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Reads a hex root key from an environment variable on every resolve.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn root_key(&self) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
        let v = Zeroizing::new(std::env::var(&self.var).map_err(|e| {
            CustodyError::DecryptionError(format!("root key {}: {e}", self.var))
        })?);
        key_from_hex(&v)
    }
}

/// 32-byte key file kept next to the config, created on first use.
#[derive(Debug, Clone)]
pub struct MachineKeyProvider {
    path: PathBuf,
}

impl MachineKeyProvider {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Create the key file if it does not exist yet.
    pub fn ensure(&self) -> eyre::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }

        let mut secret = Zeroizing::new([0_u8; 32]);
        fill_random(secret.as_mut_slice());

        let mut oo = OpenOptions::new();
        oo.create_new(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
        }
        match oo.open(&self.path) {
            Ok(mut f) => {
                f.write_all(secret.as_slice())
                    .map_err(|e| eyre::eyre!("write root key: {e}"))?;
                f.sync_all().map_err(|e| eyre::eyre!("fsync root key: {e}"))?;
                Ok(())
            }
            // Another process created it first; use theirs.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(eyre::Report::new(e).wrap_err("create root key")),
        }
    }
}

impl KeyProvider for MachineKeyProvider {
    fn root_key(&self) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
        let buf = Zeroizing::new(
            fs::read(&self.path)
                .map_err(|e| CustodyError::DecryptionError(format!("read root key: {e}")))?,
        );
        key_from_slice(&buf)
    }
}

/// A share after decryption, split back into its binding nonce and value.
pub struct OpenedShare {
    pub nonce: String,
    pub share: Zeroizing<String>,
}

/// Seals `nonce:share` plaintexts under a key derived from the injected root key.
#[derive(Clone)]
pub struct ShareCipher {
    keys: Arc<dyn KeyProvider>,
}

impl std::fmt::Debug for ShareCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareCipher").finish_non_exhaustive()
    }
}

impl ShareCipher {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    fn share_key(&self) -> Result<Zeroizing<[u8; 32]>, CustodyError> {
        let root = self.keys.root_key()?;
        let hk = Hkdf::<Sha256>::new(None, root.as_slice());
        let mut out = Zeroizing::new([0_u8; 32]);
        hk.expand(SHARE_KEY_INFO, out.as_mut_slice())
            .map_err(|e| CustodyError::DecryptionError(format!("hkdf expand: {e}")))?;
        Ok(out)
    }

    pub fn seal(&self, nonce: &str, share: &str) -> Result<Vec<u8>, CustodyError> {
        if nonce.is_empty() || nonce.contains(DELIMITER) {
            return Err(CustodyError::invalid("nonce must be non-empty and delimiter-free"));
        }
        let key = self.share_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CustodyError::DecryptionError(format!("aes init: {e}")))?;

        let plaintext = Zeroizing::new(format!("{nonce}{DELIMITER}{share}"));
        let mut iv = [0_u8; 12];
        fill_random(&mut iv);
        let ct = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| CustodyError::DecryptionError(format!("aes encrypt: {e}")))?;

        let sealed = CryptoBox {
            v: BOX_VERSION,
            nonce_b64: base64::engine::general_purpose::STANDARD.encode(iv),
            ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
        };
        serde_json::to_vec(&sealed)
            .map_err(|e| CustodyError::DecryptionError(format!("serialize box: {e}")))
    }

    pub fn open(&self, ciphertext: &[u8]) -> Result<OpenedShare, CustodyError> {
        let sealed: CryptoBox = serde_json::from_slice(ciphertext)
            .map_err(|e| CustodyError::DecryptionError(format!("parse box: {e}")))?;
        if sealed.v != BOX_VERSION {
            return Err(CustodyError::DecryptionError(format!(
                "unsupported box version: {}",
                sealed.v
            )));
        }
        let iv = base64::engine::general_purpose::STANDARD
            .decode(&sealed.nonce_b64)
            .map_err(|e| CustodyError::DecryptionError(format!("decode iv: {e}")))?;
        if iv.len() != 12 {
            return Err(CustodyError::DecryptionError("invalid iv length".to_owned()));
        }
        let ct = base64::engine::general_purpose::STANDARD
            .decode(&sealed.ct_b64)
            .map_err(|e| CustodyError::DecryptionError(format!("decode ciphertext: {e}")))?;

        let key = self.share_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| CustodyError::DecryptionError(format!("aes init: {e}")))?;
        let pt = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&iv), ct.as_ref())
                .map_err(|e| CustodyError::DecryptionError(format!("aes decrypt: {e}")))?,
        );
        let text = std::str::from_utf8(&pt)
            .map_err(|e| CustodyError::DecryptionError(format!("plaintext utf-8: {e}")))?;
        let (nonce, share) = text
            .split_once(DELIMITER)
            .ok_or_else(|| CustodyError::DecryptionError("missing nonce delimiter".to_owned()))?;
        Ok(OpenedShare {
            nonce: nonce.to_owned(),
            share: Zeroizing::new(share.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StaticKeyProvider;
    use eyre::Context as _;

    fn cipher_with(key: u8) -> ShareCipher {
        ShareCipher::new(Arc::new(StaticKeyProvider::new([key; 32])))
    }

    #[test]
    fn seal_open_roundtrip_keeps_nonce_and_share() -> eyre::Result<()> {
        let c = cipher_with(7);
        let sealed = c.seal("deadbeef", "a1b2:c3")?;
        let opened = c.open(&sealed)?;
        assert_eq!(opened.nonce, "deadbeef");
        // Only the first delimiter separates the nonce.
        assert_eq!(opened.share.as_str(), "a1b2:c3");
        Ok(())
    }

    #[test]
    fn same_input_seals_to_different_bytes() -> eyre::Result<()> {
        let c = cipher_with(7);
        assert_ne!(c.seal("n", "s")?, c.seal("n", "s")?);
        Ok(())
    }

    #[test]
    fn wrong_root_key_fails_to_open() -> eyre::Result<()> {
        let sealed = cipher_with(7).seal("n", "s")?;
        let err = cipher_with(8).open(&sealed).err();
        assert!(matches!(err, Some(CustodyError::DecryptionError(m)) if m.contains("aes decrypt")));
        Ok(())
    }

    #[test]
    fn malformed_ciphertext_is_a_decryption_error() {
        let c = cipher_with(7);
        assert!(matches!(
            c.open(b"not json"),
            Err(CustodyError::DecryptionError(_))
        ));
        assert!(matches!(
            c.open(br#"{"v":2,"nonce_b64":"","ct_b64":""}"#),
            Err(CustodyError::DecryptionError(_))
        ));
    }

    #[test]
    fn nonce_with_delimiter_is_rejected() {
        assert!(matches!(
            cipher_with(1).seal("a:b", "s"),
            Err(CustodyError::InvalidInput(_))
        ));
    }

    #[test]
    fn generated_nonce_is_fixed_length_hex() {
        let n = generate_nonce(32);
        assert_eq!(n.len(), 64);
        assert!(n.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(n, generate_nonce(32));
    }

    #[test]
    fn machine_key_is_created_once_and_reused() -> eyre::Result<()> {
        let td = tempfile::tempdir().context("create tempdir")?;
        let provider = MachineKeyProvider::new(td.path().join("cfg").join("root_key.bin"));
        provider.ensure()?;
        let k1 = provider.root_key()?;
        provider.ensure()?;
        let k2 = provider.root_key()?;
        assert_eq!(k1.as_slice(), k2.as_slice());
        Ok(())
    }

    #[test]
    fn unreadable_or_short_root_key_is_a_decryption_error() -> eyre::Result<()> {
        let td = tempfile::tempdir().context("create tempdir")?;
        let missing = MachineKeyProvider::new(td.path().join("absent.bin"));
        assert!(matches!(
            missing.root_key(),
            Err(CustodyError::DecryptionError(_))
        ));

        let short = td.path().join("short.bin");
        fs::write(&short, [1_u8; 8]).context("write short key")?;
        assert!(matches!(
            MachineKeyProvider::new(short).root_key(),
            Err(CustodyError::DecryptionError(_))
        ));
        Ok(())
    }

    #[test]
    fn hex_keys_must_be_32_bytes() {
        assert!(key_from_hex(&"ab".repeat(32)).is_ok());
        assert!(key_from_hex("abcd").is_err());
        assert!(key_from_hex("zz").is_err());
    }
}
