// Certificate signing key
//
// One ECDSA P-256 key pair per key directory, stored as PKCS#8. The first
// process to need it creates it; everyone after that only reads it.

use crate::{EraseError, EraseResult};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING,
};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

pub const PRIVATE_KEY_FILE: &str = "signing-key.p8";
pub const PUBLIC_KEY_FILE: &str = "signing-key.pub";

/// Largest PKCS#8 document accepted from disk
const MAX_KEY_BYTES: u64 = 4096;

pub struct Signer {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
    key_dir: PathBuf,
}

impl Signer {
    /// Load the key pair in `key_dir`, creating it if this is the first use.
    pub fn load_or_create(key_dir: &Path) -> EraseResult<Self> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(key_dir)
            .map_err(|e| EraseError::persistence(key_dir, e))?;

        let rng = SystemRandom::new();
        let key_path = key_dir.join(PRIVATE_KEY_FILE);

        let pkcs8 = match read_private_key(&key_path) {
            Ok(bytes) => {
                tracing::debug!(key_path = %key_path.display(), "Loaded signing key");
                bytes
            }
            Err(e) if e.kind() == ErrorKind::NotFound => create_private_key(&key_path, &rng)?,
            Err(e) => return Err(EraseError::persistence(&key_path, e)),
        };

        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &pkcs8, &rng)
            .map_err(|e| {
                EraseError::SigningFailed(format!("invalid key {}: {}", key_path.display(), e))
            })?;

        let signer = Self {
            key_pair,
            rng,
            key_dir: key_dir.to_path_buf(),
        };
        signer.export_public_key()?;
        Ok(signer)
    }

    /// Detached ASN.1 DER signature over SHA-256 of `message`
    pub fn sign(&self, message: &[u8]) -> EraseResult<Vec<u8>> {
        self.key_pair
            .sign(&self.rng, message)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|_| EraseError::SigningFailed("ECDSA signing failed".to_string()))
    }

    /// Uncompressed SEC1 public point
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.public_key().to_vec())
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.key_dir.join(PUBLIC_KEY_FILE)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.public_key())
    }

    fn export_public_key(&self) -> EraseResult<()> {
        let path = self.public_key_path();
        if let Ok(existing) = fs::read(&path) {
            if existing == self.public_key() {
                return Ok(());
            }
            tracing::warn!(path = %path.display(), "Public key file did not match the signing key, rewriting");
        }

        let tmp = temp_sibling(&path);
        let written = fs::write(&tmp, self.public_key())
            .and_then(|_| fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644)))
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(EraseError::persistence(&path, e));
        }
        Ok(())
    }
}

/// Checks detached signatures against one public key.
#[derive(Debug, Clone)]
pub struct Verifier {
    public_key: Vec<u8>,
}

impl Verifier {
    pub fn new(public_key: Vec<u8>) -> Self {
        Self { public_key }
    }

    pub fn from_file(path: &Path) -> EraseResult<Self> {
        let bytes = fs::read(path).map_err(|e| EraseError::persistence(path, e))?;
        Ok(Self::new(bytes))
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &self.public_key)
            .verify(message, signature)
            .is_ok()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key)
    }
}

/// SHA-256 of the public key, hex encoded
pub fn fingerprint(public_key: &[u8]) -> String {
    format!("{:x}", Sha256::digest(public_key))
}

fn read_private_key(path: &Path) -> std::io::Result<Vec<u8>> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_file() {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "signing key is not a regular file",
        ));
    }
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(std::io::Error::new(
            ErrorKind::PermissionDenied,
            format!("signing key has insecure permissions {:o}; expected 0600", mode),
        ));
    }
    if metadata.len() > MAX_KEY_BYTES {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "signing key file is too large",
        ));
    }
    fs::read(path)
}

/// Generate a key and publish it with `hard_link`, which fails atomically if
/// another process already published one. The loser adopts the winner's key.
fn create_private_key(key_path: &Path, rng: &SystemRandom) -> EraseResult<Vec<u8>> {
    let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, rng)
        .map_err(|_| EraseError::SigningFailed("key generation failed".to_string()))?;

    let tmp = temp_sibling(key_path);
    let staged = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(document.as_ref())?;
            file.sync_all()
        });
    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(EraseError::persistence(&tmp, e));
    }

    let published = fs::hard_link(&tmp, key_path);
    let _ = fs::remove_file(&tmp);

    match published {
        Ok(()) => {
            tracing::info!(key_path = %key_path.display(), "Generated new signing key");
            Ok(document.as_ref().to_vec())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::debug!(key_path = %key_path.display(), "Signing key created concurrently, adopting it");
            read_private_key(key_path).map_err(|e| EraseError::persistence(key_path, e))
        }
        Err(e) => Err(EraseError::persistence(key_path, e)),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}
