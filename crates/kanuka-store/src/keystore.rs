//! Local key pair storage.
//!
//! Each project gets its own directory under the key root:
//!
//! ```text
//! <keys>/<project uuid>/privkey      PEM PKCS#1, mode 0600
//! <keys>/<project uuid>/pubkey.pub   PEM SPKI,   mode 0644
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use kanuka_core::{KeyPair, PrivateKey, ProjectId, PublicKey};

use crate::error::{Result, StoreError};
use crate::fsutil::{self, Overwrite, PRIVATE_MODE, SHARED_MODE};

const PRIVATE_KEY_FILE: &str = "privkey";
const PUBLIC_KEY_FILE: &str = "pubkey.pub";

/// Generates, persists and loads this machine's key pairs.
#[derive(Debug, Clone)]
pub struct KeyPairStore {
    root: PathBuf,
}

impl KeyPairStore {
    /// Create a store rooted at `root` (usually `<data dir>/keys`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join(project.to_string())
    }

    pub fn private_key_path(&self, project: &ProjectId) -> PathBuf {
        self.project_dir(project).join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self, project: &ProjectId) -> PathBuf {
        self.project_dir(project).join(PUBLIC_KEY_FILE)
    }

    /// Generate a fresh 2048-bit key pair for `project`.
    ///
    /// Nothing is written; call [`KeyPairStore::persist`] to keep it.
    pub fn generate(&self, project: &ProjectId) -> Result<KeyPair> {
        let keypair = KeyPair::generate()?;
        tracing::debug!(%project, "generated key pair");
        Ok(keypair)
    }

    /// Whether a private key is stored for `project`.
    pub fn exists(&self, project: &ProjectId) -> bool {
        self.private_key_path(project).exists()
    }

    /// Persist a key pair. The private key is written first.
    ///
    /// If the public key write fails the private key is already in place
    /// and usable; the error is still returned so the caller can retry.
    pub fn persist(&self, project: &ProjectId, keypair: &KeyPair, overwrite: Overwrite) -> Result<()> {
        let private_path = self.private_key_path(project);
        if overwrite == Overwrite::Deny && private_path.exists() {
            return Err(StoreError::AlreadyExists {
                what: "private key",
                path: private_path,
            });
        }

        let private_pem = keypair.private_key().to_pem()?;
        fsutil::write_atomic(&private_path, private_pem.as_bytes(), PRIVATE_MODE)?;

        let public_pem = keypair.public_key().to_pem()?;
        fsutil::write_atomic(&self.public_key_path(project), public_pem.as_bytes(), SHARED_MODE)?;

        tracing::info!(%project, dir = %self.project_dir(project).display(), "persisted key pair");
        Ok(())
    }

    /// Load the key pair for `project`.
    ///
    /// The public half is derived from the private key; a stale or missing
    /// `pubkey.pub` does not affect the result.
    pub fn load(&self, project: &ProjectId) -> Result<KeyPair> {
        let path = self.private_key_path(project);
        let pem = match fs::read_to_string(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    what: "private key",
                    path,
                })
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let private = PrivateKey::from_pem(&pem).map_err(|e| StoreError::corrupt(&path, e.to_string()))?;
        Ok(KeyPair::from_private(private))
    }

    /// Load only the public half as written to `pubkey.pub`.
    pub fn load_public(&self, project: &ProjectId) -> Result<PublicKey> {
        let path = self.public_key_path(project);
        let pem = match fs::read_to_string(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    what: "public key",
                    path,
                })
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        PublicKey::from_pem(&pem).map_err(|e| StoreError::corrupt(&path, e.to_string()))
    }
}
