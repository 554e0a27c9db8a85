//! Encrypting and decrypting secret files with the content key.
//!
//! `.env` is encrypted to `.env.kanuka` next to it, and decrypted back.
//! Without explicit paths every secret file in the project is processed.

use std::fs;
use std::path::{Path, PathBuf};

use kanuka_access::Context;
use kanuka_core::EncryptedPayload;
use kanuka_store::fsutil::{self, PRIVATE_MODE};
use kanuka_store::{secret_files, StoreError};
use serde::Serialize;

use crate::error::{KanukaError, Result};

/// One processed file pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretFile {
    pub plaintext: PathBuf,
    pub encrypted: PathBuf,
}

/// Outcome of [`encrypt`] or [`decrypt`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecretsReport {
    pub files: Vec<SecretFile>,
}

/// Encrypt plaintext secret files.
pub fn encrypt(ctx: &Context, paths: &[PathBuf]) -> Result<SecretsReport> {
    let registry = ctx.load_registry()?;
    let unlocked = ctx.unlock(&registry)?;

    let targets = if paths.is_empty() {
        secret_files::discover_plaintext(ctx.layout().root())?
    } else {
        paths
            .iter()
            .map(|p| plaintext_target(p))
            .collect::<Result<Vec<_>>>()?
    };

    let mut report = SecretsReport::default();
    for plaintext in targets {
        let bytes = fs::read(&plaintext).map_err(|e| StoreError::io(&plaintext, e))?;
        let payload = EncryptedPayload::encrypt(&bytes, &unlocked.content_key)?;
        let encrypted = secret_files::encrypted_path(&plaintext);
        secret_files::write_encrypted(&encrypted, &payload)?;
        tracing::debug!(path = %plaintext.display(), "encrypted secret file");
        report.files.push(SecretFile {
            plaintext,
            encrypted,
        });
    }

    tracing::info!(files = report.files.len(), "encrypted secret files");
    Ok(report)
}

/// Decrypt encrypted secret files. Plaintext is written owner-only.
pub fn decrypt(ctx: &Context, paths: &[PathBuf]) -> Result<SecretsReport> {
    let registry = ctx.load_registry()?;
    let unlocked = ctx.unlock(&registry)?;

    let targets = if paths.is_empty() {
        secret_files::discover_encrypted(ctx.layout().root())?
    } else {
        paths
            .iter()
            .map(|p| encrypted_target(p))
            .collect::<Result<Vec<_>>>()?
    };

    let mut report = SecretsReport::default();
    for encrypted in targets {
        let payload = secret_files::read_encrypted(&encrypted)?;
        let bytes = payload
            .decrypt(&unlocked.content_key)
            .map_err(|e| KanukaError::Decrypt {
                path: encrypted.clone(),
                reason: e.to_string(),
            })?;
        let plaintext = secret_files::plaintext_path(&encrypted)
            .ok_or_else(|| not_a_secret_file(&encrypted))?;
        fsutil::write_atomic(&plaintext, &bytes, PRIVATE_MODE)?;
        tracing::debug!(path = %plaintext.display(), "decrypted secret file");
        report.files.push(SecretFile {
            plaintext,
            encrypted,
        });
    }

    tracing::info!(files = report.files.len(), "decrypted secret files");
    Ok(report)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn plaintext_target(path: &Path) -> Result<PathBuf> {
    if secret_files::is_secret_file_name(file_name(path)) {
        Ok(path.to_path_buf())
    } else {
        Err(not_a_secret_file(path))
    }
}

/// Accepts either form: `.env.kanuka` or `.env`.
fn encrypted_target(path: &Path) -> Result<PathBuf> {
    let name = file_name(path);
    if secret_files::is_encrypted_file_name(name) {
        Ok(path.to_path_buf())
    } else if secret_files::is_secret_file_name(name) {
        Ok(secret_files::encrypted_path(path))
    } else {
        Err(not_a_secret_file(path))
    }
}

fn not_a_secret_file(path: &Path) -> KanukaError {
    KanukaError::Access(kanuka_access::AccessError::InvalidOperation(format!(
        "{} is not a .env secret file",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_names() {
        assert_eq!(
            encrypted_target(Path::new("app/.env")).unwrap(),
            PathBuf::from("app/.env.kanuka")
        );
        assert_eq!(
            encrypted_target(Path::new(".env.prod.kanuka")).unwrap(),
            PathBuf::from(".env.prod.kanuka")
        );
        assert!(plaintext_target(Path::new(".env.kanuka")).is_err());
        assert!(plaintext_target(Path::new("Cargo.toml")).is_err());
        assert!(encrypted_target(Path::new("notes.txt")).is_err());
    }
}
