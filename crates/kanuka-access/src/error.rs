//! Error taxonomy for access operations.
//!
//! Every variant is recoverable at the command line: it is printed with
//! [`AccessError::hint`] and the process exits non-zero.

use std::path::PathBuf;

use kanuka_core::CoreError;
use kanuka_store::StoreError;
use thiserror::Error;

/// Errors that can occur during access operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// No registry in the project.
    #[error("no Kanuka project at {0}")]
    NotInitialized(PathBuf),

    /// Pre-registry layout that has not been migrated.
    #[error("project at {0} uses the legacy per-username layout")]
    LegacyLayout(PathBuf),

    /// The caller holds no valid access record.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No device matches the given identity.
    #[error("no device matches {0}")]
    UserNotFound(String),

    /// The identity matches more than one device.
    #[error("{target} matches {} devices: {}", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },

    /// Refused to replace existing state.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// `init` in a directory that already holds a project.
    #[error("a Kanuka project already exists at {0}")]
    ProjectExists(PathBuf),

    /// Registry or record present but invalid.
    #[error("corrupt {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The OS rejected a write.
    #[error("permission denied: {0}")]
    Permission(PathBuf),

    /// Key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Registry and files on disk disagree.
    #[error("project is inconsistent: {0}")]
    Consistency(String),

    /// The caller's state is broken and needs manual recovery.
    #[error("repair needed: {0}")]
    RepairNeeded(String),

    /// A content key rotation stopped after some access records were
    /// replaced. Staged ciphertexts are kept for the next run.
    #[error("content key rotation incomplete: {0}")]
    RotationIncomplete(String),

    /// The registry changed on disk during the operation.
    #[error("{0} changed while this command was running")]
    Conflict(PathBuf),

    /// The request makes no sense in the current state.
    #[error("{0}")]
    InvalidOperation(String),

    /// Cryptographic failure that is not a key mismatch.
    #[error("crypto error: {0}")]
    Crypto(CoreError),

    /// Other store failure (I/O, missing file).
    #[error(transparent)]
    Store(StoreError),
}

impl AccessError {
    /// Next step to suggest to the user.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            AccessError::NotInitialized(_) => Some("run `kanuka init` to create a project here"),
            AccessError::LegacyLayout(_) => {
                Some("migrate the project to the device-based layout before using this version")
            }
            AccessError::AccessDenied(_) => Some(
                "run `kanuka create` and ask an authorized member to run `kanuka grant` for you",
            ),
            AccessError::UserNotFound(_) => Some("run `kanuka status` to list devices"),
            AccessError::Ambiguous { .. } => Some("pass --device or use the device UUID"),
            AccessError::AlreadyExists(_) => Some("re-run with --force to replace it"),
            AccessError::ProjectExists(_) => {
                Some("run `kanuka create` to join it or `kanuka status` to inspect it")
            }
            AccessError::Corrupt { .. } => {
                Some("restore the file from version control or run `kanuka verify`")
            }
            AccessError::Permission(_) => Some("check file ownership and permissions"),
            AccessError::KeyGeneration(_) => Some("check the system entropy source and retry"),
            AccessError::Consistency(_) => Some("run `kanuka repair`"),
            AccessError::RepairNeeded(_) => Some(
                "ask an authorized member to revoke this device, then run `kanuka create --force`",
            ),
            AccessError::RotationIncomplete(_) => {
                Some("re-run `kanuka rotate --content-key` to finish the rotation")
            }
            AccessError::Conflict(_) => Some("pull the latest changes and retry"),
            AccessError::InvalidOperation(_) | AccessError::Crypto(_) | AccessError::Store(_) => {
                None
            }
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotInitialized(path) => AccessError::NotInitialized(path),
            StoreError::LegacyLayout(path) => AccessError::LegacyLayout(path),
            StoreError::Corrupt { path, reason } => AccessError::Corrupt { path, reason },
            StoreError::AlreadyExists { what, path } => {
                AccessError::AlreadyExists(format!("{} at {}", what, path.display()))
            }
            StoreError::PermissionDenied { path, .. } => AccessError::Permission(path),
            StoreError::Conflict(path) => AccessError::Conflict(path),
            StoreError::Key(err) => err.into(),
            other => AccessError::Store(other),
        }
    }
}

impl From<CoreError> for AccessError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::KeyGeneration(msg) => AccessError::KeyGeneration(msg),
            other => AccessError::Crypto(other),
        }
    }
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let err: AccessError = StoreError::NotInitialized("/p".into()).into();
        assert!(matches!(err, AccessError::NotInitialized(_)));

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let err: AccessError = StoreError::io("/p/.kanuka/config.toml", io_err).into();
        assert!(matches!(err, AccessError::Permission(_)));

        let err: AccessError = StoreError::Key(CoreError::KeyGeneration("rng".into())).into();
        assert!(matches!(err, AccessError::KeyGeneration(_)));
    }

    #[test]
    fn test_every_taxonomy_error_has_hint() {
        let errors = [
            AccessError::NotInitialized("/p".into()),
            AccessError::AccessDenied("x".into()),
            AccessError::UserNotFound("x".into()),
            AccessError::AlreadyExists("x".into()),
            AccessError::Permission("/p".into()),
            AccessError::KeyGeneration("x".into()),
            AccessError::Consistency("x".into()),
            AccessError::RepairNeeded("x".into()),
            AccessError::ProjectExists("/p".into()),
            AccessError::RotationIncomplete("x".into()),
        ];
        for err in errors {
            assert!(err.hint().is_some(), "{err} has no hint");
        }
    }

    #[test]
    fn test_init_on_existing_project_does_not_suggest_force() {
        let hint = AccessError::ProjectExists("/p".into()).hint().unwrap();
        assert!(!hint.contains("--force"));
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = AccessError::Ambiguous {
            target: "alice@example.com".into(),
            candidates: vec!["laptop".into(), "desktop".into()],
        };
        assert_eq!(
            err.to_string(),
            "alice@example.com matches 2 devices: laptop, desktop"
        );
    }
}
