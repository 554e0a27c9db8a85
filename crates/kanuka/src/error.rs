//! Error types for the command-line facade.

use std::path::PathBuf;

use kanuka_access::AccessError;
use kanuka_core::CoreError;
use kanuka_store::StoreError;
use thiserror::Error;

/// Errors that can occur in facade operations.
#[derive(Debug, Error)]
pub enum KanukaError {
    /// Grant, revoke, rotate or verify failed.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// An archive could not be read, written or accepted.
    #[error("archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// A secret file could not be decrypted with the content key.
    #[error("cannot decrypt {path}: {reason}")]
    Decrypt { path: PathBuf, reason: String },

    /// Missing or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The user declined a confirmation prompt.
    #[error("aborted")]
    Aborted,
}

impl KanukaError {
    pub fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        KanukaError::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Next step to suggest to the user.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            KanukaError::Access(err) => err.hint(),
            KanukaError::Archive { .. } => Some("check that the file was produced by `kanuka export`"),
            KanukaError::Decrypt { .. } => {
                Some("the file may have been encrypted before a content key rotation; re-encrypt it from plaintext")
            }
            KanukaError::Config(_) => {
                Some("set KANUKA_CONFIG_DIR and KANUKA_DATA_DIR, or pass --email on first use")
            }
            KanukaError::Aborted => None,
        }
    }
}

impl From<StoreError> for KanukaError {
    fn from(err: StoreError) -> Self {
        KanukaError::Access(err.into())
    }
}

impl From<CoreError> for KanukaError {
    fn from(err: CoreError) -> Self {
        KanukaError::Access(err.into())
    }
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, KanukaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_access_taxonomy() {
        let err: KanukaError = StoreError::NotInitialized("/p".into()).into();
        assert!(matches!(
            err,
            KanukaError::Access(AccessError::NotInitialized(_))
        ));
        assert_eq!(err.hint(), Some("run `kanuka init` to create a project here"));
    }

    #[test]
    fn test_access_message_is_transparent() {
        let err = KanukaError::from(AccessError::UserNotFound("bob@example.com".into()));
        assert_eq!(err.to_string(), "no device matches bob@example.com");
    }
}
