//! Access records: the content key wrapped for one device.
//!
//! When a device is granted access, an authorized member unwraps their own
//! record to recover the content key and wraps it again under the new
//! device's public key. The record file holds nothing but the raw RSA-OAEP
//! ciphertext.

use crate::crypto::{ContentKey, PrivateKey, PublicKey, WrapScheme};
use crate::error::{CoreError, Result};

/// A device's wrapped copy of the project content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    ciphertext: Vec<u8>,
}

impl AccessRecord {
    /// Wrap the content key for a recipient device.
    pub fn seal(content_key: &ContentKey, recipient: &PublicKey) -> Result<Self> {
        let ciphertext = WrapScheme::default().wrap(content_key.as_bytes(), recipient)?;
        Ok(Self { ciphertext })
    }

    /// Recover the content key with the owning device's private key.
    pub fn open(&self, private_key: &PrivateKey) -> Result<ContentKey> {
        let key_bytes = WrapScheme::default().unwrap(&self.ciphertext, private_key)?;
        ContentKey::from_slice(&key_bytes)
    }

    /// Take raw record bytes as read from disk.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(CoreError::EmptyRecord);
        }
        Ok(Self { ciphertext: bytes })
    }

    /// Check that the ciphertext is as long as the recipient's modulus.
    ///
    /// A truncated or foreign file fails here without a private key.
    pub fn check_size(&self, recipient: &PublicKey) -> Result<()> {
        let expected = recipient.bits() / 8;
        if self.ciphertext.len() != expected {
            return Err(CoreError::RecordSize {
                expected,
                actual: self.ciphertext.len(),
            });
        }
        Ok(())
    }

    /// Get the raw bytes to write to disk.
    pub fn as_bytes(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}
