//! Cryptographic primitives for Kanuka.
//!
//! Wraps RSA key pairs (wrapping the content key with OAEP) and the
//! 32-byte symmetric content key with strong types.

use std::fmt;

use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CoreError, Result};

/// RSA modulus size for every device key pair.
pub const RSA_KEY_BITS: usize = 2048;

/// Length of the project content key in bytes.
pub const CONTENT_KEY_LEN: usize = 32;

/// How the content key is wrapped into an access record.
///
/// Records carry no header, so the scheme is fixed per format version.
/// A new variant here means a new on-disk version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapScheme {
    /// RSA-OAEP with SHA-256 for both the hash and MGF1, empty label.
    #[default]
    RsaOaepSha256,
}

impl WrapScheme {
    fn padding(self) -> Oaep {
        match self {
            WrapScheme::RsaOaepSha256 => Oaep::new::<Sha256>(),
        }
    }

    /// Wrap `plaintext` for the holder of `recipient`'s private key.
    ///
    /// OAEP is randomized: wrapping the same key twice yields different bytes.
    pub fn wrap(self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        recipient
            .0
            .encrypt(&mut rng, self.padding(), plaintext)
            .map_err(|e| CoreError::Wrap(e.to_string()))
    }

    /// Unwrap a ciphertext produced by [`WrapScheme::wrap`].
    pub fn unwrap(self, ciphertext: &[u8], private_key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
        private_key
            .0
            .decrypt(self.padding(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CoreError::Unwrap)
    }
}

/// An RSA public key, encoded on disk as a PEM `PUBLIC KEY` (SPKI) block.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse a PEM `PUBLIC KEY` block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))?;
        Self::checked(key)
    }

    /// Encode as a PEM `PUBLIC KEY` block.
    pub fn to_pem(&self) -> Result<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CoreError::KeyEncoding(e.to_string()))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    /// Short, stable fingerprint: BLAKE3 over the DER encoding, first 8 bytes as hex.
    pub fn fingerprint(&self) -> Result<String> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CoreError::KeyEncoding(e.to_string()))?;
        let digest = blake3::hash(der.as_bytes());
        Ok(hex::encode(&digest.as_bytes()[..8]))
    }

    fn checked(key: RsaPublicKey) -> Result<Self> {
        let bits = key.size() * 8;
        if bits < RSA_KEY_BITS {
            return Err(CoreError::UnsupportedKeySize(bits));
        }
        Ok(Self(key))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fingerprint() {
            Ok(fp) => write!(f, "PublicKey({})", fp),
            Err(_) => write!(f, "PublicKey(<unencodable>)"),
        }
    }
}

/// An RSA private key, encoded on disk as a PEM `RSA PRIVATE KEY` (PKCS#1) block.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Parse a PEM `RSA PRIVATE KEY` block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem.trim())
            .map_err(|e| CoreError::InvalidPrivateKey(e.to_string()))?;
        let bits = key.size() * 8;
        if bits < RSA_KEY_BITS {
            return Err(CoreError::UnsupportedKeySize(bits));
        }
        Ok(Self(key))
    }

    /// Encode as a PEM `RSA PRIVATE KEY` block. The buffer is wiped on drop.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.0
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CoreError::KeyEncoding(e.to_string()))
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(RsaPublicKey::from(&self.0))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(<redacted>)")
    }
}

/// A device key pair.
///
/// Created once per project per device and replaced wholesale on rotation,
/// never mutated in place.
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new 2048-bit key pair.
    pub fn generate() -> Result<Self> {
        Self::generate_with_bits(RSA_KEY_BITS)
    }

    /// Generate a key pair of the given size. Sizes below 2048 are refused
    /// rather than silently accepted.
    pub fn generate_with_bits(bits: usize) -> Result<Self> {
        if bits < RSA_KEY_BITS {
            return Err(CoreError::UnsupportedKeySize(bits));
        }
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CoreError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_private(PrivateKey(key)))
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public)
    }
}

/// The project's 256-bit symmetric content key.
///
/// Owned by the project, not by any user. Its value is identical in every
/// current access record until a full rotation replaces it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONTENT_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; CONTENT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; CONTENT_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey(<redacted>)")
    }
}
