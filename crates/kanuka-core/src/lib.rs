//! # Kanuka Core
//!
//! Pure primitives for Kanuka: identifiers, RSA key pairs, the project
//! content key, and the access records that wrap it per device.
//!
//! This crate contains no I/O. Persistence lives in `kanuka-store` and the
//! grant/revoke/rotate engine in `kanuka-access`.
//!
//! ## Key Types
//!
//! - [`DeviceId`], [`UserId`], [`ProjectId`] - UUID newtypes, never emails
//! - [`KeyPair`] - A device's 2048-bit RSA key pair
//! - [`ContentKey`] - The 32-byte symmetric key shared project-wide
//! - [`AccessRecord`] - A ContentKey wrapped with RSA-OAEP for one device
//! - [`EncryptedPayload`] - The envelope used for encrypted secret files
//!
//! ## Encryption Model
//!
//! 1. **Content Key**: one symmetric key per project encrypts every secret file
//! 2. **Access Records**: the content key is wrapped under each device's public key
//!
//! Adding a device means wrapping the same content key once more. Removing
//! one deletes its record; the content key itself only changes on a full
//! rotation.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod record;

pub use crypto::{
    ContentKey, KeyPair, PrivateKey, PublicKey, WrapScheme, CONTENT_KEY_LEN, RSA_KEY_BITS,
};
pub use envelope::{EncryptedPayload, EncryptionFormat};
pub use error::{CoreError, Result};
pub use ids::{DeviceId, ProjectId, UserId};
pub use record::AccessRecord;
