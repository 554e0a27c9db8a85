//! # Kanuka Store
//!
//! Filesystem persistence for Kanuka. Everything a project shares lives in
//! a plain, usually git-tracked directory:
//!
//! ```text
//! <project>/.kanuka/config.toml              project registry
//! <project>/.kanuka/public_keys/<uuid>.pub   one public key per device
//! <project>/.kanuka/secrets/<uuid>.kanuka    one access record per device
//! ```
//!
//! Private keys never enter the project. They live in the local
//! [`KeyPairStore`], namespaced by project UUID.
//!
//! ## Key Types
//!
//! - [`ProjectLayout`] - Paths inside a project
//! - [`KeyPairStore`] - Local key pairs, private key mode 0600
//! - [`AccessRecordStore`] / [`PublicKeyDirectory`] - Per-device files
//! - [`ProjectRegistry`] - The TOML registry with atomic saves
//! - [`UserSettings`] - Local identity and per-project device bindings
//!
//! ## Design Notes
//!
//! - **Atomic replace**: registry, records and keys are written to a
//!   temporary file in the same directory and renamed into place.
//! - **No locks**: concurrent writers are detected, not prevented. The
//!   registry refuses to save over a file that changed since it was loaded.

pub mod error;
pub mod fsutil;
pub mod keystore;
pub mod layout;
pub mod legacy;
pub mod records;
pub mod registry;
pub mod secret_files;
pub mod settings;

pub use error::{Result, StoreError};
pub use fsutil::Overwrite;
pub use keystore::KeyPairStore;
pub use layout::ProjectLayout;
pub use legacy::{detect_layout, is_legacy_layout, legacy_usernames, LayoutState};
pub use records::{AccessRecordStore, PublicKeyDirectory};
pub use registry::{DeviceEntry, PendingEntry, ProjectRegistry, ProjectSection};
pub use settings::{ProjectBinding, UserSection, UserSettings};
