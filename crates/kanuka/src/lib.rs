//! # Kanuka
//!
//! Share a project's secret files between the devices of its members.
//!
//! ## Overview
//!
//! Every project has one random content key. Secret files (`.env`,
//! `.env.*`) are encrypted with it and committed as `.env.kanuka`. The
//! content key itself is never stored in the clear: each authorized device
//! gets an access record holding the key wrapped with RSA-OAEP under that
//! device's public key.
//!
//! ```text
//! <project>/.kanuka/config.toml              registry of devices
//! <project>/.kanuka/public_keys/<uuid>.pub   one per device
//! <project>/.kanuka/secrets/<uuid>.kanuka    one access record per device
//! <project>/.env.kanuka                      encrypted secrets
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kanuka::access::{grant, GrantOptions, GrantTarget, Target};
//! use kanuka::Config;
//!
//! # fn main() -> kanuka::Result<()> {
//! let config = Config::from_env(None)?;
//! let ctx = config.context(Some("alice@example.com"))?;
//! let target = GrantTarget::Known(Target::parse("bob@example.com", None));
//! let report = grant(&ctx, &target, GrantOptions::default())?;
//! println!("granted {}", report.device);
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `kanuka::core` - Identifiers, key pairs, key wrapping, the file envelope
//! - `kanuka::store` - Project layout, registry, key store, user settings
//! - `kanuka::access` - Grant, revoke, rotate, verify and repair

pub mod archive;
pub mod config;
pub mod error;
pub mod secrets;
pub mod status;

// Re-export component crates
pub use kanuka_access as access;
pub use kanuka_core as core;
pub use kanuka_store as store;

pub use archive::{export, import, ExportReport, ImportReport};
pub use config::Config;
pub use error::{KanukaError, Result};
pub use secrets::{decrypt, encrypt, SecretFile, SecretsReport};
pub use status::{status, DeviceState, FileState, StatusReport};

// Re-export commonly used types
pub use kanuka_access::{AccessError, ChangePlan, Context, Target};
pub use kanuka_core::{ContentKey, DeviceId, KeyPair, ProjectId, PublicKey, UserId};
