//! # Kanuka Testkit
//!
//! Testing utilities for Kanuka.
//!
//! ## Overview
//!
//! - **Fixtures**: a temporary project shared by simulated members, each
//!   with their own config and data directories
//! - **Key pool**: a few RSA key pairs generated once per test binary, so
//!   large projects can be built without generating a key per device
//! - **Generators**: proptest strategies for identities and secret contents
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use kanuka_testkit::TestProject;
//!
//! let project = TestProject::new();
//! let alice = project.init("alice@example.com", "laptop", "payments");
//! let bob = project.join(&alice, "bob@example.com", "workstation");
//! assert_eq!(alice.content_key(), bob.content_key());
//! ```
//!
//! Fixture helpers panic on failure; they are for tests only.

pub mod fixtures;
pub mod generators;
pub mod keys;

pub use fixtures::{Member, TestProject};
pub use keys::{key_pool, pooled_keypair, POOL_SIZE};
