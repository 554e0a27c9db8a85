//! # Kanuka Access
//!
//! The grant / revoke / rotate engine. Every operation takes an explicit
//! [`Context`] and keeps the registry, the access records and the public
//! keys in step.
//!
//! ## Operations
//!
//! - [`init_project`] - New project, caller as first device
//! - [`request_access`] - Publish a key pair and wait for a grant
//! - [`grant`] - Wrap the content key for another device
//! - [`revoke`] / [`plan_revoke`] - Remove a device
//! - [`rotate_self`] - Replace the caller's key pair
//! - [`rotate_content_key`] - Replace the content key everywhere
//! - [`verify`] / [`repair`] - Detect and reconcile drift
//!
//! Mutating operations compute a [`ChangePlan`] first. With `dry_run` they
//! return it without touching anything.
//!
//! ## Usage
//!
//! ```ignore
//! let ctx = Context::new(layout, key_store, settings);
//! let report = revoke(&ctx, &Target::parse("bob@example.com", None), false)?;
//! assert!(report.rotation_recommended());
//! ```

pub mod context;
pub mod error;
pub mod grant;
pub mod plan;
pub mod project;
pub mod resolve;
pub mod revoke;
pub mod rotate;
pub mod verify;

#[cfg(test)]
mod testutil;

pub use context::{Context, Unlocked};
pub use error::{AccessError, Result};
pub use grant::{grant, GrantOptions, GrantReport, GrantTarget};
pub use plan::{Change, ChangePlan};
pub use project::{init_project, request_access, InitReport, RequestReport};
pub use resolve::{resolve_device, resolve_pending, Target};
pub use revoke::{plan_revoke, revoke, RevokeReport};
pub use rotate::{rotate_content_key, rotate_self, ContentRotationReport, RotateReport};
pub use verify::{repair, verify, CallerAccess, ConsistencyReport, Issue, RepairReport};
