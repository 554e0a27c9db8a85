//! Proptest generators for property-based testing.

use proptest::prelude::*;

use kanuka_core::{ContentKey, DeviceId, ProjectId, UserId};

/// Generate a random DeviceId.
pub fn device_id() -> impl Strategy<Value = DeviceId> {
    any::<[u8; 16]>().prop_map(|bytes| DeviceId::from(uuid_v4(bytes)))
}

/// Generate a random ProjectId.
pub fn project_id() -> impl Strategy<Value = ProjectId> {
    any::<[u8; 16]>().prop_map(|bytes| ProjectId::from(uuid_v4(bytes)))
}

/// Generate a random UserId.
pub fn user_id() -> impl Strategy<Value = UserId> {
    any::<[u8; 16]>().prop_map(|bytes| UserId::from(uuid_v4(bytes)))
}

/// Generate a random ContentKey.
pub fn content_key() -> impl Strategy<Value = ContentKey> {
    any::<[u8; 32]>().prop_map(ContentKey::from_bytes)
}

/// Generate a plausible email address, mixed case.
pub fn email() -> impl Strategy<Value = String> {
    ("[a-zA-Z][a-zA-Z0-9._]{0,12}", "[a-z]{1,10}", "(com|org|io|dev)")
        .prop_map(|(local, domain, tld)| format!("{}@{}.{}", local, domain, tld))
}

/// Generate a device or project display name, including non-ASCII text
/// and TOML-significant characters.
pub fn display_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _\\-\\.\"'=\\[\\]#éü漢]{1,24}".prop_filter("not blank", |s| !s.trim().is_empty())
}

/// Generate secret file contents of up to `max_len` bytes.
pub fn secret_contents(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

fn uuid_v4(bytes: [u8; 16]) -> uuid::Uuid {
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}
