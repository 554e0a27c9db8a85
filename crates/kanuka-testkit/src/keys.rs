//! Pre-generated RSA key pairs.
//!
//! A 2048-bit key takes long enough to generate that a test building a
//! hundred devices would spend most of its time there. The pool is built
//! on first use and shared by every test in the binary.

use std::sync::OnceLock;

use kanuka_core::KeyPair;

pub const POOL_SIZE: usize = 4;

pub fn key_pool() -> &'static [KeyPair] {
    static POOL: OnceLock<Vec<KeyPair>> = OnceLock::new();
    POOL.get_or_init(|| {
        (0..POOL_SIZE)
            .map(|_| KeyPair::generate().expect("generate pooled key pair"))
            .collect()
    })
}

/// Pool entry for `index`, wrapping around.
pub fn pooled_keypair(index: usize) -> &'static KeyPair {
    &key_pool()[index % POOL_SIZE]
}
