// Crypto adapter layer over the primitive crates.

pub mod keys;
pub mod x25519;
pub mod aead;
pub mod hash;
pub mod kdf;
