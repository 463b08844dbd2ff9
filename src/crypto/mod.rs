//! Key management and authenticated encryption
//!
//! Files are sealed with AES-256-GCM under a single symmetric key that the
//! user distributes out-of-band. The key never travels through the transport.

pub mod cipher;
pub mod keys;

pub use cipher::{Cipher, BLOB_MAGIC, BLOB_VERSION};
pub use keys::{generate_key, EncryptionKey, KEY_LEN};

// vim: ts=4
