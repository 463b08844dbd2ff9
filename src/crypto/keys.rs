//! Symmetric key generation and encoding

use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use std::fmt;
use zeroize::Zeroize;

use crate::error::CipherError;

/// Key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

const NAMING_CONTEXT: &str = "cryptdrive 2024-01-01 blob naming key";

/// Shared secret used for both file encryption and blob naming
#[derive(Clone)]
pub struct EncryptionKey {
	bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
	/// Generate a fresh random key from the OS RNG
	pub fn generate() -> Self {
		let key = Aes256Gcm::generate_key(&mut OsRng);
		let mut bytes = [0u8; KEY_LEN];
		bytes.copy_from_slice(key.as_slice());
		EncryptionKey { bytes }
	}

	pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
		EncryptionKey { bytes }
	}

	/// Parse key material as printed by `keygen` (URL-safe base64).
	/// Standard and unpadded base64 are accepted as well.
	pub fn from_encoded(encoded: &str) -> Result<Self, CipherError> {
		let encoded = encoded.trim();
		let mut decoded = URL_SAFE
			.decode(encoded)
			.or_else(|_| STANDARD.decode(encoded))
			.or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
			.map_err(|e| CipherError::InvalidKey { message: format!("not base64: {}", e) })?;

		if decoded.len() != KEY_LEN {
			let len = decoded.len();
			decoded.zeroize();
			return Err(CipherError::InvalidKey {
				message: format!("expected {} bytes, got {}", KEY_LEN, len),
			});
		}

		let mut bytes = [0u8; KEY_LEN];
		bytes.copy_from_slice(&decoded);
		decoded.zeroize();
		Ok(EncryptionKey { bytes })
	}

	/// URL-safe base64 form, suitable for a config file
	pub fn encode(&self) -> String {
		URL_SAFE.encode(self.bytes)
	}

	pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
		&self.bytes
	}

	/// Subkey for keyed blob-name hashing, independent from the AEAD key
	pub fn naming_key(&self) -> [u8; 32] {
		blake3::derive_key(NAMING_CONTEXT, &self.bytes)
	}
}

impl Drop for EncryptionKey {
	fn drop(&mut self) {
		self.bytes.zeroize();
	}
}

impl fmt::Debug for EncryptionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("EncryptionKey(<redacted>)")
	}
}

impl PartialEq for EncryptionKey {
	fn eq(&self, other: &Self) -> bool {
		self.bytes.iter().zip(other.bytes.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
	}
}

impl Eq for EncryptionKey {}

/// KeyManager entry point: new key material for the user to distribute
pub fn generate_key() -> EncryptionKey {
	EncryptionKey::generate()
}


// vim: ts=4
