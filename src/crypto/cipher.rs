//! AES-256-GCM encryption of file payloads and the on-transport blob format.
//!
//! Wire layout of a blob stored in the transport:
//!
//! ```text
//! "CDRV" | version (1 byte) | nonce (12 bytes) | ciphertext || tag (16 bytes)
//! ```
//!
//! The plaintext sealed inside is an envelope carrying the relative path
//! followed by the file content:
//!
//! ```text
//! path length (u32 BE) | path (UTF-8) | file bytes
//! ```
//!
//! The folder id is passed as associated data, so a blob copied into another
//! folder's namespace fails authentication.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use super::keys::EncryptionKey;
use crate::error::CipherError;
use crate::types::EncryptedBlob;

pub const BLOB_MAGIC: &[u8; 4] = b"CDRV";
pub const BLOB_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = BLOB_MAGIC.len() + 1 + NONCE_LEN;

/// Authenticated cipher bound to one key
#[derive(Clone)]
pub struct Cipher {
	aead: Aes256Gcm,
}

impl Cipher {
	pub fn new(key: &EncryptionKey) -> Self {
		Cipher { aead: Aes256Gcm::new(key.as_bytes().into()) }
	}

	/// Encrypt `plaintext` under a fresh random nonce.
	pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CipherError> {
		self.encrypt_with_aad(plaintext, b"")
	}

	/// Decrypt and verify. Any key or integrity mismatch is `DecryptionFailed`.
	pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>, CipherError> {
		self.decrypt_with_aad(ciphertext, nonce, b"")
	}

	pub fn encrypt_with_aad(
		&self,
		plaintext: &[u8],
		aad: &[u8],
	) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CipherError> {
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = self
			.aead
			.encrypt(&nonce, Payload { msg: plaintext, aad })
			.map_err(|e| CipherError::EncryptionFailed { message: e.to_string() })?;

		let mut nonce_bytes = [0u8; NONCE_LEN];
		nonce_bytes.copy_from_slice(nonce.as_slice());
		Ok((ciphertext, nonce_bytes))
	}

	pub fn decrypt_with_aad(
		&self,
		ciphertext: &[u8],
		nonce: &[u8; NONCE_LEN],
		aad: &[u8],
	) -> Result<Vec<u8>, CipherError> {
		if ciphertext.len() < TAG_LEN {
			return Err(CipherError::DecryptionFailed);
		}
		self.aead
			.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
			.map_err(|_| CipherError::DecryptionFailed)
	}

	/// Seal one file of `folder_id` into an [`EncryptedBlob`].
	pub fn seal(
		&self,
		folder_id: &str,
		path: &str,
		content: &[u8],
	) -> Result<EncryptedBlob, CipherError> {
		let path_len = u32::try_from(path.len()).map_err(|_| CipherError::EncryptionFailed {
			message: format!("path too long: {} bytes", path.len()),
		})?;

		let mut envelope = Vec::with_capacity(4 + path.len() + content.len());
		envelope.extend_from_slice(&path_len.to_be_bytes());
		envelope.extend_from_slice(path.as_bytes());
		envelope.extend_from_slice(content);

		let (ciphertext, nonce) = self.encrypt_with_aad(&envelope, folder_id.as_bytes())?;
		Ok(EncryptedBlob { path: path.to_string(), ciphertext, nonce })
	}

	/// Parse and decrypt blob bytes read from the transport, returning the
	/// relative path and file content.
	pub fn open(&self, folder_id: &str, wire: &[u8]) -> Result<(String, Vec<u8>), CipherError> {
		let (nonce, ciphertext) = parse_wire(wire)?;
		let envelope = self.decrypt_with_aad(ciphertext, &nonce, folder_id.as_bytes())?;

		if envelope.len() < 4 {
			return Err(CipherError::MalformedBlob { message: "truncated envelope".to_string() });
		}
		let mut len_bytes = [0u8; 4];
		len_bytes.copy_from_slice(&envelope[..4]);
		let path_len = u32::from_be_bytes(len_bytes) as usize;
		if envelope.len() < 4 + path_len {
			return Err(CipherError::MalformedBlob {
				message: format!("path length {} exceeds envelope", path_len),
			});
		}

		let path = String::from_utf8(envelope[4..4 + path_len].to_vec()).map_err(|_| {
			CipherError::MalformedBlob { message: "path is not UTF-8".to_string() }
		})?;
		Ok((path, envelope[4 + path_len..].to_vec()))
	}
}

impl EncryptedBlob {
	/// Serialized form written into the transport
	pub fn to_wire(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
		out.extend_from_slice(BLOB_MAGIC);
		out.push(BLOB_VERSION);
		out.extend_from_slice(&self.nonce);
		out.extend_from_slice(&self.ciphertext);
		out
	}
}

fn parse_wire(wire: &[u8]) -> Result<([u8; NONCE_LEN], &[u8]), CipherError> {
	if wire.len() < HEADER_LEN + TAG_LEN {
		return Err(CipherError::MalformedBlob { message: format!("only {} bytes", wire.len()) });
	}
	if &wire[..BLOB_MAGIC.len()] != BLOB_MAGIC {
		return Err(CipherError::MalformedBlob { message: "bad magic".to_string() });
	}
	let version = wire[BLOB_MAGIC.len()];
	if version != BLOB_VERSION {
		return Err(CipherError::MalformedBlob {
			message: format!("unsupported blob version {}", version),
		});
	}

	let mut nonce = [0u8; NONCE_LEN];
	nonce.copy_from_slice(&wire[BLOB_MAGIC.len() + 1..HEADER_LEN]);
	Ok((nonce, &wire[HEADER_LEN..]))
}


// vim: ts=4
