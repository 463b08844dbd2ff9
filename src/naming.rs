//! Stable mapping from (folder id, relative path) to transport blob names.
//!
//! Names are `<folder id>/<hex keyed BLAKE3 of the path>.enc`. The hash is
//! keyed with a subkey of the encryption key, so the transport never reveals
//! file names while both machines still agree on every name. The reverse
//! mapping goes through the blob content: the path is sealed inside it.

use crate::crypto::EncryptionKey;

pub const BLOB_EXT: &str = "enc";

#[derive(Clone)]
pub struct BlobNamer {
	key: [u8; 32],
}

impl BlobNamer {
	pub fn new(key: &EncryptionKey) -> Self {
		BlobNamer { key: key.naming_key() }
	}

	/// Transport name of `rel_path` inside folder `folder_id`
	pub fn blob_name(&self, folder_id: &str, rel_path: &str) -> String {
		let digest = blake3::keyed_hash(&self.key, rel_path.as_bytes());
		format!("{}/{}.{}", folder_id, hex::encode(digest.as_bytes()), BLOB_EXT)
	}
}

/// Folder id a blob name belongs to, if it looks like one of ours
pub fn folder_of(name: &str) -> Option<&str> {
	let (folder, file) = name.split_once('/')?;
	if folder.is_empty() || file.contains('/') || !is_blob_file_name(file) {
		return None;
	}
	Some(folder)
}

fn is_blob_file_name(file: &str) -> bool {
	match file.strip_suffix(BLOB_EXT).and_then(|f| f.strip_suffix('.')) {
		Some(stem) => stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()),
		None => false,
	}
}


// vim: ts=4
