//! Fingerprinting, time and atomic file helpers

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::logging::*;

/// Suffix of in-flight files; never scanned, removed on startup
pub const TEMP_SUFFIX: &str = ".cryptdrive-tmp";

/// Fingerprint of an in-memory buffer
pub fn fingerprint(buf: &[u8]) -> String {
	hex::encode(blake3::hash(buf).as_bytes())
}

/// Fingerprint of a file, streaming its full content
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
	let mut file = fs::File::open(path)?;
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		let n = file.read(&mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Modification time in whole seconds since the epoch
pub fn mtime_secs(meta: &fs::Metadata) -> i64 {
	match meta.modified() {
		Ok(t) => match t.duration_since(UNIX_EPOCH) {
			Ok(d) => d.as_secs() as i64,
			Err(e) => -(e.duration().as_secs() as i64),
		},
		Err(_) => 0,
	}
}

pub fn now_secs() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Sibling temp path for `path`, unique per call
pub fn temp_path_for(path: &Path) -> PathBuf {
	let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	let tmp_name = format!(".{}.{}{}", name, uuid::Uuid::new_v4().simple(), TEMP_SUFFIX);
	path.with_file_name(tmp_name)
}

/// Write `data` to `path` so that readers see either the old or the new
/// content, never a partial file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}

	let tmp = temp_path_for(path);
	let result = (|| {
		let mut file = fs::File::create(&tmp)?;
		file.write_all(data)?;
		file.sync_all()?;
		fs::rename(&tmp, path)
	})();

	if result.is_err() {
		let _ = fs::remove_file(&tmp);
		return result;
	}

	// Make the rename itself durable
	if let Some(parent) = path.parent() {
		if let Ok(dir) = fs::File::open(parent) {
			let _ = dir.sync_all();
		}
	}
	Ok(())
}

/// Remove orphaned temp files left behind by an interrupted run.
/// Returns how many were removed.
pub fn cleanup_temp_files(dir: &Path) -> usize {
	fn scan_dir(dir: &Path, count: &mut usize) {
		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(e) => {
				debug!("Cannot read directory {} during cleanup: {}", dir.display(), e);
				return;
			}
		};

		for entry in entries.flatten() {
			let path = entry.path();
			let metadata = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) => {
					warn!("Cannot access {} during cleanup: {}", path.display(), e);
					continue;
				}
			};

			let is_temp = path
				.file_name()
				.and_then(|n| n.to_str())
				.map(|n| n.ends_with(TEMP_SUFFIX))
				.unwrap_or(false);

			if is_temp && metadata.is_file() {
				match fs::remove_file(&path) {
					Ok(_) => {
						debug!("Removed orphaned temp file {}", path.display());
						*count += 1;
					}
					Err(e) if e.kind() == io::ErrorKind::NotFound => {}
					Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
				}
			} else if metadata.is_dir() {
				scan_dir(&path, count);
			}
		}
	}

	let mut count = 0;
	scan_dir(dir, &mut count);
	if count > 0 {
		info!("Cleaned up {} orphaned temporary files in {}", count, dir.display());
	}
	count
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_fingerprint_file_matches_buffer() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("f.bin");
		let data = vec![7u8; 200_000];
		fs::write(&path, &data).unwrap();
		assert_eq!(fingerprint_file(&path).unwrap(), fingerprint(&data));
	}

	#[test]
	fn test_fingerprint_distinguishes_content() {
		assert_ne!(fingerprint(b"x"), fingerprint(b"y"));
		assert_eq!(fingerprint(b"x").len(), 64);
	}

	#[test]
	fn test_atomic_write_creates_parents_and_replaces() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("a/b/c.txt");
		atomic_write(&path, b"one").unwrap();
		atomic_write(&path, b"two").unwrap();
		assert_eq!(fs::read(&path).unwrap(), b"two");

		let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
			.unwrap()
			.flatten()
			.filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
			.collect();
		assert!(leftovers.is_empty());
	}

	#[test]
	fn test_cleanup_temp_files_recurses() {
		let tmp = TempDir::new().unwrap();
		fs::create_dir_all(tmp.path().join("sub")).unwrap();
		fs::write(tmp.path().join("keep.txt"), "k").unwrap();
		fs::write(tmp.path().join(format!(".x.abc{}", TEMP_SUFFIX)), "t").unwrap();
		fs::write(tmp.path().join("sub").join(format!(".y.def{}", TEMP_SUFFIX)), "t").unwrap();

		assert_eq!(cleanup_temp_files(tmp.path()), 2);
		assert!(tmp.path().join("keep.txt").exists());
	}
}

// vim: ts=4
