//! Manifest persistence: the durable record of what was last synchronized.
//!
//! The manifest is only ever replaced as a whole through write-temp-then-rename,
//! so a crash leaves either the previous or the new manifest on disk. A
//! manifest that exists but cannot be parsed is reported as corrupted and the
//! engine refuses to run until it is resolved by hand.
//!
//! Access is serialized with a lock file next to the manifest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ManifestError;
use crate::logging::*;
use crate::types::{Direction, Snapshot};
use crate::util;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// Locks older than this are reclaimed even if the PID looks alive
const LOCK_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// An unparsable lock file younger than this is assumed to be mid-creation
const LOCK_GRACE: Duration = Duration::from_secs(60);

/// Last synchronized state of one folder in one direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionState {
	pub snapshot: Snapshot,

	/// Transport revision pushed (upload) or pulled (download)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revision: Option<String>,

	/// Unix timestamp of the sync
	pub synced_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderState {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub uploaded: Option<DirectionState>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub downloaded: Option<DirectionState>,
}

impl FolderState {
	pub fn get(&self, direction: Direction) -> Option<&DirectionState> {
		match direction {
			Direction::Upload => self.uploaded.as_ref(),
			Direction::Download => self.downloaded.as_ref(),
		}
	}

	fn slot(&mut self, direction: Direction) -> &mut Option<DirectionState> {
		match direction {
			Direction::Upload => &mut self.uploaded,
			Direction::Download => &mut self.downloaded,
		}
	}
}

/// folderId → direction → snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
	pub version: u32,

	#[serde(default)]
	pub folders: BTreeMap<String, FolderState>,
}

impl Default for Manifest {
	fn default() -> Self {
		Manifest { version: MANIFEST_VERSION, folders: BTreeMap::new() }
	}
}

impl Manifest {
	pub fn new() -> Self {
		Manifest::default()
	}

	/// Last synchronized snapshot of a folder, if any
	pub fn snapshot(&self, folder_id: &str, direction: Direction) -> Option<&Snapshot> {
		self.folders.get(folder_id).and_then(|f| f.get(direction)).map(|s| &s.snapshot)
	}

	pub fn state(&self, folder_id: &str, direction: Direction) -> Option<&DirectionState> {
		self.folders.get(folder_id).and_then(|f| f.get(direction))
	}

	/// Replace the recorded state of one folder and direction
	pub fn record(
		&mut self,
		folder_id: &str,
		direction: Direction,
		snapshot: Snapshot,
		revision: Option<String>,
	) {
		let state = DirectionState { snapshot, revision, synced_at: util::now_secs() };
		*self.folders.entry(folder_id.to_string()).or_default().slot(direction) = Some(state);
	}

	/// Read the manifest; a missing file yields an empty manifest.
	pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
		let contents = match fs::read_to_string(path) {
			Ok(c) => c,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!("No manifest at {}, starting empty", path.display());
				return Ok(Manifest::new());
			}
			Err(e) => return Err(ManifestError::LoadFailed { source: Box::new(e) }),
		};

		let manifest: Manifest = serde_json::from_str(&contents).map_err(|e| {
			ManifestError::Corrupted { message: format!("{}: {}", path.display(), e) }
		})?;

		if manifest.version > MANIFEST_VERSION {
			return Err(ManifestError::UnsupportedVersion {
				found: manifest.version,
				supported: MANIFEST_VERSION,
			});
		}
		Ok(manifest)
	}

	/// Atomically replace the manifest file
	pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
		let json = serde_json::to_string_pretty(self)
			.map_err(|e| ManifestError::SaveFailed { source: Box::new(e) })?;
		util::atomic_write(path, json.as_bytes())
			.map_err(|e| ManifestError::SaveFailed { source: Box::new(e) })?;
		debug!("Manifest saved to {}", path.display());
		Ok(())
	}
}

/// Lock information stored in the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
	pub pid: u32,

	/// Unix timestamp when the lock was acquired
	pub started: u64,

	/// Distinguishes two acquisitions by the same process in the same second
	#[serde(default)]
	pub token: String,
}

impl LockInfo {
	fn current() -> Self {
		LockInfo {
			pid: std::process::id(),
			started: util::now_secs(),
			token: uuid::Uuid::new_v4().simple().to_string(),
		}
	}

	/// Check if this lock is stale (process is dead)
	pub fn is_stale(&self) -> bool {
		!is_process_alive(self.pid)
	}

	/// Check if this lock is too old (>24 hours)
	pub fn is_too_old(&self) -> bool {
		util::now_secs().saturating_sub(self.started) > LOCK_MAX_AGE_SECS
	}
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
	Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_process_alive(_pid: u32) -> bool {
	// Without /proc, assume alive; the age limit still reclaims the lock
	true
}

/// RAII guard for exclusive access to the manifest
#[derive(Debug)]
pub struct ManifestLock {
	path: PathBuf,
	contents: Vec<u8>,
}

impl ManifestLock {
	/// Try to take the lock. `Ok(None)` means a live holder has it.
	pub fn try_acquire(path: &Path) -> Result<Option<ManifestLock>, ManifestError> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent).map_err(|e| ManifestError::LockFailed {
					message: format!("cannot create {}: {}", parent.display(), e),
				})?;
			}
		}

		for _ in 0..2 {
			match fs::OpenOptions::new().write(true).create_new(true).open(path) {
				Ok(mut file) => {
					let contents = serde_json::to_vec(&LockInfo::current()).map_err(|e| {
						ManifestError::LockFailed { message: e.to_string() }
					})?;
					file.write_all(&contents).and_then(|_| file.sync_all()).map_err(|e| {
						let _ = fs::remove_file(path);
						ManifestError::LockFailed { message: e.to_string() }
					})?;
					return Ok(Some(ManifestLock { path: path.to_path_buf(), contents }));
				}
				Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
					let stale = match Self::stale_contents(path) {
						Some(stale) => stale,
						None => return Ok(None),
					};
					warn!("Removing stale manifest lock {}", path.display());
					if !Self::remove_if_unchanged(path, &stale)? {
						return Ok(None);
					}
				}
				Err(e) => {
					return Err(ManifestError::LockFailed {
						message: format!("cannot create {}: {}", path.display(), e),
					})
				}
			}
		}
		Ok(None)
	}

	/// Take the lock or fail with `LockFailed`
	pub fn acquire(path: &Path) -> Result<ManifestLock, ManifestError> {
		Self::try_acquire(path)?.ok_or_else(|| ManifestError::LockFailed {
			message: format!(
				"sync already in progress (lock file exists). If stale, delete: {}",
				path.display()
			),
		})
	}

	/// Read the current holder, if any
	pub fn holder(path: &Path) -> Option<LockInfo> {
		fs::read(path).ok().and_then(|b| serde_json::from_slice(&b).ok())
	}

	/// Raw contents of the lock file when its holder is gone
	fn stale_contents(path: &Path) -> Option<Vec<u8>> {
		let contents = fs::read(path).ok()?;
		let stale = match serde_json::from_slice::<LockInfo>(&contents) {
			Ok(info) => info.is_stale() || info.is_too_old(),
			Err(_) => {
				// Unparsable: either being written right now or left half-written
				let age = fs::metadata(path)
					.and_then(|m| m.modified())
					.ok()
					.and_then(|t| t.elapsed().ok());
				matches!(age, Some(age) if age > LOCK_GRACE)
			}
		};
		stale.then_some(contents)
	}

	/// Remove the lock file only if it still holds `expected`.
	///
	/// The file is moved aside before it is compared, so a lock that another
	/// run reclaimed in the meantime is put back instead of deleted.
	fn remove_if_unchanged(path: &Path, expected: &[u8]) -> Result<bool, ManifestError> {
		let aside = path.with_extension(format!("stale-{}", uuid::Uuid::new_v4().simple()));
		match fs::rename(path, &aside) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
			Err(e) => {
				return Err(ManifestError::LockFailed {
					message: format!("cannot remove stale lock: {}", e),
				})
			}
		}

		if fs::read(&aside).map_or(false, |moved| moved == expected) {
			let _ = fs::remove_file(&aside);
			return Ok(true);
		}

		debug!("Lock {} was reclaimed by another run, restoring it", path.display());
		if let Err(e) = fs::hard_link(&aside, path) {
			warn!("Cannot restore manifest lock {}: {}", path.display(), e);
		}
		let _ = fs::remove_file(&aside);
		Ok(false)
	}
}

impl Drop for ManifestLock {
	fn drop(&mut self) {
		// A lock reclaimed by another run is theirs now
		if fs::read(&self.path).map_or(false, |current| current == self.contents) {
			let _ = fs::remove_file(&self.path);
		}
	}
}


// vim: ts=4
