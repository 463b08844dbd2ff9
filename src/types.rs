//! Core data model: file records, snapshots, diffs, blobs and reports

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// State of a single in-scope file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
	/// Path relative to the folder root, `/`-separated
	pub path: String,

	/// Hex BLAKE3 digest of the full file content
	#[serde(rename = "fp")]
	pub fingerprint: String,

	#[serde(rename = "sz")]
	pub size: u64,

	/// Modification time, seconds since the epoch (pre-filter only)
	#[serde(rename = "mt")]
	pub mtime: i64,
}

/// Full local state of one folder at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
	pub files: BTreeMap<String, FileRecord>,
}

impl Snapshot {
	pub fn new() -> Self {
		Snapshot::default()
	}

	pub fn insert(&mut self, record: FileRecord) {
		self.files.insert(record.path.clone(), record);
	}

	pub fn get(&self, path: &str) -> Option<&FileRecord> {
		self.files.get(path)
	}

	pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
		self.files.remove(path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.files.contains_key(path)
	}

	pub fn len(&self) -> usize {
		self.files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.files.is_empty()
	}

	pub fn paths(&self) -> impl Iterator<Item = &String> {
		self.files.keys()
	}

	pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
		self.files.values()
	}
}

impl FromIterator<FileRecord> for Snapshot {
	fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
		let mut snapshot = Snapshot::new();
		for record in iter {
			snapshot.insert(record);
		}
		snapshot
	}
}

/// Result of comparing two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
	pub added: BTreeSet<String>,
	pub modified: BTreeSet<String>,
	pub deleted: BTreeSet<String>,
}

impl Diff {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
	}

	/// Number of paths touched by this diff
	pub fn len(&self) -> usize {
		self.added.len() + self.modified.len() + self.deleted.len()
	}

	/// Added and modified paths, i.e. files whose bytes must be sent
	pub fn changed(&self) -> impl Iterator<Item = &String> {
		self.added.iter().chain(self.modified.iter())
	}
}

/// Encrypted form of one file, owned by the in-flight sync operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
	/// Relative path of the plaintext file
	pub path: String,

	/// AES-GCM ciphertext with appended tag
	pub ciphertext: Vec<u8>,

	pub nonce: [u8; 12],
}

/// Direction of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
	Upload,
	Download,
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Direction::Upload => write!(f, "upload"),
			Direction::Download => write!(f, "download"),
		}
	}
}

/// Engine state machine phases, per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
	Idle,
	Scanning,
	Diffing,
	Transferring,
	CommittingManifest,
}

impl fmt::Display for SyncPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SyncPhase::Idle => "idle",
			SyncPhase::Scanning => "scanning",
			SyncPhase::Diffing => "diffing",
			SyncPhase::Transferring => "transferring",
			SyncPhase::CommittingManifest => "committing-manifest",
		};
		f.write_str(name)
	}
}

/// Non-fatal problem found while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
	/// Relative file or directory path, `.` for the folder root
	pub path: String,
	pub reason: String,
}

impl ScanWarning {
	/// Whether the file at `rel` may be missing from the scan because of this warning
	pub fn covers(&self, rel: &str) -> bool {
		if self.path == "." || self.path == rel {
			return true;
		}
		rel.strip_prefix(self.path.as_str()).map_or(false, |rest| rest.starts_with('/'))
	}
}

/// A file that could not be synchronized in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
	pub path: String,
	pub reason: String,
}

/// Structured outcome of one upload or download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
	pub direction: Direction,
	pub added: usize,
	pub modified: usize,
	pub deleted: usize,

	/// Transport blobs removed because no local file maps to them
	pub pruned: usize,

	pub failed: Vec<FailedFile>,

	/// Paths whose remote deletion was refused because of local edits
	pub conflicts: Vec<String>,

	pub warnings: Vec<ScanWarning>,

	/// Revision produced (upload) or reached (download), if any
	pub revision: Option<String>,
}

impl SyncReport {
	pub fn new(direction: Direction) -> Self {
		SyncReport {
			direction,
			added: 0,
			modified: 0,
			deleted: 0,
			pruned: 0,
			failed: Vec::new(),
			conflicts: Vec::new(),
			warnings: Vec::new(),
			revision: None,
		}
	}

	/// True when nothing was transferred, failed or refused
	pub fn is_noop(&self) -> bool {
		self.added == 0
			&& self.modified == 0
			&& self.deleted == 0
			&& self.pruned == 0
			&& self.failed.is_empty()
			&& self.conflicts.is_empty()
	}

	pub fn fail(&mut self, path: impl Into<String>, reason: impl ToString) {
		self.failed.push(FailedFile { path: path.into(), reason: reason.to_string() });
	}
}

impl fmt::Display for SyncReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}: {} added, {} modified, {} deleted",
			self.direction, self.added, self.modified, self.deleted
		)?;
		if self.pruned > 0 {
			write!(f, ", {} pruned", self.pruned)?;
		}
		if !self.failed.is_empty() {
			write!(f, ", {} failed", self.failed.len())?;
		}
		if !self.conflicts.is_empty() {
			write!(f, ", {} conflicts", self.conflicts.len())?;
		}
		Ok(())
	}
}


// vim: ts=4
