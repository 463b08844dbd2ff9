//! File discovery: expands a folder's glob patterns into a [`Snapshot`].
//!
//! Patterns are matched against paths relative to the folder root with
//! `literal_separator` semantics, so `*.py` only matches top-level files and
//! `**/*.py` matches at any depth. Symlinks are never followed.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FolderSpec;
use crate::error::SyncError;
use crate::logging::*;
use crate::types::{FileRecord, ScanWarning, Snapshot};
use crate::util;

/// Files matching these are never part of a snapshot
const ALWAYS_EXCLUDE: &[&str] = &["**/*.cryptdrive-tmp", "**/.DS_Store", "**/Thumbs.db"];

/// Snapshot plus the non-fatal problems met while building it
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
	pub snapshot: Snapshot,
	pub warnings: Vec<ScanWarning>,
}

/// Compiled include patterns of one folder
pub struct PatternSet {
	include: GlobSet,
	always_exclude: GlobSet,
}

impl PatternSet {
	pub fn new(patterns: &[String]) -> Result<Self, SyncError> {
		let include = build_glob_set(patterns)?;
		let always_exclude =
			build_glob_set(&ALWAYS_EXCLUDE.iter().map(|p| p.to_string()).collect::<Vec<_>>())?;
		Ok(PatternSet { include, always_exclude })
	}

	/// Whether a `/`-separated relative path is in scope
	pub fn is_match(&self, rel_path: &str) -> bool {
		!self.always_exclude.is_match(rel_path) && self.include.is_match(rel_path)
	}
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, SyncError> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = GlobBuilder::new(pattern).literal_separator(true).build().map_err(|e| {
			SyncError::Config { message: format!("invalid pattern {}: {}", pattern, e) }
		})?;
		builder.add(glob);
	}
	builder
		.build()
		.map_err(|e| SyncError::Config { message: format!("failed to build pattern set: {}", e) })
}

/// Relative `/`-separated form of `path` under `root`
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(root).ok()?;
	let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
	let joined = parts?.join("/");
	if joined.is_empty() {
		None
	} else {
		Some(joined)
	}
}

/// Path a walk error is about, if it names one
fn error_path(err: &ignore::Error) -> Option<&Path> {
	match err {
		ignore::Error::WithPath { path, .. } => Some(path.as_path()),
		ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
			error_path(err)
		}
		ignore::Error::Partial(errs) => errs.iter().find_map(error_path),
		ignore::Error::Loop { child, .. } => Some(child.as_path()),
		_ => None,
	}
}

/// Expands folder specs into snapshots
#[derive(Debug, Clone)]
pub struct FileScanner {
	always_checksum: bool,
	exclude_dirs: Vec<PathBuf>,
}

impl Default for FileScanner {
	fn default() -> Self {
		FileScanner::new()
	}
}

impl FileScanner {
	pub fn new() -> Self {
		FileScanner { always_checksum: true, exclude_dirs: Vec::new() }
	}

	/// When false, a file whose size and mtime match the previous record
	/// keeps its previous fingerprint without being re-read.
	pub fn always_checksum(mut self, always: bool) -> Self {
		self.always_checksum = always;
		self
	}

	/// Never descend into `dir` (e.g. the transport mirror or state dir).
	///
	/// Relative paths are resolved against the current directory. `dir`
	/// should exist so that it compares equal to the canonical walk paths.
	pub fn exclude_dir(mut self, dir: impl AsRef<Path>) -> Self {
		let dir = dir.as_ref();
		let absolute = if dir.is_absolute() {
			dir.to_path_buf()
		} else {
			std::env::current_dir().map(|cwd| cwd.join(dir)).unwrap_or_else(|_| dir.to_path_buf())
		};
		self.exclude_dirs.push(fs::canonicalize(&absolute).unwrap_or(absolute));
		self
	}

	/// Scan one folder. `previous` only feeds the mtime pre-filter.
	pub fn scan(
		&self,
		folder: &FolderSpec,
		previous: Option<&Snapshot>,
	) -> Result<ScanResult, SyncError> {
		let root = fs::canonicalize(&folder.path).map_err(|e| SyncError::Scan {
			root: folder.path.display().to_string(),
			message: e.to_string(),
		})?;
		if !root.is_dir() {
			return Err(SyncError::Scan {
				root: root.display().to_string(),
				message: "not a directory".to_string(),
			});
		}

		let patterns = PatternSet::new(&folder.file_patterns)?;
		let mut result = ScanResult::default();

		let excluded = self.exclude_dirs.clone();
		let walker = WalkBuilder::new(&root)
			.standard_filters(false)
			.hidden(false)
			.follow_links(false)
			.filter_entry(move |entry| !excluded.iter().any(|dir| entry.path().starts_with(dir)))
			.build();

		for entry in walker {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					let path = error_path(&e)
						.and_then(|p| relative_path(&root, p))
						.unwrap_or_else(|| ".".to_string());
					warn!("Skipping unreadable entry {} under {}: {}", path, root.display(), e);
					result.warnings.push(ScanWarning { path, reason: e.to_string() });
					continue;
				}
			};

			let file_type = match entry.file_type() {
				Some(ft) => ft,
				None => continue,
			};
			if file_type.is_symlink() {
				debug!("Not following symlink {}", entry.path().display());
				continue;
			}
			if !file_type.is_file() {
				continue;
			}

			let rel = match relative_path(&root, entry.path()) {
				Some(rel) => rel,
				None => {
					result.warnings.push(ScanWarning {
						path: entry.path().display().to_string(),
						reason: "path is not valid UTF-8".to_string(),
					});
					continue;
				}
			};
			if !patterns.is_match(&rel) {
				continue;
			}

			match self.record(entry.path(), &rel, previous) {
				Ok(record) => result.snapshot.insert(record),
				Err(e) => {
					warn!("Skipping unreadable file {}: {}", entry.path().display(), e);
					result.warnings.push(ScanWarning { path: rel, reason: e.to_string() });
				}
			}
		}

		debug!(
			"Scanned {}: {} files, {} warnings",
			root.display(),
			result.snapshot.len(),
			result.warnings.len()
		);
		Ok(result)
	}

	fn record(
		&self,
		path: &Path,
		rel: &str,
		previous: Option<&Snapshot>,
	) -> std::io::Result<FileRecord> {
		let meta = fs::symlink_metadata(path)?;
		let size = meta.len();
		let mtime = util::mtime_secs(&meta);

		if !self.always_checksum {
			if let Some(prev) = previous.and_then(|s| s.get(rel)) {
				if prev.size == size && prev.mtime == mtime {
					return Ok(prev.clone());
				}
			}
		}

		let fingerprint = util::fingerprint_file(path)?;
		Ok(FileRecord { path: rel.to_string(), fingerprint, size, mtime })
	}
}


// vim: ts=4
