//! Sync orchestration.
//!
//! One engine serves one direction at a time. Upload turns local changes
//! into sealed blobs in the transport; download turns blobs back into files.
//! In both directions the manifest is written only after the transport work
//! it describes has fully succeeded, so a crash at any point makes the next
//! run redo work rather than lose it.
//!
//! ```text
//! IDLE -> SCANNING -> DIFFING -> TRANSFERRING -> COMMITTING_MANIFEST -> IDLE
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use crate::config::{Config, FolderSpec};
use crate::crypto::Cipher;
use crate::diff::diff;
use crate::error::SyncError;
use crate::logging::*;
use crate::manifest::{Manifest, ManifestLock};
use crate::naming::{self, BlobNamer};
use crate::scan::{FileScanner, PatternSet, ScanResult};
use crate::transport::{RevisionId, Transport};
use crate::types::{Diff, Direction, FileRecord, Snapshot, SyncPhase, SyncReport};
use crate::util;
use crate::validation::validate_relative_path;

/// Result of a scheduler tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	Completed(SyncReport),

	/// Another run held the manifest lock; nothing was done
	Skipped,
}

/// Pending local changes of one folder, as seen by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderChanges {
	pub folder_id: String,
	pub diff: Diff,
	pub warnings: usize,
}

struct ScannedFolder {
	id: String,
	scan: ScanResult,
	diff: Diff,
}

pub struct SyncEngine<T: Transport> {
	config: Config,
	cipher: Cipher,
	namer: BlobNamer,
	scanner: FileScanner,
	transport: T,
	manifest: Manifest,
	phase: SyncPhase,
}

impl<T: Transport> SyncEngine<T> {
	/// Build an engine, loading the manifest once.
	///
	/// A corrupted manifest is fatal: the engine refuses to start rather
	/// than re-upload or re-delete everything.
	pub fn new(config: Config, transport: T) -> Result<Self, SyncError> {
		let key = config.key()?;
		let manifest = Manifest::load(&config.manifest_path())?;

		// The state dir must exist before it can be excluded from scans
		fs::create_dir_all(&config.state_dir)?;
		let scanner = FileScanner::new()
			.always_checksum(config.always_checksum)
			.exclude_dir(&config.local_mirror_path)
			.exclude_dir(&config.state_dir);

		Ok(SyncEngine {
			cipher: Cipher::new(&key),
			namer: BlobNamer::new(&key),
			scanner,
			transport,
			manifest,
			phase: SyncPhase::Idle,
			config,
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn manifest(&self) -> &Manifest {
		&self.manifest
	}

	pub fn phase(&self) -> SyncPhase {
		self.phase
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}

	pub fn transport_mut(&mut self) -> &mut T {
		&mut self.transport
	}

	fn enter(&mut self, direction: Direction, phase: SyncPhase) {
		debug!("{}: {} -> {}", direction, self.phase, phase);
		self.phase = phase;
	}

	/// Run one direction under the manifest lock.
	///
	/// Returns [`TickOutcome::Skipped`] when a previous run still holds it.
	pub async fn tick(&mut self, direction: Direction) -> Result<TickOutcome, SyncError> {
		let lock_path = self.config.lock_path();
		let _lock = match ManifestLock::try_acquire(&lock_path)? {
			Some(lock) => lock,
			None => {
				let holder = ManifestLock::holder(&lock_path);
				warn!(
					"Skipping {}: previous run still holds the manifest lock (pid {:?})",
					direction,
					holder.map(|h| h.pid)
				);
				return Ok(TickOutcome::Skipped);
			}
		};

		let report = match direction {
			Direction::Upload => self.upload().await,
			Direction::Download => self.download().await,
		};
		self.phase = SyncPhase::Idle;
		report.map(TickOutcome::Completed)
	}

	/// Local changes an upload would send, without touching the transport
	/// or the manifest
	pub fn pending_changes(&self) -> Result<Vec<FolderChanges>, SyncError> {
		let mut changes = Vec::new();
		for folder in &self.config.folders {
			let id = folder.folder_id();
			let previous = self.manifest.snapshot(&id, Direction::Upload);
			let mut scan = self.scanner.scan(folder, previous)?;
			carry_forward(&mut scan, previous);
			changes.push(FolderChanges {
				diff: diff(previous, &scan.snapshot),
				warnings: scan.warnings.len(),
				folder_id: id,
			});
		}
		Ok(changes)
	}

	// ========================================================================
	// UPLOAD
	// ========================================================================

	/// Send local changes to the transport.
	///
	/// Without changes this performs no transport writes at all.
	pub async fn upload(&mut self) -> Result<SyncReport, SyncError> {
		let mut report = SyncReport::new(Direction::Upload);

		self.enter(Direction::Upload, SyncPhase::Scanning);
		let mut scans = Vec::new();
		for folder in &self.config.folders {
			let id = folder.folder_id();
			let previous = self.manifest.snapshot(&id, Direction::Upload);
			let mut scan = self.scanner.scan(folder, previous)?;
			carry_forward(&mut scan, previous);
			report.warnings.extend(scan.warnings.iter().cloned());
			scans.push((folder.clone(), id, scan));
		}

		self.enter(Direction::Upload, SyncPhase::Diffing);
		let scanned: Vec<(FolderSpec, ScannedFolder)> = scans
			.into_iter()
			.map(|(folder, id, scan)| {
				let d = diff(self.manifest.snapshot(&id, Direction::Upload), &scan.snapshot);
				debug!(
					"{}: {} added, {} modified, {} deleted",
					id,
					d.added.len(),
					d.modified.len(),
					d.deleted.len()
				);
				(folder, ScannedFolder { id, scan, diff: d })
			})
			.collect();

		self.enter(Direction::Upload, SyncPhase::Transferring);
		let existing: BTreeSet<String> = self.transport.list_blobs().await?.into_iter().collect();
		let mut staged = 0usize;
		let mut snapshots = Vec::new();

		for (folder, entry) in scanned {
			let previous = self.manifest.snapshot(&entry.id, Direction::Upload).cloned();
			let mut snapshot = entry.scan.snapshot;

			for path in entry.diff.changed() {
				let file = folder.path.join(path);
				let content = match fs::read(&file) {
					Ok(c) => c,
					Err(e) => {
						warn!("Cannot read {}: {}", file.display(), e);
						report.fail(path.clone(), e);
						restore_previous(&mut snapshot, previous.as_ref(), path);
						continue;
					}
				};

				let blob = match self.cipher.seal(&entry.id, path, &content) {
					Ok(b) => b,
					Err(e) => {
						report.fail(path.clone(), e);
						restore_previous(&mut snapshot, previous.as_ref(), path);
						continue;
					}
				};

				let name = self.namer.blob_name(&entry.id, path);
				let wire = blob.to_wire();
				self.transport.stage(&name, Some(wire.as_slice())).await?;
				staged += 1;

				// The file may have changed since it was scanned; record what was sent
				if let Some(record) = snapshot.files.get_mut(path) {
					record.fingerprint = util::fingerprint(&content);
					record.size = content.len() as u64;
				}
				if entry.diff.added.contains(path) {
					report.added += 1;
				} else {
					report.modified += 1;
				}
			}

			let mut removed = BTreeSet::new();
			for path in &entry.diff.deleted {
				let name = self.namer.blob_name(&entry.id, path);
				if existing.contains(&name) {
					self.transport.stage(&name, None).await?;
					staged += 1;
				}
				removed.insert(name);
				report.deleted += 1;
			}

			// Blobs of this folder that no current file maps to
			let expected: BTreeSet<String> =
				snapshot.paths().map(|p| self.namer.blob_name(&entry.id, p)).collect();
			for name in &existing {
				if naming::folder_of(name) != Some(entry.id.as_str()) {
					continue;
				}
				if expected.contains(name) || removed.contains(name) {
					continue;
				}
				debug!("Pruning orphaned blob {}", name);
				self.transport.stage(name, None).await?;
				staged += 1;
				report.pruned += 1;
			}

			snapshots.push((entry.id, entry.diff.is_empty(), snapshot));
		}

		if staged == 0 && snapshots.iter().all(|(_, unchanged, _)| *unchanged) {
			debug!("upload: nothing to do");
			self.phase = SyncPhase::Idle;
			return Ok(report);
		}

		if staged > 0 {
			let message = format!(
				"Sync: {} added, {} modified, {} deleted",
				report.added, report.modified, report.deleted
			);
			report.revision = self.transport.commit(&message).await?;
			self.transport.push().await?;
			if report.revision.is_none() {
				report.revision = self.transport.status().await?.head;
			}
		}

		self.enter(Direction::Upload, SyncPhase::CommittingManifest);
		let snapshots = snapshots.into_iter().map(|(id, _, s)| (id, s)).collect();
		self.commit_manifest(Direction::Upload, snapshots, report.revision.clone())?;

		info!("{}", report);
		self.phase = SyncPhase::Idle;
		Ok(report)
	}

	// ========================================================================
	// DOWNLOAD
	// ========================================================================

	/// Materialize the transport's current state into the local folders.
	///
	/// Per-file failures are recorded in the report and leave that file's
	/// previous state in the manifest.
	pub async fn download(&mut self) -> Result<SyncReport, SyncError> {
		let mut report = SyncReport::new(Direction::Download);

		self.enter(Direction::Download, SyncPhase::Transferring);
		let changed = self.transport.pull().await?;
		debug!("Pull reported {} changed blobs", changed.len());
		report.revision = self.transport.status().await?.head;

		self.enter(Direction::Download, SyncPhase::Scanning);
		let mut by_folder: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for name in self.transport.list_blobs().await? {
			match naming::folder_of(&name) {
				Some(id) => by_folder.entry(id.to_string()).or_default().push(name),
				None => debug!("Ignoring foreign transport entry {}", name),
			}
		}

		self.enter(Direction::Download, SyncPhase::Diffing);
		let folders = self.config.folders.clone();
		let mut snapshots = Vec::new();
		for folder in &folders {
			let id = folder.folder_id();
			let names = by_folder.remove(&id).unwrap_or_default();
			let snapshot = self.download_folder(folder, &id, &names, &mut report).await?;
			snapshots.push((id, snapshot));
		}
		for id in by_folder.keys() {
			debug!("Transport folder {} is not configured here", id);
		}

		self.enter(Direction::Download, SyncPhase::CommittingManifest);
		self.commit_manifest(Direction::Download, snapshots, report.revision.clone())?;

		info!("{}", report);
		self.phase = SyncPhase::Idle;
		Ok(report)
	}

	async fn download_folder(
		&mut self,
		folder: &FolderSpec,
		id: &str,
		names: &[String],
		report: &mut SyncReport,
	) -> Result<Snapshot, SyncError> {
		let root = folder.path.as_path();
		fs::create_dir_all(root)?;
		util::cleanup_temp_files(root);

		let patterns = PatternSet::new(&folder.file_patterns)?;
		let previous = self.manifest.snapshot(id, Direction::Download).cloned().unwrap_or_default();
		let previous_by_name: BTreeMap<String, &FileRecord> =
			previous.records().map(|r| (self.namer.blob_name(id, &r.path), r)).collect();
		let present: BTreeSet<&str> = names.iter().map(String::as_str).collect();

		self.enter(Direction::Download, SyncPhase::Transferring);
		let mut snapshot = Snapshot::new();

		for name in names {
			let carried = previous_by_name.get(name).copied();
			let label = carried.map(|r| r.path.clone()).unwrap_or_else(|| name.clone());

			let (path, content) = match self.fetch(id, name).await {
				Ok(opened) => opened,
				Err(reason) => {
					warn!("Cannot restore {}: {}", label, reason);
					report.fail(label, reason);
					if let Some(record) = carried {
						snapshot.insert(record.clone());
					}
					continue;
				}
			};

			if !patterns.is_match(&path) {
				debug!("{} is outside the configured patterns, skipping", path);
				continue;
			}

			let fingerprint = util::fingerprint(&content);
			if let Some(prev) = previous.get(&path) {
				if prev.fingerprint == fingerprint {
					snapshot.insert(prev.clone());
					continue;
				}
			}

			let target = root.join(&path);
			if matches!(util::fingerprint_file(&target), Ok(local) if local == fingerprint) {
				debug!("{} already up to date", path);
				snapshot.insert(local_record(&target, &path, fingerprint, content.len()));
				continue;
			}

			if let Err(e) = util::atomic_write(&target, &content) {
				warn!("Cannot write {}: {}", target.display(), e);
				report.fail(path.clone(), e);
				if let Some(prev) = previous.get(&path) {
					snapshot.insert(prev.clone());
				}
				continue;
			}

			if previous.contains(&path) {
				report.modified += 1;
			} else {
				report.added += 1;
			}
			snapshot.insert(local_record(&target, &path, fingerprint, content.len()));
		}

		for record in previous.records() {
			if snapshot.contains(&record.path) {
				continue;
			}
			let name = self.namer.blob_name(id, &record.path);
			if present.contains(name.as_str()) {
				// Still in the transport but filtered out or unreadable
				continue;
			}
			self.apply_remote_deletion(root, record, report);
		}

		Ok(snapshot)
	}

	/// Read, decrypt and check one blob. Errors are per-file.
	async fn fetch(&self, id: &str, name: &str) -> Result<(String, Vec<u8>), String> {
		let wire = self.transport.read_blob(name).await.map_err(|e| e.to_string())?;
		let (path, content) = self.cipher.open(id, &wire).map_err(|e| e.to_string())?;
		validate_relative_path(&path).map_err(|e| e.to_string())?;
		if self.namer.blob_name(id, &path) != name {
			return Err(format!("blob {} does not belong to path {}", name, path));
		}
		Ok((path, content))
	}

	/// Delete a local file whose blob disappeared, unless it was edited
	/// locally since the last download.
	fn apply_remote_deletion(&self, root: &Path, record: &FileRecord, report: &mut SyncReport) {
		let target = root.join(&record.path);
		match util::fingerprint_file(&target) {
			Ok(local) if local == record.fingerprint => match fs::remove_file(&target) {
				Ok(()) => {
					debug!("Deleted {}", target.display());
					report.deleted += 1;
					remove_empty_parents(root, &target);
				}
				Err(e) => report.fail(record.path.clone(), e),
			},
			Ok(_) => {
				warn!(
					"Not deleting {}: modified locally since last download",
					target.display()
				);
				report.conflicts.push(record.path.clone());
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => report.fail(record.path.clone(), e),
		}
	}

	/// Merge this direction's snapshots into the on-disk manifest and save.
	///
	/// The other direction's state is re-read so that an uploader and a
	/// downloader sharing one state dir never overwrite each other.
	fn commit_manifest(
		&mut self,
		direction: Direction,
		snapshots: Vec<(String, Snapshot)>,
		revision: Option<RevisionId>,
	) -> Result<(), SyncError> {
		let path = self.config.manifest_path();
		let mut manifest = Manifest::load(&path)?;
		for (id, snapshot) in snapshots {
			manifest.record(&id, direction, snapshot, revision.clone());
		}
		manifest.save(&path)?;
		self.manifest = manifest;
		Ok(())
	}
}

/// An unreadable file or directory is not a deleted one: keep the previous
/// record of everything a scan warning covers
fn carry_forward(scan: &mut ScanResult, previous: Option<&Snapshot>) {
	let Some(previous) = previous else {
		return;
	};
	for record in previous.records() {
		if scan.snapshot.contains(&record.path) {
			continue;
		}
		if scan.warnings.iter().any(|w| w.covers(&record.path)) {
			debug!("Keeping previous record of unreadable {}", record.path);
			scan.snapshot.insert(record.clone());
		}
	}
}

fn restore_previous(snapshot: &mut Snapshot, previous: Option<&Snapshot>, path: &str) {
	match previous.and_then(|p| p.get(path)) {
		Some(record) => snapshot.insert(record.clone()),
		None => {
			snapshot.remove(path);
		}
	}
}

fn local_record(target: &Path, path: &str, fingerprint: String, size: usize) -> FileRecord {
	let mtime = fs::symlink_metadata(target).map(|m| util::mtime_secs(&m)).unwrap_or(0);
	FileRecord { path: path.to_string(), fingerprint, size: size as u64, mtime }
}

fn remove_empty_parents(root: &Path, file: &Path) {
	let mut dir = file.parent();
	while let Some(d) = dir {
		if d == root || !d.starts_with(root) {
			break;
		}
		if fs::remove_dir(d).is_err() {
			break;
		}
		dir = d.parent();
	}
}


// vim: ts=4
