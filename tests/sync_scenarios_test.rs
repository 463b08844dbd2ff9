/// End-to-end sync scenarios between an uploader and a downloader machine
///
/// Both machines talk to the same in-memory remote, so these tests exercise
/// the full engine (scan, diff, seal, stage, commit, push, pull, open,
/// write, manifest) without needing git.
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use cryptdrive::config::{Config, FolderSpec};
use cryptdrive::crypto::{Cipher, EncryptionKey};
use cryptdrive::engine::{SyncEngine, TickOutcome};
use cryptdrive::error::{SyncError, TransportError};
use cryptdrive::manifest::{Manifest, ManifestLock};
use cryptdrive::naming::BlobNamer;
use cryptdrive::transport::{MemoryRemote, MemoryTransport};
use cryptdrive::types::Direction;
use cryptdrive::util;

const FOLDER_ID: &str = "scripts";

/// One machine: its synchronized folder and configuration
struct Machine {
	folder: PathBuf,
	config: Config,
}

impl Machine {
	fn new(root: &Path, name: &str, key: &str) -> Self {
		let base = root.join(name);
		let folder = base.join(FOLDER_ID);
		fs::create_dir_all(&folder).unwrap();

		let mut config = Config::new(
			"memory://",
			base.join("mirror"),
			key,
			vec![FolderSpec::new(&folder, &["**/*.py", "**/*.sh"])],
		);
		config.state_dir = base.join("state");
		Machine { folder, config }
	}

	fn engine(&self, remote: &MemoryRemote) -> SyncEngine<MemoryTransport> {
		SyncEngine::new(self.config.clone(), remote.connect()).unwrap()
	}

	fn write(&self, rel: &str, content: &str) {
		let path = self.folder.join(rel);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, content).unwrap();
	}

	fn read(&self, rel: &str) -> Option<String> {
		fs::read_to_string(self.folder.join(rel)).ok()
	}

	fn manifest_bytes(&self) -> Option<Vec<u8>> {
		fs::read(self.config.manifest_path()).ok()
	}

	fn manifest(&self) -> Manifest {
		Manifest::load(&self.config.manifest_path()).unwrap()
	}
}

fn setup() -> (TempDir, String, Machine, Machine) {
	let root = TempDir::new().unwrap();
	let key = EncryptionKey::generate().encode();
	let up = Machine::new(root.path(), "up", &key);
	let down = Machine::new(root.path(), "down", &key);
	(root, key, up, down)
}

fn remote_content(remote: &MemoryRemote, key: &str, rel: &str) -> Option<Vec<u8>> {
	let key = EncryptionKey::from_encoded(key).unwrap();
	let name = BlobNamer::new(&key).blob_name(FOLDER_ID, rel);
	let wire = remote.files().get(&name).cloned()?;
	let (path, content) = Cipher::new(&key).open(FOLDER_ID, &wire).unwrap();
	assert_eq!(path, rel);
	Some(content)
}

// ===================================================================
// UPLOAD
// ===================================================================

#[tokio::test]
async fn test_upload_adds_then_modifies() {
	let (_root, key, up, _down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);

	let report = engine.upload().await.unwrap();
	assert_eq!((report.added, report.modified, report.deleted), (2, 0, 0));
	assert!(report.revision.is_some());
	assert_eq!(remote.files().len(), 2);

	let snapshot = up.manifest().snapshot(FOLDER_ID, Direction::Upload).cloned().unwrap();
	assert_eq!(snapshot.get("a.py").unwrap().fingerprint, util::fingerprint(b"x"));
	assert_eq!(snapshot.get("b.sh").unwrap().fingerprint, util::fingerprint(b"y"));

	up.write("a.py", "z");
	let stages = engine.transport().stage_count();
	let report = engine.upload().await.unwrap();
	assert_eq!((report.added, report.modified, report.deleted), (0, 1, 0));
	assert_eq!(engine.transport().stage_count(), stages + 1);
	assert_eq!(remote_content(&remote, &key, "a.py").unwrap(), b"z");
	assert_eq!(remote_content(&remote, &key, "b.sh").unwrap(), b"y");
	assert_eq!(remote.push_count(), 2);
}

#[tokio::test]
async fn test_transport_never_sees_plaintext() {
	let (_root, _key, up, _down) = setup();
	up.write("secret-plans.py", "launch codes");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();

	for (name, bytes) in remote.files() {
		assert!(name.starts_with("scripts/"));
		assert!(!name.contains("secret"));
		let haystack = String::from_utf8_lossy(&bytes);
		assert!(!haystack.contains("launch codes"));
		assert!(!haystack.contains("secret-plans"));
	}
}

#[tokio::test]
async fn test_second_upload_without_changes_writes_nothing() {
	let (_root, _key, up, _down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();

	let manifest_before = up.manifest_bytes();
	let revisions = remote.revision_count();
	let stages = engine.transport().stage_count();

	let report = engine.upload().await.unwrap();
	assert!(report.is_noop());
	assert_eq!(engine.transport().stage_count(), stages);
	assert_eq!(remote.revision_count(), revisions);
	assert_eq!(up.manifest_bytes(), manifest_before);
}

#[tokio::test]
async fn test_local_deletion_removes_blob() {
	let (_root, key, up, _down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();

	fs::remove_file(up.folder.join("b.sh")).unwrap();
	let report = engine.upload().await.unwrap();
	assert_eq!(report.deleted, 1);
	assert!(remote_content(&remote, &key, "b.sh").is_none());
	assert_eq!(remote.files().len(), 1);
}

#[tokio::test]
async fn test_orphaned_blobs_are_pruned() {
	let (_root, _key, up, _down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	remote.tamper(&format!("{}/{}.enc", FOLDER_ID, "ab".repeat(32)), b"leftover".to_vec());
	remote.tamper("other-folder/readme.txt", b"not ours".to_vec());

	let report = up.engine(&remote).upload().await.unwrap();
	assert_eq!(report.added, 1);
	assert_eq!(report.pruned, 1);

	let files = remote.files();
	assert_eq!(files.len(), 2);
	assert!(files.contains_key("other-folder/readme.txt"));
}

#[tokio::test]
async fn test_push_conflict_leaves_manifest_untouched() {
	let (_root, key, up, _down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();
	let manifest_before = up.manifest_bytes();

	up.write("a.py", "changed");
	remote.reject_next_push();
	let err = engine.upload().await.unwrap_err();
	assert!(matches!(err, SyncError::Transport(TransportError::Conflict { .. })));
	assert!(err.is_retriable());
	assert_eq!(up.manifest_bytes(), manifest_before);
	assert_eq!(remote_content(&remote, &key, "a.py").unwrap(), b"x");

	// The next attempt sends the same change again
	let report = engine.upload().await.unwrap();
	assert_eq!(report.modified, 1);
	assert_eq!(remote_content(&remote, &key, "a.py").unwrap(), b"changed");
}

#[tokio::test]
async fn test_crash_between_push_and_manifest_resends_change() {
	let (_root, key, up, down) = setup();
	up.write("a.py", "v1");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();
	let manifest_before = up.manifest_bytes().unwrap();

	// Push succeeds, then the process dies before the manifest is replaced
	up.write("a.py", "v2");
	up.engine(&remote).upload().await.unwrap();
	fs::write(up.config.manifest_path(), &manifest_before).unwrap();

	let report = up.engine(&remote).upload().await.unwrap();
	assert_eq!(report.modified, 1);
	assert_eq!(remote_content(&remote, &key, "a.py").unwrap(), b"v2");

	let report = down.engine(&remote).download().await.unwrap();
	assert_eq!(report.added, 1);
	assert_eq!(down.read("a.py").unwrap(), "v2");
}

#[tokio::test]
async fn test_unreadable_scan_root_aborts_without_deleting() {
	let (_root, _key, up, _down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();

	fs::remove_dir_all(&up.folder).unwrap();
	assert!(matches!(engine.upload().await, Err(SyncError::Scan { .. })));
	assert_eq!(remote.files().len(), 1);
}

/// Set `path` to `mode` and report whether the bits are enforced for us
#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> bool {
	use std::os::unix::fs::PermissionsExt;
	fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
	if path.is_dir() {
		fs::read_dir(path).is_err()
	} else {
		fs::read(path).is_err()
	}
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directory_keeps_its_blobs() {
	let (_root, key, up, down) = setup();
	up.write("a.py", "x");
	up.write("sub/b.py", "y");
	up.write("sub/deeper/c.sh", "z");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();
	let pushes = remote.push_count();

	let sub = up.folder.join("sub");
	let enforced = restrict(&sub, 0o000);
	let result = engine.upload().await;
	restrict(&sub, 0o755);
	if !enforced {
		return;
	}

	let report = result.unwrap();
	assert!(!report.warnings.is_empty());
	assert_eq!(report.warnings[0].path, "sub");
	assert_eq!((report.added, report.modified, report.deleted, report.pruned), (0, 0, 0, 0));
	assert_eq!(remote.files().len(), 3);
	assert_eq!(remote.push_count(), pushes);
	assert_eq!(remote_content(&remote, &key, "sub/b.py").unwrap(), b"y");

	let snapshot = up.manifest().snapshot(FOLDER_ID, Direction::Upload).cloned().unwrap();
	assert!(snapshot.contains("sub/deeper/c.sh"));

	down.engine(&remote).download().await.unwrap();
	assert_eq!(down.read("sub/b.py").unwrap(), "y");
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_is_a_warning_not_a_deletion() {
	let (_root, key, up, _down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);
	engine.upload().await.unwrap();

	let locked = up.folder.join("b.sh");
	let enforced = restrict(&locked, 0o000);
	up.write("a.py", "x2");
	let result = engine.upload().await;
	restrict(&locked, 0o644);
	if !enforced {
		return;
	}

	let report = result.unwrap();
	assert_eq!(report.warnings.len(), 1);
	assert_eq!(report.warnings[0].path, "b.sh");
	assert_eq!((report.modified, report.deleted), (1, 0));
	assert_eq!(remote.files().len(), 2);
	assert_eq!(remote_content(&remote, &key, "b.sh").unwrap(), b"y");
}

#[tokio::test]
async fn test_state_dir_inside_synced_folder_is_not_uploaded() {
	let (_root, _key, mut up, _down) = setup();
	up.write("a.py", "x");
	up.config.state_dir = up.folder.join("state");
	up.config.folders = vec![FolderSpec::new(&up.folder, &["**/*"])];
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);

	for _ in 0..3 {
		assert!(matches!(engine.tick(Direction::Upload).await.unwrap(), TickOutcome::Completed(_)));
	}
	assert_eq!(remote.push_count(), 1);
	assert_eq!(remote.files().len(), 1);
	assert!(up.config.manifest_path().exists());
}

// ===================================================================
// DOWNLOAD
// ===================================================================

#[tokio::test]
async fn test_download_restores_tree() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	up.write("tools/deploy.sh", "#!/bin/sh\necho hi\n");
	up.write("notes.txt", "not selected");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();

	let mut engine = down.engine(&remote);
	let report = engine.download().await.unwrap();
	assert_eq!((report.added, report.modified, report.deleted), (2, 0, 0));
	assert!(report.failed.is_empty());
	assert_eq!(down.read("a.py").unwrap(), "x");
	assert_eq!(down.read("tools/deploy.sh").unwrap(), "#!/bin/sh\necho hi\n");
	assert!(down.read("notes.txt").is_none());

	let report = engine.download().await.unwrap();
	assert!(report.is_noop());
}

#[tokio::test]
async fn test_download_applies_modification() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut uploader = up.engine(&remote);
	let mut downloader = down.engine(&remote);
	uploader.upload().await.unwrap();
	downloader.download().await.unwrap();

	up.write("a.py", "z");
	uploader.upload().await.unwrap();
	let report = downloader.download().await.unwrap();
	assert_eq!(report.modified, 1);
	assert_eq!(down.read("a.py").unwrap(), "z");
}

#[tokio::test]
async fn test_local_edit_survives_unrelated_remote_change() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	let mut uploader = up.engine(&remote);
	let mut downloader = down.engine(&remote);
	uploader.upload().await.unwrap();
	downloader.download().await.unwrap();

	down.write("a.py", "local edit");
	up.write("b.sh", "y2");
	uploader.upload().await.unwrap();
	let report = downloader.download().await.unwrap();

	assert_eq!(report.modified, 1);
	assert_eq!(down.read("a.py").unwrap(), "local edit");
	assert_eq!(down.read("b.sh").unwrap(), "y2");
}

#[tokio::test]
async fn test_remote_deletion_removes_unmodified_file() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	up.write("lib/b.sh", "y");
	let remote = MemoryRemote::new();
	let mut uploader = up.engine(&remote);
	let mut downloader = down.engine(&remote);
	uploader.upload().await.unwrap();
	downloader.download().await.unwrap();

	fs::remove_file(up.folder.join("lib/b.sh")).unwrap();
	uploader.upload().await.unwrap();
	let report = downloader.download().await.unwrap();

	assert_eq!(report.deleted, 1);
	assert!(report.conflicts.is_empty());
	assert!(down.read("lib/b.sh").is_none());
	assert!(!down.folder.join("lib").exists());
	assert_eq!(down.read("a.py").unwrap(), "x");
}

#[tokio::test]
async fn test_remote_deletion_of_locally_modified_file_is_a_conflict() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	let mut uploader = up.engine(&remote);
	let mut downloader = down.engine(&remote);
	uploader.upload().await.unwrap();
	downloader.download().await.unwrap();

	down.write("b.sh", "edited on the downloader");
	fs::remove_file(up.folder.join("b.sh")).unwrap();
	uploader.upload().await.unwrap();

	let report = downloader.download().await.unwrap();
	assert_eq!(report.deleted, 0);
	assert_eq!(report.conflicts, vec!["b.sh".to_string()]);
	assert_eq!(down.read("b.sh").unwrap(), "edited on the downloader");

	// Reported once; the file is no longer tracked
	let report = downloader.download().await.unwrap();
	assert!(report.conflicts.is_empty());
	assert_eq!(down.read("b.sh").unwrap(), "edited on the downloader");
	let snapshot = down.manifest().snapshot(FOLDER_ID, Direction::Download).cloned().unwrap();
	assert!(!snapshot.contains("b.sh"));
}

#[tokio::test]
async fn test_corrupted_blob_does_not_abort_batch() {
	let (_root, key, up, down) = setup();
	up.write("a.py", "1");
	up.write("b.py", "2");
	up.write("c.py", "3");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();

	let namer = BlobNamer::new(&EncryptionKey::from_encoded(&key).unwrap());
	let name = namer.blob_name(FOLDER_ID, "b.py");
	let mut wire = remote.files().get(&name).cloned().unwrap();
	let last = wire.len() - 1;
	wire[last] ^= 0x01;
	remote.tamper(&name, wire);

	let report = down.engine(&remote).download().await.unwrap();
	assert_eq!(report.added, 2);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(down.read("a.py").unwrap(), "1");
	assert_eq!(down.read("c.py").unwrap(), "3");
	assert!(down.read("b.py").is_none());

	let snapshot = down.manifest().snapshot(FOLDER_ID, Direction::Download).cloned().unwrap();
	assert_eq!(snapshot.len(), 2);
}

#[tokio::test]
async fn test_wrong_key_writes_nothing() {
	let (root, _key, up, _down) = setup();
	up.write("a.py", "x");
	up.write("b.sh", "y");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();

	let stranger = Machine::new(root.path(), "stranger", &EncryptionKey::generate().encode());
	let report = stranger.engine(&remote).download().await.unwrap();
	assert_eq!(report.failed.len(), 2);
	assert_eq!(report.added, 0);
	assert!(report.failed.iter().all(|f| f.reason.contains("wrong key")));
	assert_eq!(fs::read_dir(&stranger.folder).unwrap().count(), 0);
}

#[tokio::test]
async fn test_blob_claiming_escaping_path_is_rejected() {
	let (root, key, _up, down) = setup();
	let remote = MemoryRemote::new();

	let key = EncryptionKey::from_encoded(&key).unwrap();
	let blob = Cipher::new(&key).seal(FOLDER_ID, "../evil.py", b"boom").unwrap();
	let name = BlobNamer::new(&key).blob_name(FOLDER_ID, "../evil.py");
	remote.tamper(&name, blob.to_wire());

	let report = down.engine(&remote).download().await.unwrap();
	assert_eq!(report.failed.len(), 1);
	assert!(!root.path().join("down").join("evil.py").exists());
}

#[tokio::test]
async fn test_pull_failure_is_retriable_and_changes_nothing() {
	let (_root, _key, up, down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	up.engine(&remote).upload().await.unwrap();

	let mut downloader = down.engine(&remote);
	remote.fail_next_pull();
	let err = downloader.download().await.unwrap_err();
	assert!(err.is_retriable());
	assert!(down.read("a.py").is_none());
	assert!(down.manifest_bytes().is_none());

	downloader.download().await.unwrap();
	assert_eq!(down.read("a.py").unwrap(), "x");
}

// ===================================================================
// LOCKING
// ===================================================================

#[tokio::test]
async fn test_tick_is_skipped_while_lock_is_held() {
	let (_root, _key, up, _down) = setup();
	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut engine = up.engine(&remote);

	let lock = ManifestLock::acquire(&up.config.lock_path()).unwrap();
	assert_eq!(engine.tick(Direction::Upload).await.unwrap(), TickOutcome::Skipped);
	assert_eq!(remote.push_count(), 0);
	drop(lock);

	match engine.tick(Direction::Upload).await.unwrap() {
		TickOutcome::Completed(report) => assert_eq!(report.added, 1),
		TickOutcome::Skipped => panic!("lock was released"),
	}
}

#[tokio::test]
async fn test_uploader_and_downloader_can_share_a_state_dir() {
	let root = TempDir::new().unwrap();
	let key = EncryptionKey::generate().encode();
	let up = Machine::new(root.path(), "up", &key);
	let mut down = Machine::new(root.path(), "down", &key);
	down.config.state_dir = up.config.state_dir.clone();

	up.write("a.py", "x");
	let remote = MemoryRemote::new();
	let mut uploader = up.engine(&remote);
	let mut downloader = down.engine(&remote);
	uploader.upload().await.unwrap();
	downloader.download().await.unwrap();

	up.write("a.py", "y");
	uploader.upload().await.unwrap();

	let manifest = up.manifest();
	assert!(manifest.snapshot(FOLDER_ID, Direction::Upload).is_some());
	assert!(manifest.snapshot(FOLDER_ID, Direction::Download).is_some());
}
