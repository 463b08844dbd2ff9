//! Configuration for cryptdrive
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults
//! 2. Config file (`config.json`, `.json5` or `.toml`)
//! 3. Environment variables (`CRYPTDRIVE_*` prefix)
//!
//! A loaded [`Config`] is an immutable value handed to the engine; nothing
//! in the crate reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::EncryptionKey;
use crate::error::{CipherError, SyncError};
use crate::validation::Validator;

/// Environment variable overriding `encryptionKey`
pub const ENV_KEY: &str = "CRYPTDRIVE_KEY";

/// Environment variable overriding `stateDir`
pub const ENV_STATE_DIR: &str = "CRYPTDRIVE_STATE_DIR";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LOCK_FILE: &str = "manifest.lock";

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Configuration for one cryptdrive machine (uploader or downloader)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// TRANSPORT
	// ========================================================================
	/// Remote repository the mirror is cloned from
	#[serde(rename = "repoURL", alias = "repoUrl", alias = "repo_drive")]
	pub repo_url: String,

	/// Working tree of the transport repository
	#[serde(alias = "path_drive")]
	pub local_mirror_path: PathBuf,

	/// Branch pushed to and pulled from
	#[serde(default = "default_branch")]
	pub branch: String,

	/// Seconds a single git command may run before it is killed
	#[serde(default = "default_git_timeout")]
	pub git_timeout_seconds: u64,

	// ========================================================================
	// ENCRYPTION
	// ========================================================================
	/// URL-safe base64 key as printed by `cryptdrive keygen`
	#[serde(alias = "encode_key")]
	pub encryption_key: String,

	// ========================================================================
	// SCHEDULING
	// ========================================================================
	/// Seconds between two scheduler ticks
	#[serde(default = "default_poll_interval", alias = "update_interval")]
	pub poll_interval_seconds: u64,

	/// Seconds to wait after a failed tick before resuming the schedule
	#[serde(default = "default_retry_delay")]
	pub retry_delay_seconds: u64,

	// ========================================================================
	// SCOPE
	// ========================================================================
	pub folders: Vec<FolderSpec>,

	/// Reuse the previous fingerprint when size and mtime are unchanged
	/// only if this is false
	#[serde(default = "default_true")]
	pub always_checksum: bool,

	// ========================================================================
	// STATE
	// ========================================================================
	/// Directory holding the manifest and its lock
	#[serde(default = "default_state_dir")]
	pub state_dir: PathBuf,
}

/// One synchronized folder and the patterns selecting its files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSpec {
	pub path: PathBuf,

	/// Glob patterns relative to `path`; `**` matches across directories
	#[serde(alias = "file_patterns")]
	pub file_patterns: Vec<String>,

	/// Transport namespace; defaults to the last component of `path`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}

impl FolderSpec {
	pub fn new(path: impl Into<PathBuf>, patterns: &[&str]) -> Self {
		FolderSpec {
			path: path.into(),
			file_patterns: patterns.iter().map(|p| p.to_string()).collect(),
			id: None,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	/// Identifier qualifying this folder's blobs in the transport.
	///
	/// Both machines must derive the same id, which is why the default is the
	/// folder's name rather than its absolute path.
	pub fn folder_id(&self) -> String {
		if let Some(id) = &self.id {
			return id.clone();
		}
		self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
	}
}

fn default_branch() -> String {
	"main".to_string()
}

fn default_poll_interval() -> u64 {
	60
}

fn default_retry_delay() -> u64 {
	60
}

fn default_git_timeout() -> u64 {
	300
}

fn default_true() -> bool {
	true
}

fn default_state_dir() -> PathBuf {
	std::env::var("HOME")
		.ok()
		.map(|h| PathBuf::from(h).join(".cryptdrive"))
		.unwrap_or_else(|| PathBuf::from(".cryptdrive"))
}

impl Config {
	/// Minimal configuration with defaults for every optional field
	pub fn new(
		repo_url: impl Into<String>,
		local_mirror_path: impl Into<PathBuf>,
		encryption_key: impl Into<String>,
		folders: Vec<FolderSpec>,
	) -> Self {
		Config {
			repo_url: repo_url.into(),
			local_mirror_path: local_mirror_path.into(),
			branch: default_branch(),
			git_timeout_seconds: default_git_timeout(),
			encryption_key: encryption_key.into(),
			poll_interval_seconds: default_poll_interval(),
			retry_delay_seconds: default_retry_delay(),
			folders,
			always_checksum: true,
			state_dir: default_state_dir(),
		}
	}

	/// Load, apply environment overrides and validate
	pub fn load(path: &Path) -> Result<Self, SyncError> {
		let contents = fs::read_to_string(path).map_err(|e| SyncError::Config {
			message: format!("cannot read {}: {}", path.display(), e),
		})?;

		let format = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
		let mut config = Self::parse(&contents, format)?;
		config.apply_env_overrides();
		config.validate().map_err(|e| SyncError::Config { message: e.to_string() })?;
		Ok(config)
	}

	/// Parse config text in the given format (`json`, `json5` or `toml`)
	pub fn parse(contents: &str, format: &str) -> Result<Self, SyncError> {
		let parsed = match format {
			"json" => serde_json::from_str(contents).map_err(|e| e.to_string()),
			"json5" => json5::from_str(contents).map_err(|e| e.to_string()),
			"toml" => toml::from_str(contents).map_err(|e| e.to_string()),
			other => Err(format!("unsupported config format '{}'", other)),
		};
		parsed.map_err(|message| SyncError::Config { message })
	}

	fn apply_env_overrides(&mut self) {
		if let Ok(key) = std::env::var(ENV_KEY) {
			if !key.trim().is_empty() {
				self.encryption_key = key;
			}
		}
		if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
			if !dir.trim().is_empty() {
				self.state_dir = PathBuf::from(dir);
			}
		}
	}

	pub fn key(&self) -> Result<EncryptionKey, CipherError> {
		EncryptionKey::from_encoded(&self.encryption_key)
	}

	pub fn manifest_path(&self) -> PathBuf {
		self.state_dir.join(MANIFEST_FILE)
	}

	pub fn lock_path(&self) -> PathBuf {
		self.state_dir.join(LOCK_FILE)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_seconds)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_secs(self.retry_delay_seconds)
	}

	pub fn git_timeout(&self) -> Duration {
		Duration::from_secs(self.git_timeout_seconds)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::generate_key;

	#[test]
	fn test_parse_json_with_defaults() {
		let json = r#"{
			"repoURL": "git@example.com:me/drive.git",
			"localMirrorPath": "/tmp/drive",
			"encryptionKey": "abc",
			"folders": [{ "path": "/home/me/scripts", "filePatterns": ["*.py", "**/*.sh"] }]
		}"#;
		let config = Config::parse(json, "json").unwrap();
		assert_eq!(config.repo_url, "git@example.com:me/drive.git");
		assert_eq!(config.poll_interval_seconds, 60);
		assert_eq!(config.branch, "main");
		assert_eq!(config.git_timeout(), Duration::from_secs(300));
		assert!(config.always_checksum);
		assert_eq!(config.folders[0].file_patterns, vec!["*.py", "**/*.sh"]);
		assert_eq!(config.folders[0].folder_id(), "scripts");
	}

	#[test]
	fn test_parse_legacy_field_names() {
		let json = r#"{
			"repo_drive": "https://example.com/drive.git",
			"path_drive": "drive",
			"encode_key": "abc",
			"update_interval": 5,
			"folders": [{ "path": "notes", "file_patterns": ["*.md"] }]
		}"#;
		let config = Config::parse(json, "json").unwrap();
		assert_eq!(config.repo_url, "https://example.com/drive.git");
		assert_eq!(config.local_mirror_path, PathBuf::from("drive"));
		assert_eq!(config.poll_interval_seconds, 5);
		assert_eq!(config.folders[0].file_patterns, vec!["*.md"]);
	}

	#[test]
	fn test_parse_toml() {
		let toml = r#"
			repoURL = "file:///srv/drive.git"
			localMirrorPath = "/var/lib/drive"
			encryptionKey = "abc"
			pollIntervalSeconds = 30

			[[folders]]
			path = "/etc/app"
			filePatterns = ["*.conf"]
			id = "app-config"
		"#;
		let config = Config::parse(toml, "toml").unwrap();
		assert_eq!(config.poll_interval_seconds, 30);
		assert_eq!(config.folders[0].folder_id(), "app-config");
	}

	#[test]
	fn test_parse_json5_allows_comments() {
		let json5 = r#"{
			// transport
			repoURL: "file:///srv/drive.git",
			localMirrorPath: "drive",
			encryptionKey: "abc",
			folders: [{ path: "a", filePatterns: ["*"] }],
		}"#;
		assert!(Config::parse(json5, "json5").is_ok());
	}

	#[test]
	fn test_parse_unknown_format() {
		let err = Config::parse("", "yaml").unwrap_err();
		assert!(err.to_string().contains("unsupported config format"));
	}

	#[test]
	fn test_load_validates() {
		let tmp = tempfile::TempDir::new().unwrap();
		let path = tmp.path().join("config.json");
		fs::write(
			&path,
			r#"{"repoURL": "x", "localMirrorPath": "m", "encryptionKey": "abc", "folders": []}"#,
		)
		.unwrap();
		assert!(matches!(Config::load(&path), Err(SyncError::Config { .. })));
	}

	#[test]
	fn test_key_and_state_paths() {
		let key = generate_key();
		let mut config =
			Config::new("x", "/m", key.encode(), vec![FolderSpec::new("/data/docs", &["*"])]);
		config.state_dir = PathBuf::from("/state");
		assert_eq!(config.key().unwrap(), key);
		assert_eq!(config.manifest_path(), PathBuf::from("/state/manifest.json"));
		assert_eq!(config.lock_path(), PathBuf::from("/state/manifest.lock"));
	}

	#[test]
	fn test_folder_id_falls_back_to_empty() {
		assert_eq!(FolderSpec::new("/", &["*"]).folder_id(), "");
		assert_eq!(FolderSpec::new("/", &["*"]).with_id("root").folder_id(), "root");
	}
}

// vim: ts=4
