//! Error types for cryptdrive operations

use std::error::Error;
use std::fmt;
use std::io;
use std::time::Duration;

/// Main error type for sync operations
#[derive(Debug)]
pub enum SyncError {
	/// Invalid configuration
	Config { message: String },

	/// I/O error
	Io(io::Error),

	/// Encryption or decryption error (nested)
	Cipher(CipherError),

	/// Transport error (nested)
	Transport(TransportError),

	/// Manifest error (nested)
	Manifest(ManifestError),

	/// Scanning a folder root failed as a whole
	Scan { root: String, message: String },

	/// Relative path is absolute or escapes its folder root
	InvalidPath { path: String },

	/// Generic error message
	Other { message: String },
}

impl SyncError {
	/// Whether the scheduler may simply try again on the next tick
	pub fn is_retriable(&self) -> bool {
		matches!(self, SyncError::Transport(_))
	}

	/// Whether the engine must refuse to run until a human intervenes
	pub fn is_fatal(&self) -> bool {
		matches!(self, SyncError::Manifest(ManifestError::Corrupted { .. }))
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Config { message } => write!(f, "Invalid configuration: {}", message),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Cipher(e) => write!(f, "Cipher error: {}", e),
			SyncError::Transport(e) => write!(f, "Transport error: {}", e),
			SyncError::Manifest(e) => write!(f, "Manifest error: {}", e),
			SyncError::Scan { root, message } => {
				write!(f, "Failed to scan {}: {}", root, message)
			}
			SyncError::InvalidPath { path } => write!(f, "Invalid relative path: {}", path),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<CipherError> for SyncError {
	fn from(e: CipherError) -> Self {
		SyncError::Cipher(e)
	}
}

impl From<TransportError> for SyncError {
	fn from(e: TransportError) -> Self {
		SyncError::Transport(e)
	}
}

impl From<ManifestError> for SyncError {
	fn from(e: ManifestError) -> Self {
		SyncError::Manifest(e)
	}
}

/// Encryption-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
	/// Key material could not be decoded or has the wrong length
	InvalidKey { message: String },

	/// The AEAD refused to encrypt (should not happen with valid keys)
	EncryptionFailed { message: String },

	/// Wrong key, or ciphertext/nonce/tag tampered with
	DecryptionFailed,

	/// Blob bytes do not follow the expected layout
	MalformedBlob { message: String },
}

impl fmt::Display for CipherError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CipherError::InvalidKey { message } => write!(f, "Invalid key: {}", message),
			CipherError::EncryptionFailed { message } => {
				write!(f, "Encryption failed: {}", message)
			}
			CipherError::DecryptionFailed => {
				write!(f, "Decryption failed: wrong key or corrupted ciphertext")
			}
			CipherError::MalformedBlob { message } => write!(f, "Malformed blob: {}", message),
		}
	}
}

impl Error for CipherError {}

/// Transport-specific errors
#[derive(Debug)]
pub enum TransportError {
	/// Push rejected because the remote moved on (another uploader raced)
	Conflict { message: String },

	/// A transport command exited unsuccessfully
	CommandFailed { cmd: String, stderr: String },

	/// A transport command could not be started
	SpawnFailed { cmd: String, source: io::Error },

	/// A transport command did not finish in time and was killed
	Timeout { cmd: String, after: Duration },

	/// Blob requested from the working tree does not exist
	NotFound { name: String },

	/// I/O error in the transport working tree
	Io(io::Error),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::Conflict { message } => {
				write!(f, "Remote has diverged, push rejected: {}", message)
			}
			TransportError::CommandFailed { cmd, stderr } => {
				write!(f, "'{}' failed: {}", cmd, stderr.trim())
			}
			TransportError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			TransportError::Timeout { cmd, after } => {
				write!(f, "'{}' timed out after {}s", cmd, after.as_secs())
			}
			TransportError::NotFound { name } => write!(f, "Blob not found: {}", name),
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

/// Manifest persistence errors
#[derive(Debug)]
pub enum ManifestError {
	/// Failed to read the manifest file
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to write the manifest file
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// Manifest lock is held by a live process
	LockFailed { message: String },

	/// Manifest file exists but cannot be trusted
	Corrupted { message: String },

	/// Manifest written by a newer format
	UnsupportedVersion { found: u32, supported: u32 },
}

impl fmt::Display for ManifestError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ManifestError::LoadFailed { source } => {
				write!(f, "Failed to load manifest: {}", source)
			}
			ManifestError::SaveFailed { source } => {
				write!(f, "Failed to save manifest: {}", source)
			}
			ManifestError::LockFailed { message } => write!(f, "Lock failed: {}", message),
			ManifestError::Corrupted { message } => {
				write!(f, "Manifest corrupted, refusing to continue: {}", message)
			}
			ManifestError::UnsupportedVersion { found, supported } => {
				write!(f, "Manifest version {} is newer than supported {}", found, supported)
			}
		}
	}
}

impl Error for ManifestError {}


// vim: ts=4
