//! # cryptdrive - encrypted file sync over a git remote
//!
//! cryptdrive replicates selected files from an uploader machine to a
//! downloader machine through an untrusted git repository. File contents and
//! names are encrypted with a shared symmetric key before they leave the
//! uploader; the repository only ever sees opaque blobs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cryptdrive::{Config, Direction, GitTransport, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.json".as_ref())?;
//!     let transport =
//!         GitTransport::open(&config.repo_url, &config.local_mirror_path, &config.branch).await?;
//!     let mut engine = SyncEngine::new(config, transport)?;
//!     let report = engine.upload().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod diff;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod naming;
pub mod scan;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod util;
pub mod validation;

// Re-export commonly used types and functions
pub use config::{Config, FolderSpec};
pub use crypto::{generate_key, Cipher, EncryptionKey};
pub use engine::{FolderChanges, SyncEngine, TickOutcome};
pub use error::{CipherError, ManifestError, SyncError, TransportError};
pub use scan::FileScanner;
pub use scheduler::Scheduler;
pub use transport::{GitTransport, MemoryRemote, MemoryTransport, Transport};
pub use types::{Diff, Direction, FileRecord, Snapshot, SyncPhase, SyncReport};

// vim: ts=4
