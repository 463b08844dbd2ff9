//! Version-controlled remote store used as a byte replication channel.
//!
//! The engine depends only on the [`Transport`] trait. Two implementations
//! ship with the crate: [`GitTransport`] shells out to the system `git`, and
//! [`MemoryTransport`] keeps everything in process for tests.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

pub mod git;
pub mod memory;

pub use git::GitTransport;
pub use memory::{MemoryRemote, MemoryTransport};

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Identifier of a committed transport state
pub type RevisionId = String;

/// Snapshot of the transport's own state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
	/// Current local revision, `None` before the first commit
	pub head: Option<RevisionId>,

	/// Entries written or removed but not yet committed
	pub pending: usize,
}

/// Capability interface over the replicated store.
///
/// Blob names are `/`-separated relative paths inside the store.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Write (`Some`) or remove (`None`) a blob in the working state
	async fn stage(&mut self, name: &str, bytes: Option<&[u8]>) -> TransportResult<()>;

	/// Commit staged changes; `None` when there was nothing to commit
	async fn commit(&mut self, message: &str) -> TransportResult<Option<RevisionId>>;

	/// Publish local commits. Fails with `Conflict` when the remote moved on.
	async fn push(&mut self) -> TransportResult<()>;

	/// Fast-forward to the remote state, returning the blob names that changed
	async fn pull(&mut self) -> TransportResult<Vec<String>>;

	/// All blob names currently present in the working state
	async fn list_blobs(&self) -> TransportResult<Vec<String>>;

	async fn read_blob(&self, name: &str) -> TransportResult<Vec<u8>>;

	async fn status(&self) -> TransportResult<TransportStatus>;
}

// vim: ts=4
