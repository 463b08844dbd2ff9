//! In-process transport.
//!
//! A [`MemoryRemote`] plays the shared remote repository; every
//! [`MemoryTransport`] connected to it is one machine's clone. Pushes are
//! compare-and-swap on the remote head, exactly like a non-forced git push,
//! and failures can be injected to exercise the engine's error paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RevisionId, Transport, TransportResult, TransportStatus};
use crate::error::TransportError;

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct RemoteState {
	revisions: Vec<(RevisionId, Tree)>,
	pushes: usize,
	reject_pushes: usize,
	fail_pushes: usize,
	fail_pulls: usize,
}

impl RemoteState {
	fn head(&self) -> Option<&(RevisionId, Tree)> {
		self.revisions.last()
	}
}

/// Shared fake remote
#[derive(Clone, Default)]
pub struct MemoryRemote {
	inner: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
	pub fn new() -> Self {
		MemoryRemote::default()
	}

	fn state(&self) -> MutexGuard<'_, RemoteState> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// New clone of the remote at its current head
	pub fn connect(&self) -> MemoryTransport {
		let (base, tree) = match self.state().head() {
			Some((rev, tree)) => (Some(rev.clone()), tree.clone()),
			None => (None, Tree::new()),
		};
		MemoryTransport {
			remote: self.clone(),
			tree,
			pending: BTreeSet::new(),
			base: base.clone(),
			head: base,
			unpushed: false,
			stage_calls: 0,
		}
	}

	pub fn head(&self) -> Option<RevisionId> {
		self.state().head().map(|(rev, _)| rev.clone())
	}

	/// Blob names and contents at the remote head
	pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
		self.state().head().map(|(_, tree)| tree.clone()).unwrap_or_default()
	}

	/// Number of successful pushes so far
	pub fn push_count(&self) -> usize {
		self.state().pushes
	}

	pub fn revision_count(&self) -> usize {
		self.state().revisions.len()
	}

	/// Reject the next push as if another machine had pushed first
	pub fn reject_next_push(&self) {
		self.state().reject_pushes += 1;
	}

	/// Fail the next push with a network-style error
	pub fn fail_next_push(&self) {
		self.state().fail_pushes += 1;
	}

	/// Fail the next pull with a network-style error
	pub fn fail_next_pull(&self) {
		self.state().fail_pulls += 1;
	}

	/// Overwrite one blob at the remote head, bypassing any clone
	pub fn tamper(&self, name: &str, bytes: Vec<u8>) {
		let mut state = self.state();
		let mut tree = state.head().map(|(_, t)| t.clone()).unwrap_or_default();
		tree.insert(name.to_string(), bytes);
		let rev = new_revision_id();
		state.revisions.push((rev, tree));
	}
}

fn new_revision_id() -> RevisionId {
	uuid::Uuid::new_v4().simple().to_string()
}

/// One machine's view of a [`MemoryRemote`]
pub struct MemoryTransport {
	remote: MemoryRemote,
	tree: Tree,
	pending: BTreeSet<String>,
	/// Remote revision our tree was last synchronized with
	base: Option<RevisionId>,
	head: Option<RevisionId>,
	unpushed: bool,
	stage_calls: usize,
}

impl MemoryTransport {
	/// Number of `stage` calls made through this clone
	pub fn stage_count(&self) -> usize {
		self.stage_calls
	}

	pub fn remote(&self) -> &MemoryRemote {
		&self.remote
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	async fn stage(&mut self, name: &str, bytes: Option<&[u8]>) -> TransportResult<()> {
		self.stage_calls += 1;
		match bytes {
			Some(b) => {
				self.tree.insert(name.to_string(), b.to_vec());
			}
			None => {
				self.tree.remove(name);
			}
		}
		self.pending.insert(name.to_string());
		Ok(())
	}

	async fn commit(&mut self, _message: &str) -> TransportResult<Option<RevisionId>> {
		if self.pending.is_empty() {
			return Ok(None);
		}
		self.pending.clear();
		let rev = new_revision_id();
		self.head = Some(rev.clone());
		self.unpushed = true;
		Ok(Some(rev))
	}

	async fn push(&mut self) -> TransportResult<()> {
		if !self.unpushed {
			return Ok(());
		}
		let mut state = self.remote.state();
		if state.fail_pushes > 0 {
			state.fail_pushes -= 1;
			return Err(TransportError::CommandFailed {
				cmd: "push".to_string(),
				stderr: "connection reset by peer".to_string(),
			});
		}

		let remote_head = state.head().map(|(rev, _)| rev.clone());
		if state.reject_pushes > 0 || remote_head != self.base {
			state.reject_pushes = state.reject_pushes.saturating_sub(1);
			return Err(TransportError::Conflict {
				message: "remote contains work that is not present locally".to_string(),
			});
		}

		let rev = self.head.clone().unwrap_or_else(new_revision_id);
		state.revisions.push((rev.clone(), self.tree.clone()));
		state.pushes += 1;
		self.base = Some(rev);
		self.unpushed = false;
		Ok(())
	}

	async fn pull(&mut self) -> TransportResult<Vec<String>> {
		let mut state = self.remote.state();
		if state.fail_pulls > 0 {
			state.fail_pulls -= 1;
			return Err(TransportError::CommandFailed {
				cmd: "pull".to_string(),
				stderr: "could not resolve host".to_string(),
			});
		}

		let (rev, remote_tree) = match state.head() {
			Some((rev, tree)) => (rev.clone(), tree.clone()),
			None => return Ok(Vec::new()),
		};
		if Some(&rev) == self.base.as_ref() {
			return Ok(Vec::new());
		}
		if self.unpushed || !self.pending.is_empty() {
			return Err(TransportError::Conflict {
				message: "local and remote histories have diverged".to_string(),
			});
		}

		let changed = self
			.tree
			.keys()
			.chain(remote_tree.keys())
			.filter(|name| self.tree.get(*name) != remote_tree.get(*name))
			.cloned()
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect();

		self.tree = remote_tree;
		self.base = Some(rev.clone());
		self.head = Some(rev);
		Ok(changed)
	}

	async fn list_blobs(&self) -> TransportResult<Vec<String>> {
		Ok(self.tree.keys().cloned().collect())
	}

	async fn read_blob(&self, name: &str) -> TransportResult<Vec<u8>> {
		self.tree
			.get(name)
			.cloned()
			.ok_or_else(|| TransportError::NotFound { name: name.to_string() })
	}

	async fn status(&self) -> TransportResult<TransportStatus> {
		Ok(TransportStatus { head: self.head.clone(), pending: self.pending.len() })
	}
}


// vim: ts=4
