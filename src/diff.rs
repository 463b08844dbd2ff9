//! Change detection between two snapshots.
//!
//! Classification relies on content fingerprints only; size and mtime never
//! decide whether a file changed.

use crate::types::{Diff, Snapshot};

/// Compare `previous` (None on first run) against `current`
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Diff {
	let mut result = Diff::default();

	for (path, record) in &current.files {
		match previous.and_then(|p| p.get(path)) {
			None => {
				result.added.insert(path.clone());
			}
			Some(prev) if prev.fingerprint != record.fingerprint => {
				result.modified.insert(path.clone());
			}
			Some(_) => {}
		}
	}

	if let Some(previous) = previous {
		for path in previous.paths() {
			if !current.contains(path) {
				result.deleted.insert(path.clone());
			}
		}
	}

	result
}


// vim: ts=4
