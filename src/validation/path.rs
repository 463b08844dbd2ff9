//! Path validation functions

use std::path::{Component, Path};

use super::ValidationError;

/// Check if a path is safe (no parent directory references)
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Check if path has no absolute components
pub fn is_path_relative(path: &Path) -> bool {
	!path.is_absolute() && !path.has_root()
}

/// Validate a relative file path recovered from a decrypted blob.
///
/// The path must be non-empty, relative, `/`-separated and must not climb out
/// of the folder root.
pub fn validate_relative_path(path: &str) -> Result<(), ValidationError> {
	if path.is_empty() {
		return Err(ValidationError::PathError("Path is empty".to_string()));
	}
	if path.contains('\\') || path.contains('\0') {
		return Err(ValidationError::PathError(format!(
			"Path contains a forbidden character: {:?}",
			path
		)));
	}

	let p = Path::new(path);
	if !is_path_relative(p) {
		return Err(ValidationError::PathError(format!(
			"Path must be relative, got absolute path: {:?}",
			path
		)));
	}
	if !is_path_safe(p) {
		return Err(ValidationError::PathError(
			"Path contains parent directory reference (..)".to_string(),
		));
	}
	if !p.components().any(|c| matches!(c, Component::Normal(_))) {
		return Err(ValidationError::PathError(format!("Path names no file: {:?}", path)));
	}
	Ok(())
}

/// A folder id becomes a single directory in the transport
pub fn is_folder_id_safe(id: &str) -> bool {
	!id.is_empty()
		&& id != "."
		&& id != ".."
		&& !id.starts_with('.')
		&& !id.contains('/')
		&& !id.contains('\\')
		&& !id.contains('\0')
}


// vim: ts=4
