//! Configuration validation

use globset::Glob;
use std::collections::BTreeSet;

use super::{is_folder_id_safe, ValidationError, Validator};
use crate::config::Config;

/// Validate the polling period in seconds
pub fn validate_poll_interval(secs: u64) -> Result<(), ValidationError> {
	if secs == 0 {
		return Err(ValidationError::ConfigError(
			"pollIntervalSeconds must be greater than 0".to_string(),
		));
	}
	Ok(())
}

/// Validate one glob pattern
pub fn validate_pattern(pattern: &str) -> Result<(), ValidationError> {
	if pattern.trim().is_empty() {
		return Err(ValidationError::ConfigError("Empty file pattern".to_string()));
	}
	Glob::new(pattern)
		.map(|_| ())
		.map_err(|e| ValidationError::ConfigError(format!("Invalid pattern {}: {}", pattern, e)))
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		if self.repo_url.trim().is_empty() {
			return Err(ValidationError::ConfigError("repoURL is empty".to_string()));
		}
		if self.local_mirror_path.as_os_str().is_empty() {
			return Err(ValidationError::ConfigError("localMirrorPath is empty".to_string()));
		}
		validate_poll_interval(self.poll_interval_seconds)?;
		if self.git_timeout_seconds == 0 {
			return Err(ValidationError::ConfigError("gitTimeoutSeconds must be > 0".to_string()));
		}

		self.key().map_err(|e| ValidationError::ConfigError(format!("encryptionKey: {}", e)))?;

		if self.folders.is_empty() {
			return Err(ValidationError::ConfigError("No folders configured".to_string()));
		}

		let mut ids = BTreeSet::new();
		for folder in &self.folders {
			let id = folder.folder_id();
			if !is_folder_id_safe(&id) {
				return Err(ValidationError::ConfigError(format!(
					"Cannot use {:?} as folder id for {}; set an explicit \"id\"",
					id,
					folder.path.display()
				)));
			}
			if !ids.insert(id.clone()) {
				return Err(ValidationError::ConfigError(format!(
					"Duplicate folder id {:?}; set an explicit \"id\" on one of the folders",
					id
				)));
			}
			if folder.file_patterns.is_empty() {
				return Err(ValidationError::ConfigError(format!(
					"Folder {} has no file patterns",
					folder.path.display()
				)));
			}
			for pattern in &folder.file_patterns {
				validate_pattern(pattern)?;
			}
		}
		Ok(())
	}
}


// vim: ts=4
