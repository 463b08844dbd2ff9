//! Tests for the command line entry point

use std::process::Command;
use tempfile::TempDir;

use cryptdrive::crypto::EncryptionKey;

fn cryptdrive() -> Command {
	Command::new(env!("CARGO_BIN_EXE_cryptdrive"))
}

#[test]
fn test_keygen_prints_a_usable_key() {
	let output = cryptdrive().arg("keygen").output().unwrap();
	assert!(output.status.success());

	let key = String::from_utf8(output.stdout).unwrap();
	let key = key.trim();
	assert_eq!(key.len(), 44);
	assert!(EncryptionKey::from_encoded(key).is_ok());

	let other = cryptdrive().arg("keygen").output().unwrap();
	assert_ne!(String::from_utf8(other.stdout).unwrap().trim(), key);
}

#[test]
fn test_missing_config_fails() {
	let dir = TempDir::new().unwrap();
	let status = cryptdrive()
		.args(["upload", "--config"])
		.arg(dir.path().join("missing.json"))
		.status()
		.unwrap();
	assert!(!status.success());
}

#[test]
fn test_subcommand_is_required() {
	let status = cryptdrive().output().unwrap().status;
	assert!(!status.success());
}
