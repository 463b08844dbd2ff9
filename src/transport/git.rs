//! Transport over a git repository, driven through the system `git` binary.
//!
//! The local mirror is an ordinary clone. Blobs are plain files in its
//! working tree; `commit` stages everything with `git add --all`, `push`
//! never forces and `pull` only fast-forwards.

use async_trait::async_trait;
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use super::{RevisionId, Transport, TransportResult, TransportStatus};
use crate::error::TransportError;
use crate::logging::*;
use crate::scan::relative_path;
use crate::validation::validate_relative_path;

/// Markers git prints when a push is refused because the remote moved on
const REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first", "stale info"];

/// Longest a single git command may run unless configured otherwise
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GitTransport {
	root: PathBuf,
	branch: String,
	env: Vec<(String, String)>,
	timeout: Duration,
	pending: BTreeSet<String>,
}

impl GitTransport {
	/// Open the mirror at `root`, cloning `remote_url` into it when missing
	pub async fn open(
		remote_url: &str,
		root: impl Into<PathBuf>,
		branch: &str,
	) -> TransportResult<Self> {
		Self::open_with_timeout(remote_url, root, branch, DEFAULT_COMMAND_TIMEOUT).await
	}

	/// Like [`GitTransport::open`], killing any git command that runs longer
	/// than `timeout`
	pub async fn open_with_timeout(
		remote_url: &str,
		root: impl Into<PathBuf>,
		branch: &str,
		timeout: Duration,
	) -> TransportResult<Self> {
		let transport = GitTransport {
			root: root.into(),
			branch: branch.to_string(),
			env: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
			timeout,
			pending: BTreeSet::new(),
		};

		if !transport.root.join(".git").exists() {
			transport.clone_from(remote_url).await?;
		}
		if transport.head().await?.is_none() {
			// Empty clone: make the first commit land on the configured branch
			let refname = format!("refs/heads/{}", transport.branch);
			transport.git(&["symbolic-ref", "HEAD", &refname]).await?;
		}
		Ok(transport)
	}

	/// Commit as `name <email>` instead of the user's git configuration
	pub fn with_identity(mut self, name: &str, email: &str) -> Self {
		for var in ["GIT_AUTHOR_NAME", "GIT_COMMITTER_NAME"] {
			self.env.push((var.to_string(), name.to_string()));
		}
		for var in ["GIT_AUTHOR_EMAIL", "GIT_COMMITTER_EMAIL"] {
			self.env.push((var.to_string(), email.to_string()));
		}
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	async fn clone_from(&self, remote_url: &str) -> TransportResult<()> {
		if let Some(parent) = self.root.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}
		info!("Cloning {} into {}", remote_url, self.root.display());

		let mut cmd = Command::new("git");
		cmd.arg("clone").arg("--quiet").arg(remote_url).arg(&self.root);
		let output = self.output(cmd, "git clone".to_string()).await?;

		if !output.status.success() {
			return Err(TransportError::CommandFailed {
				cmd: "git clone".to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		Ok(())
	}

	/// Run git inside the mirror and return the raw output
	async fn run(&self, args: &[&str]) -> TransportResult<Output> {
		let label = format!("git {}", args.join(" "));
		debug!("{}", label);
		let mut cmd = Command::new("git");
		cmd.arg("-C").arg(&self.root).args(args);
		self.output(cmd, label).await
	}

	/// Collect the output of `cmd`, killing it once the timeout expires
	async fn output(&self, mut cmd: Command, label: String) -> TransportResult<Output> {
		cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.stdin(Stdio::null())
			.kill_on_drop(true);
		match tokio::time::timeout(self.timeout, cmd.output()).await {
			Ok(Ok(output)) => Ok(output),
			Ok(Err(e)) => Err(TransportError::SpawnFailed { cmd: label, source: e }),
			Err(_) => {
				warn!("{} did not finish within {}s, killed", label, self.timeout.as_secs());
				Err(TransportError::Timeout { cmd: label, after: self.timeout })
			}
		}
	}

	/// Run git and return stdout, failing on a non-zero exit
	async fn git(&self, args: &[&str]) -> TransportResult<String> {
		let output = self.run(args).await?;
		if !output.status.success() {
			return Err(command_failed(args, &output));
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}

	/// Run git and only report whether it exited successfully
	async fn git_ok(&self, args: &[&str]) -> TransportResult<bool> {
		Ok(self.run(args).await?.status.success())
	}

	async fn head(&self) -> TransportResult<Option<RevisionId>> {
		let output = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
		if !output.status.success() {
			return Ok(None);
		}
		Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
	}

	fn blob_path(&self, name: &str) -> TransportResult<PathBuf> {
		validate_relative_path(name).map_err(|e| {
			TransportError::Io(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
		})?;
		if name == ".git" || name.starts_with(".git/") {
			return Err(TransportError::Io(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("refusing to touch {}", name),
			)));
		}
		Ok(self.root.join(name))
	}
}

fn command_failed(args: &[&str], output: &Output) -> TransportError {
	let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
	if stderr.trim().is_empty() {
		stderr = String::from_utf8_lossy(&output.stdout).into_owned();
	}
	TransportError::CommandFailed { cmd: format!("git {}", args.join(" ")), stderr }
}

fn lines(text: &str) -> Vec<String> {
	text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect()
}

#[async_trait]
impl Transport for GitTransport {
	async fn stage(&mut self, name: &str, bytes: Option<&[u8]>) -> TransportResult<()> {
		let path = self.blob_path(name)?;
		match bytes {
			Some(bytes) => {
				if let Some(parent) = path.parent() {
					tokio::fs::create_dir_all(parent).await?;
				}
				tokio::fs::write(&path, bytes).await?;
			}
			None => match tokio::fs::remove_file(&path).await {
				Ok(()) => {}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			},
		}
		self.pending.insert(name.to_string());
		Ok(())
	}

	async fn commit(&mut self, message: &str) -> TransportResult<Option<RevisionId>> {
		self.git(&["add", "--all"]).await?;
		self.pending.clear();

		// Exit status 0 means the index matches HEAD
		if self.git_ok(&["diff", "--cached", "--quiet"]).await? {
			debug!("Nothing to commit in {}", self.root.display());
			return Ok(None);
		}

		self.git(&["commit", "--quiet", "--no-verify", "-m", message]).await?;
		let head = self.head().await?;
		if let Some(rev) = &head {
			info!("Committed {} in {}", rev, self.root.display());
		}
		Ok(head)
	}

	async fn push(&mut self) -> TransportResult<()> {
		if self.head().await?.is_none() {
			return Ok(());
		}
		let refspec = format!("HEAD:refs/heads/{}", self.branch);
		let args = ["push", "--porcelain", "origin", refspec.as_str()];
		let output = self.run(&args).await?;
		if output.status.success() {
			return Ok(());
		}

		let stdout = String::from_utf8_lossy(&output.stdout);
		let stderr = String::from_utf8_lossy(&output.stderr);
		let rejected = REJECTION_MARKERS.iter().any(|m| stdout.contains(m) || stderr.contains(m));
		if rejected {
			warn!("Push to {} rejected: remote has new commits", self.branch);
			return Err(TransportError::Conflict { message: stderr.trim().to_string() });
		}
		Err(command_failed(&args, &output))
	}

	async fn pull(&mut self) -> TransportResult<Vec<String>> {
		self.git(&["fetch", "--quiet", "origin"]).await?;

		let remote_ref = format!("refs/remotes/origin/{}", self.branch);
		let remote = self.run(&["rev-parse", "--verify", "--quiet", &remote_ref]).await?;
		if !remote.status.success() {
			debug!("Remote branch {} does not exist yet", self.branch);
			return Ok(Vec::new());
		}
		let remote_head = String::from_utf8_lossy(&remote.stdout).trim().to_string();

		let old = self.head().await?;
		if old.as_deref() == Some(remote_head.as_str()) {
			return Ok(Vec::new());
		}

		match &old {
			None => {
				self.git(&["reset", "--hard", "--quiet", &remote_head]).await?;
			}
			Some(_) => {
				let args = ["merge", "--ff-only", "--quiet", remote_head.as_str()];
				let output = self.run(&args).await?;
				if !output.status.success() {
					return Err(TransportError::Conflict {
						message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
					});
				}
			}
		}

		let changed = match old {
			None => self.git(&["ls-tree", "-r", "--name-only", "HEAD"]).await?,
			Some(old) => self.git(&["diff", "--name-only", &old, "HEAD"]).await?,
		};
		let changed = lines(&changed);
		info!("Pulled {} ({} changed blobs)", remote_head, changed.len());
		Ok(changed)
	}

	async fn list_blobs(&self) -> TransportResult<Vec<String>> {
		let root = self.root.clone();
		let walk = tokio::task::spawn_blocking(move || -> io::Result<Vec<String>> {
			let mut names = Vec::new();
			let walker = WalkBuilder::new(&root)
				.standard_filters(false)
				.hidden(false)
				.follow_links(false)
				.filter_entry(|entry| entry.file_name() != ".git")
				.build();
			for entry in walker {
				let entry = entry.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
				if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
					continue;
				}
				if let Some(name) = relative_path(&root, entry.path()) {
					names.push(name);
				}
			}
			names.sort();
			Ok(names)
		});

		walk.await.map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?
			.map_err(TransportError::Io)
	}

	async fn read_blob(&self, name: &str) -> TransportResult<Vec<u8>> {
		let path = self.blob_path(name)?;
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				Err(TransportError::NotFound { name: name.to_string() })
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn status(&self) -> TransportResult<TransportStatus> {
		let head = self.head().await?;
		let porcelain = self.git(&["status", "--porcelain"]).await?;
		Ok(TransportStatus { head, pending: lines(&porcelain).len() })
	}
}


// vim: ts=4
