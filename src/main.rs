use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;

use cryptdrive::config::Config;
use cryptdrive::crypto::generate_key;
use cryptdrive::engine::{SyncEngine, TickOutcome};
use cryptdrive::logging::{self, info};
use cryptdrive::scheduler::{shutdown_signal, Scheduler};
use cryptdrive::transport::{GitTransport, Transport};
use cryptdrive::types::{Direction, SyncReport};

fn cli() -> Command {
	Command::new("cryptdrive")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Encrypted one-way file sync over a git remote")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.default_value("config.json")
				.global(true)
				.help("Configuration file (.json, .json5 or .toml)"),
		)
		.arg(
			Arg::new("json")
				.long("json")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Print reports as JSON"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Debug logging"),
		)
		.subcommand(Command::new("keygen").about("Print a new random encryption key"))
		.subcommand(Command::new("upload").about("Send local changes once"))
		.subcommand(Command::new("download").about("Restore remote changes once"))
		.subcommand(
			Command::new("run").about("Sync periodically until interrupted").arg(
				Arg::new("direction")
					.short('d')
					.long("direction")
					.value_parser(["upload", "download"])
					.required(true),
			),
		)
		.subcommand(Command::new("status").about("Show pending local changes"))
}

fn print_report(report: &SyncReport, json: bool) -> Result<(), Box<dyn Error>> {
	if json {
		println!("{}", serde_json::to_string_pretty(report)?);
	} else {
		println!("{}", report);
		for failed in &report.failed {
			println!("  failed: {}: {}", failed.path, failed.reason);
		}
		for path in &report.conflicts {
			println!("  conflict: {} was modified locally, not deleted", path);
		}
	}
	Ok(())
}

async fn open_engine(matches: &ArgMatches) -> Result<SyncEngine<GitTransport>, Box<dyn Error>> {
	let path = matches
		.get_one::<String>("config")
		.map(PathBuf::from)
		.ok_or("--config is required")?;
	let config = Config::load(&path)?;
	let transport = GitTransport::open_with_timeout(
		&config.repo_url,
		&config.local_mirror_path,
		&config.branch,
		config.git_timeout(),
	)
	.await?;
	Ok(SyncEngine::new(config, transport)?)
}

async fn once(matches: &ArgMatches, direction: Direction) -> Result<(), Box<dyn Error>> {
	let json = matches.get_flag("json");
	let mut engine = open_engine(matches).await?;
	match engine.tick(direction).await? {
		TickOutcome::Completed(report) => {
			print_report(&report, json)?;
			if !report.failed.is_empty() {
				return Err(format!("{} files failed", report.failed.len()).into());
			}
		}
		TickOutcome::Skipped => {
			return Err("another cryptdrive run holds the manifest lock".into());
		}
	}
	Ok(())
}

async fn status(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	let engine = open_engine(matches).await?;
	let changes = engine.pending_changes()?;
	let transport = engine.transport().status().await?;

	if matches.get_flag("json") {
		let out = serde_json::json!({ "folders": changes, "transport": transport });
		println!("{}", serde_json::to_string_pretty(&out)?);
		return Ok(());
	}

	for folder in &changes {
		println!(
			"{}: {} added, {} modified, {} deleted",
			folder.folder_id,
			folder.diff.added.len(),
			folder.diff.modified.len(),
			folder.diff.deleted.len()
		);
		for path in &folder.diff.added {
			println!("  + {}", path);
		}
		for path in &folder.diff.modified {
			println!("  ~ {}", path);
		}
		for path in &folder.diff.deleted {
			println!("  - {}", path);
		}
	}
	println!(
		"transport: head {}, {} uncommitted",
		transport.head.as_deref().unwrap_or("(none)"),
		transport.pending
	);
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = cli().get_matches();
	logging::init_tracing(if matches.get_flag("verbose") { "debug" } else { "info" });

	match matches.subcommand() {
		Some(("keygen", _)) => {
			println!("{}", generate_key().encode());
		}
		Some(("upload", sub)) => once(sub, Direction::Upload).await?,
		Some(("download", sub)) => once(sub, Direction::Download).await?,
		Some(("run", sub)) => {
			let direction = match sub.get_one::<String>("direction").map(String::as_str) {
				Some("download") => Direction::Download,
				_ => Direction::Upload,
			};
			let mut engine = open_engine(sub).await?;
			let scheduler = Scheduler::from_config(engine.config(), direction);
			let ticks = scheduler.run(&mut engine, shutdown_signal()).await?;
			info!("Stopped after {} ticks", ticks);
		}
		Some(("status", sub)) => status(sub).await?,
		_ => unreachable!("subcommand_required"),
	}

	Ok(())
}

// vim: ts=4
