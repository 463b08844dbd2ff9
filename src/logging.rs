//! Logging prelude and subscriber setup.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("uploaded {} files", n);
//! warn!("skipping unreadable file {}", path);
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used
/// (`info` for normal runs, `debug` with `--verbose`):
///
/// ```bash
/// RUST_LOG=cryptdrive=debug cryptdrive upload
/// RUST_LOG=cryptdrive::engine=trace,cryptdrive::transport=debug cryptdrive run
/// ```
pub fn init_tracing(default_level: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
