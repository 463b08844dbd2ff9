//! Periodic driver for one sync direction.
//!
//! Ticks never overlap: a tick that is still running when the next one is
//! due simply delays it, and a tick that finds the manifest lock held by
//! another process is skipped. Transport failures wait for the retry delay
//! before the schedule resumes; a corrupted manifest stops the loop.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::engine::{SyncEngine, TickOutcome};
use crate::error::SyncError;
use crate::logging::*;
use crate::transport::Transport;
use crate::types::Direction;

#[derive(Debug, Clone)]
pub struct Scheduler {
	direction: Direction,
	interval: Duration,
	retry_delay: Duration,
	max_ticks: Option<usize>,
}

impl Scheduler {
	pub fn new(direction: Direction, interval: Duration, retry_delay: Duration) -> Self {
		Scheduler { direction, interval, retry_delay, max_ticks: None }
	}

	pub fn from_config(config: &Config, direction: Direction) -> Self {
		Self::new(direction, config.poll_interval(), config.retry_delay())
	}

	/// Stop after this many ticks instead of running until shutdown
	pub fn max_ticks(mut self, ticks: usize) -> Self {
		self.max_ticks = Some(ticks);
		self
	}

	/// Tick until `shutdown` resolves, a fatal error occurs or `max_ticks`
	/// is reached. Returns the number of ticks run.
	pub async fn run<T, F>(&self, engine: &mut SyncEngine<T>, shutdown: F) -> Result<usize, SyncError>
	where
		T: Transport,
		F: Future<Output = ()>,
	{
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		tokio::pin!(shutdown);

		info!("Scheduling {} every {:?}", self.direction, self.interval);
		let mut ticks = 0usize;
		loop {
			if matches!(self.max_ticks, Some(max) if ticks >= max) {
				return Ok(ticks);
			}

			tokio::select! {
				_ = &mut shutdown => {
					info!("Shutdown requested, stopping {} scheduler", self.direction);
					return Ok(ticks);
				}
				_ = ticker.tick() => {}
			}
			ticks += 1;

			match engine.tick(self.direction).await {
				Ok(TickOutcome::Completed(report)) => {
					if report.is_noop() {
						debug!("{}", report);
					}
					for failed in &report.failed {
						warn!("{} failed: {}", failed.path, failed.reason);
					}
				}
				Ok(TickOutcome::Skipped) => {}
				Err(e) if e.is_fatal() => {
					error!("{}", e);
					return Err(e);
				}
				Err(e) => {
					warn!("{} tick failed, retrying in {:?}: {}", self.direction, self.retry_delay, e);
					tokio::select! {
						_ = &mut shutdown => {
							info!("Shutdown requested, stopping {} scheduler", self.direction);
							return Ok(ticks);
						}
						_ = tokio::time::sleep(self.retry_delay) => {}
					}
					ticker.reset();
				}
			}
		}
	}
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Only Ctrl-C will stop the scheduler.", e);
				let _ = tokio::signal::ctrl_c().await;
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => debug!("Received SIGTERM"),
			_ = tokio::signal::ctrl_c() => debug!("Received SIGINT"),
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}


// vim: ts=4
