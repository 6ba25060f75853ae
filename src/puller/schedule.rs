//! Round scheduling
//!
//! The coordinator runs pull rounds back to back while they make progress.
//! A round without progress is retried after the pull interval, and a folder
//! whose rounds keep failing is paused. Once nothing is left to do it waits
//! for the remote indexes to move. The decisions are a plain state machine so they can be
//! tested without timers; sleeping goes through a [`Ticker`].

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::FolderConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FolderState {
	Idle,
	Scanning,
	Syncing,
	/// Too many rounds without progress
	Paused,
	/// Stopped by a fatal error
	Error(String),
}

impl fmt::Display for FolderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FolderState::Idle => write!(f, "idle"),
			FolderState::Scanning => write!(f, "scanning"),
			FolderState::Syncing => write!(f, "syncing"),
			FolderState::Paused => write!(f, "paused"),
			FolderState::Error(e) => write!(f, "error: {}", e),
		}
	}
}

/// What happened in one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
	/// Items the round tried to handle
	pub handled: usize,
	/// Items that failed
	pub failed: usize,
}

impl RoundOutcome {
	pub fn progressed(&self) -> bool {
		self.handled > self.failed
	}
}

/// What to do after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	/// Start the next round right away
	Again,
	/// Nothing left to do; check again after the delay
	Settled(Duration),
	/// The round made no progress; try again after the delay
	Retry(Duration),
	/// Give up for the cooldown period
	Pause(Duration),
}

#[derive(Debug, Clone)]
pub struct PullScheduler {
	check_interval: Duration,
	pull_interval: Duration,
	pause_interval: Duration,
	max_no_progress: u32,
	no_progress: u32,
	settled_at: Option<i64>,
}

impl PullScheduler {
	pub fn new(cfg: &FolderConfig) -> Self {
		PullScheduler {
			check_interval: cfg.check_interval(),
			pull_interval: cfg.pull_interval(),
			pause_interval: cfg.pause_interval(),
			max_no_progress: cfg.max_no_progress_rounds,
			no_progress: 0,
			settled_at: None,
		}
	}

	/// Whether a pull is worth starting given the current remote sequence.
	pub fn should_pull(&self, remote_sequence: i64) -> bool {
		self.settled_at != Some(remote_sequence)
	}

	/// Delay before checking the index again when nothing changed.
	pub fn check_interval(&self) -> Duration {
		self.check_interval
	}

	/// Forget the last settled sequence so the next check pulls.
	pub fn invalidate(&mut self) {
		self.settled_at = None;
	}

	pub fn no_progress_rounds(&self) -> u32 {
		self.no_progress
	}

	pub fn round_finished(&mut self, outcome: RoundOutcome, remote_sequence: i64) -> Decision {
		if outcome.handled == 0 {
			self.no_progress = 0;
			self.settled_at = Some(remote_sequence);
			return Decision::Settled(self.pull_interval);
		}

		if outcome.progressed() {
			self.no_progress = 0;
			return Decision::Again;
		}

		self.no_progress += 1;
		if self.no_progress >= self.max_no_progress {
			self.no_progress = 0;
			self.settled_at = None;
			return Decision::Pause(self.pause_interval);
		}
		Decision::Retry(self.pull_interval)
	}
}

/// Source of delays between rounds.
#[async_trait]
pub trait Ticker: Send + Sync {
	async fn sleep(&self, d: Duration);
}

/// Real timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
	async fn sleep(&self, d: Duration) {
		tokio::time::sleep(d).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scheduler(max: u32) -> PullScheduler {
		let mut cfg = FolderConfig::new("f", "/tmp");
		cfg.max_no_progress_rounds = max;
		PullScheduler::new(&cfg)
	}

	#[test]
	fn test_empty_round_settles() {
		let mut s = scheduler(3);
		assert!(s.should_pull(5));
		let d = s.round_finished(RoundOutcome::default(), 5);
		assert_eq!(d, Decision::Settled(Duration::from_secs(10)));
		assert!(!s.should_pull(5));
		assert!(s.should_pull(6));
	}

	#[test]
	fn test_progress_runs_again() {
		let mut s = scheduler(3);
		let d = s.round_finished(RoundOutcome { handled: 4, failed: 1 }, 1);
		assert_eq!(d, Decision::Again);
		assert_eq!(s.no_progress_rounds(), 0);
	}

	#[test]
	fn test_repeated_failures_pause() {
		let mut s = scheduler(3);
		let failing = RoundOutcome { handled: 2, failed: 2 };
		let retry = Decision::Retry(Duration::from_secs(10));
		assert_eq!(s.round_finished(failing, 1), retry);
		assert_eq!(s.no_progress_rounds(), 1);
		assert!(s.should_pull(1));
		assert_eq!(s.round_finished(failing, 1), retry);
		assert_eq!(s.round_finished(failing, 1), Decision::Pause(Duration::from_secs(60)));
		assert_eq!(s.no_progress_rounds(), 0);
		// After the pause the same sequence is pulled again
		assert!(s.should_pull(1));
	}

	#[test]
	fn test_progress_resets_failure_streak() {
		let mut s = scheduler(2);
		let failing = RoundOutcome { handled: 1, failed: 1 };
		let retry = Decision::Retry(Duration::from_secs(10));
		assert_eq!(s.round_finished(failing, 1), retry);
		assert_eq!(s.round_finished(RoundOutcome { handled: 2, failed: 1 }, 1), Decision::Again);
		assert_eq!(s.round_finished(failing, 1), retry);
		assert_eq!(s.round_finished(failing, 1), Decision::Pause(Duration::from_secs(60)));
	}
}

// vim: ts=4
