//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("folder {} in sync", folder);
//! warn!("{}: pull failed: {}", name, err);
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// Defaults to INFO. Control the level with `RUST_LOG`:
///
/// ```bash
/// RUST_LOG=debug peersync scan --config peersync.toml
/// RUST_LOG=peersync::puller=debug,peersync::index=trace peersync ...
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
