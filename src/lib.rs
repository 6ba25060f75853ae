//! # peersync - Block-Level Folder Replication Engine
//!
//! peersync keeps a folder identical across devices without a central
//! coordinator. Each device announces its files with version vectors; the
//! index picks a global winner per name, and the puller fetches exactly the
//! blocks the local copy is missing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peersync::{FileSet, FolderConfig, Puller, RedbBackend};
//! use peersync::fs::BasicFilesystem;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = FolderConfig::new("docs", "/srv/docs");
//!     let backend = Arc::new(RedbBackend::open("index.redb".as_ref())?);
//!     let fileset = Arc::new(FileSet::open(&cfg.id, backend)?);
//!     let fs = Arc::new(BasicFilesystem::new(&cfg.path));
//!     let puller = Arc::new(Puller::new(cfg, fileset, fs, my_block_source())?);
//!     let outcome = puller.pull_iteration().await?;
//!     println!("{} items handled, {} failed", outcome.handled, outcome.failed);
//!     Ok(())
//! }
//! ```

pub mod blocks;
pub mod config;
pub mod conflict;
pub mod error;
pub mod fs;
pub mod index;
pub mod logging;
pub mod protocol;
pub mod puller;
pub mod scanner;
pub mod store;
pub mod summary;
pub mod types;
pub mod version;
pub mod versioner;

// Re-export commonly used types
pub use config::{Config, FolderConfig};
pub use error::{BlockError, FetchError, IndexError, PullError, StoreError, SyncError};
pub use index::FileSet;
pub use protocol::{BlockRequest, BlockSource};
pub use puller::Puller;
pub use store::RedbBackend;
pub use types::{BlockInfo, DeviceId, FileInfo, FileType, ShortId};
pub use version::Vector;

// vim: ts=4
