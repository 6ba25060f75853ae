use clap::{Arg, Command};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use peersync::fs::{BasicFilesystem, Filesystem};
use peersync::logging::*;
use peersync::scanner::Scanner;
use peersync::{Config, DeviceId, FileInfo, FileSet, FolderConfig, RedbBackend};

///////////////////////
// Utility functions //
///////////////////////

fn open_folder(config: &Config, folder: &str) -> Result<(FolderConfig, FileSet), Box<dyn Error>> {
	let cfg = config.folder(folder).ok_or_else(|| format!("no folder {} in configuration", folder))?.clone();
	let backend = Arc::new(RedbBackend::open(&config.database)?);
	let fileset = FileSet::open(&cfg.id, backend)?;
	Ok((cfg, fileset))
}

fn kind(f: &FileInfo) -> &'static str {
	if f.is_deleted() {
		"deleted"
	} else if f.is_directory() {
		"dir"
	} else if f.is_symlink() {
		"symlink"
	} else {
		"file"
	}
}

fn print_file(f: &FileInfo) {
	println!("{:>8} {:>7} {:>12} {} {}", f.sequence, kind(f), f.size, f.version, f.name);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();

	let folder_arg = || Arg::new("folder").short('f').long("folder").value_name("ID").required(true).help("Folder id");
	let matches = Command::new("peersync")
		.version("0.1.0")
		.about("Inspect and refresh peersync folder indexes")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.default_value("peersync.toml")
				.help("Configuration file (TOML or JSON5)"),
		)
		.subcommand(Command::new("scan").about("Scan a folder into its local index").arg(folder_arg()))
		.subcommand(Command::new("dump").about("List the local index of a folder").arg(folder_arg()))
		.subcommand(Command::new("need").about("List what the local device still needs").arg(folder_arg()))
		.subcommand(Command::new("counts").about("Show global, local and need counts").arg(folder_arg()))
		.get_matches();

	let config_path = matches.get_one::<String>("config").ok_or("config file required")?;
	let config = Config::load(Path::new(config_path))?;

	let (name, sub) = matches.subcommand().ok_or("subcommand required")?;
	let folder = sub.get_one::<String>("folder").ok_or("folder id required")?;
	let (cfg, fileset) = open_folder(&config, folder)?;

	match name {
		"scan" => {
			let local = config.local_device()?.short();
			let fs: Arc<dyn Filesystem> = Arc::new(BasicFilesystem::new(&cfg.path));
			let changed = Scanner::new(fs, local, cfg.block_size).scan(&fileset)?;
			info!("{}: {} changes recorded", cfg.id, changed);
		}
		"dump" => {
			fileset.with_have(&DeviceId::LOCAL, |f| {
				print_file(&f);
				true
			})?;
		}
		"need" => {
			fileset.with_need(|f| {
				print_file(&f);
				true
			})?;
		}
		"counts" => {
			let need = fileset.need_counts()?;
			for (label, c) in [("global", fileset.global_counts()), ("local", fileset.local_counts()), ("need", need)] {
				println!(
					"{:<6} files={} dirs={} symlinks={} deleted={} bytes={}",
					label, c.files, c.directories, c.symlinks, c.deleted, c.bytes
				);
			}
			println!("sequence local={} remote={}", fileset.sequence(&DeviceId::LOCAL), fileset.remote_sequence());
		}
		other => return Err(format!("unknown command {}", other).into()),
	}

	Ok(())
}

// vim: ts=4
