//! `sum`: GNU-style sha256sum file from a live tree

use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::OpResult;
use crate::hash::{hash_file, hex_of};
use crate::ops::refuse_existing;
use crate::paths::{display, path_from_bytes};
use crate::walk::{WalkOptions, check_root, spawn_file_walk};
use crate::writer::{Counters, ManifestWriter};

#[derive(Debug, Clone)]
pub struct SumOptions {
	pub root: PathBuf,
	pub no_dot: bool,
}

/// Produce `<hex><two spaces><path>` lines for every file under the root.
/// No signature-file semantics: no modtime, no size, paths unescaped.
pub fn sum(target: Option<&Path>, opts: &SumOptions) -> OpResult<Counters> {
	if let Some(path) = target {
		refuse_existing(path)?;
	}
	check_root(&opts.root)?;

	let ticker = target.is_some();
	if ticker {
		print!("Generating (dot=100)");
		let _ = std::io::stdout().flush();
	}

	let mut writer = ManifestWriter::open(target, 0)?;
	let rx = spawn_file_walk(
		opts.root.clone(),
		WalkOptions {
			no_dot: opts.no_dot,
			cwd_only: false,
		},
	);
	while let Ok(live) = rx.recv_blocking() {
		let path = path_from_bytes(&live.path);
		let (bin, _) = match hash_file(&path) {
			Ok(pair) => pair,
			Err(err) => {
				let shown = display(&live.path);
				warn!("skipping {shown} (read failure: {err})");
				continue;
			}
		};
		writer.record_sum(&hex_of(&bin), &live.path, live.size)?;

		let done = writer.counters().total_files;
		if ticker && done % 100 == 0 {
			print!(".");
			let _ = std::io::stdout().flush();
		}
		if done % 500 == 0 {
			writer.flush()?;
		}
	}
	if ticker {
		println!(".");
	}
	writer.close()
}
