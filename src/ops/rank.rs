//! `biggest` / `latest`: ranked queries over manifests or a live tree

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::codec::modtime_hex;
use crate::error::OpResult;
use crate::ops::require_input;
use crate::paths::display;
use crate::top::TopList;
use crate::walk::{WalkOptions, check_root, spawn_file_walk};

/// Which hex key drives the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
	/// Byte size, zero-padded to 10 hex characters
	Size,
	/// Modification time, 8 hex characters
	Date,
}

#[derive(Debug, Clone)]
pub struct RankOptions {
	pub count: usize,
	/// Collapse repeated sizes in the report (biggest only)
	pub ellipsis: bool,
	/// Path prefix to exclude from results
	pub discard: Option<Vec<u8>>,
	pub no_dot: bool,
	/// Live-walk root used when no manifest is given
	pub root: PathBuf,
}

impl Default for RankOptions {
	fn default() -> Self {
		RankOptions {
			count: 10,
			ellipsis: false,
			discard: None,
			no_dot: false,
			root: PathBuf::from("."),
		}
	}
}

fn size_key(hex: &str) -> String {
	if hex.len() >= 10 {
		hex.to_string()
	} else {
		format!("{hex:0>10}")
	}
}

fn discarded(name: &[u8], discard: &Option<Vec<u8>>) -> bool {
	match discard {
		Some(prefix) => name.starts_with(prefix),
		None => false,
	}
}

fn scan_manifest(file: &Path, key: RankKey, opts: &RankOptions, top: &mut TopList) -> OpResult<()> {
	let mut reader = BufReader::new(File::open(file)?);
	let mut line: Vec<u8> = Vec::new();
	let mut lineno = 0u64;
	let mut thresh = top.row(top.depth() - 1).0.to_string();
	loop {
		line.clear();
		if reader.read_until(b'\n', &mut line)? == 0 {
			break;
		}
		lineno += 1;
		while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
			line.pop();
		}
		if line.is_empty() || line[0] == b'#' {
			continue;
		}

		// least-kerfuffle extraction: a rankable record has hash, modtime,
		// size, and a path separator
		let space = line.iter().position(|b| *b == b' ');
		let Some(space) = space.filter(|pos| *pos >= 55) else {
			println!("Skipping line {lineno} - invalid format");
			continue;
		};
		let Some(sep) = line.windows(2).position(|w| w == b" :") else {
			println!("Skipping line {lineno} - invalid format");
			continue;
		};

		let rank_key = match key {
			RankKey::Size => size_key(&String::from_utf8_lossy(&line[51..space])),
			RankKey::Date => String::from_utf8_lossy(&line[43..51]).into_owned(),
		};
		if rank_key < thresh {
			continue;
		}
		let id = String::from_utf8_lossy(&line[..space]).into_owned();
		let name = &line[sep + 2..];
		if discarded(name, &opts.discard) {
			continue;
		}
		thresh = top.add(&rank_key, &id, name);
	}
	Ok(())
}

fn scan_live(key: RankKey, opts: &RankOptions, top: &mut TopList) -> OpResult<()> {
	check_root(&opts.root)?;
	let rx = spawn_file_walk(
		opts.root.clone(),
		WalkOptions {
			no_dot: opts.no_dot,
			cwd_only: false,
		},
	);
	let mut thresh = top.row(top.depth() - 1).0.to_string();
	while let Ok(live) = rx.recv_blocking() {
		let rank_key = match key {
			RankKey::Size => format!("{:010x}", live.size.max(0)),
			RankKey::Date => modtime_hex(live.modtime),
		};
		if rank_key < thresh {
			continue;
		}
		if discarded(&live.path, &opts.discard) {
			continue;
		}
		let id = display(&live.path);
		thresh = top.add(&rank_key, &id, &live.path);
	}
	Ok(())
}

/// Rank the given manifests (or the live tree when none are given) and
/// print the table.
pub fn rank(files: &[PathBuf], key: RankKey, opts: &RankOptions) -> OpResult<()> {
	let default_key = match key {
		RankKey::Size => "0000000000",
		RankKey::Date => "00000000",
	};
	let mut top = TopList::new(opts.count, default_key);

	if files.is_empty() {
		scan_live(key, opts, &mut top)?;
	} else {
		for file in files {
			require_input(file)?;
			scan_manifest(file, key, opts, &mut top)?;
		}
	}

	match key {
		RankKey::Size => {
			top.report_by_size(&format!("TOP {} BY SIZE", top.depth()), opts.ellipsis)
		}
		RankKey::Date => top.report_by_date(&format!("LATEST {} CHANGED FILES", top.depth())),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn sha(ch: char) -> String {
		ch.to_string().repeat(43)
	}

	fn manifest(dir: &TempDir) -> PathBuf {
		let path = dir.path().join("m.sf");
		let lines = [
			format!("{}68b482da00ff :mid.txt", sha('A')),
			format!("{}68b482db0fff :big.txt", sha('B')),
			format!("{}58b482da0001 :small-old.txt", sha('C')),
			format!("{}68b482dc0fff :big-copy.txt", sha('B')),
		];
		fs::write(&path, lines.join("\n") + "\n").unwrap();
		path
	}

	#[test]
	fn size_ranking_orders_descending() {
		let dir = TempDir::new().unwrap();
		let m = manifest(&dir);
		let mut top = TopList::new(3, "0000000000");
		let opts = RankOptions::default();
		scan_manifest(&m, RankKey::Size, &opts, &mut top).unwrap();
		assert_eq!(top.row(0).0, "0000000fff");
		assert_eq!(top.row(0).2, b"big.txt");
		// an equal size with a different identifier lists adjacently
		assert_eq!(top.row(1).0, "0000000fff");
		assert_eq!(top.row(1).2, b"big-copy.txt");
		assert_eq!(top.row(2).2, b"mid.txt");
	}

	#[test]
	fn date_ranking_uses_the_modtime_field() {
		let dir = TempDir::new().unwrap();
		let m = manifest(&dir);
		let mut top = TopList::new(2, "00000000");
		let opts = RankOptions::default();
		scan_manifest(&m, RankKey::Date, &opts, &mut top).unwrap();
		assert_eq!(top.row(0).0, "68b482dc");
		assert_eq!(top.row(0).2, b"big-copy.txt");
	}

	#[test]
	fn discard_prefix_excludes_names() {
		let dir = TempDir::new().unwrap();
		let m = manifest(&dir);
		let mut top = TopList::new(3, "0000000000");
		let opts = RankOptions {
			discard: Some(b"big".to_vec()),
			..RankOptions::default()
		};
		scan_manifest(&m, RankKey::Size, &opts, &mut top).unwrap();
		assert_eq!(top.row(0).2, b"mid.txt");
	}

	#[test]
	fn live_walk_ranks_without_manifests() {
		let dir = TempDir::new().unwrap();
		let root = dir.path().join("tree");
		fs::create_dir(&root).unwrap();
		fs::write(root.join("small"), "x").unwrap();
		fs::write(root.join("large"), "x".repeat(5000)).unwrap();
		let mut top = TopList::new(2, "0000000000");
		let opts = RankOptions {
			root,
			..RankOptions::default()
		};
		scan_live(RankKey::Size, &opts, &mut top).unwrap();
		assert!(top.row(0).2.ends_with(b"large"));
		assert_eq!(top.row(0).0, "0000001388");
	}
}
