//! `generate`: walk a tree and emit a fresh signature file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::codec::{Entry, Format, modtime_hex, size_hex};
use crate::error::{OpError, OpResult};
use crate::hash::{hash_file, hex_of};
use crate::ops::refuse_existing;
use crate::paths::{display, path_from_bytes};
use crate::walk::{WalkOptions, check_root, spawn_file_walk};
use crate::writer::{Counters, ManifestWriter, Tag};

#[derive(Debug, Clone)]
pub struct GenerateOptions {
	pub root: PathBuf,
	/// Output format 1..=5, or 9 for GNU sha256sum lines
	pub format_code: u8,
	pub no_dot: bool,
	/// Append the duplicates trailer comment block
	pub dupes: bool,
	/// Append the grand-totals trailer comment
	pub totals: bool,
	pub verbosity: u8,
}

impl Default for GenerateOptions {
	fn default() -> Self {
		GenerateOptions {
			root: PathBuf::from("."),
			format_code: 5,
			no_dot: false,
			dupes: false,
			totals: false,
			verbosity: 0,
		}
	}
}

/// Append the duplicates trailer: one comment per hash seen more than once,
/// sorted ascending.
pub(crate) fn dupes_trailer(
	writer: &mut ManifestWriter,
	counts: &BTreeMap<String, u64>,
) -> OpResult<()> {
	let multi: Vec<(&String, &u64)> = counts.iter().filter(|(_, n)| **n > 1).collect();
	if multi.is_empty() {
		writer.comment("There were no duplicates")?;
	} else {
		writer.comment("----------------- Duplicates -----------------")?;
		for (hash, n) in multi {
			writer.comment(&format!("{hash} x{n}"))?;
		}
	}
	Ok(())
}

/// Generate a signature file for `opts.root`, to `target` or stdout.
/// An existing target is refused.
pub fn generate(target: Option<&Path>, opts: &GenerateOptions) -> OpResult<Counters> {
	let sum_mode = opts.format_code == 9;
	let format = if sum_mode {
		Format::Full // unused in sum mode
	} else {
		Format::from_code(opts.format_code)
			.ok_or_else(|| OpError::Usage(format!("format {} is not valid", opts.format_code)))?
	};
	if let Some(path) = target {
		refuse_existing(path)?;
	}
	check_root(&opts.root)?;

	let mut writer = ManifestWriter::open(target, opts.verbosity)?;
	let mut counts: BTreeMap<String, u64> = BTreeMap::new();
	let rx = spawn_file_walk(
		opts.root.clone(),
		WalkOptions {
			no_dot: opts.no_dot,
			cwd_only: false,
		},
	);
	while let Ok(live) = rx.recv_blocking() {
		let path = path_from_bytes(&live.path);
		let (bin, b64) = match hash_file(&path) {
			Ok(pair) => pair,
			Err(err) => {
				let shown = display(&live.path);
				warn!("skipping {shown} (read failure: {err})");
				continue;
			}
		};
		if opts.dupes {
			*counts.entry(b64.clone()).or_insert(0) += 1;
		}
		if sum_mode {
			writer.record_sum(&hex_of(&bin), &live.path, live.size)?;
		} else {
			let entry = Entry {
				hash_b64: b64,
				modtime: Some(modtime_hex(live.modtime)),
				size: Some(size_hex(live.size)),
				annotations: vec![],
				path: Some(live.path),
			};
			writer.record(true, format, Tag::New, &entry, "")?;
		}
	}

	if opts.totals {
		writer.totals_comment()?;
	}
	if opts.dupes {
		dupes_trailer(&mut writer, &counts)?;
	}
	let counters = writer.close()?;
	info!(
		"generate: {} files, {} bytes from {}",
		counters.total_files,
		counters.total_bytes,
		opts.root.display()
	);
	Ok(counters)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hash::EMPTY_HASH_B64;
	use std::fs;
	use tempfile::TempDir;

	fn fixture() -> (TempDir, PathBuf) {
		let dir = TempDir::new().unwrap();
		let base = dir.path().join("tree");
		fs::create_dir_all(base.join("a")).unwrap();
		fs::create_dir(base.join("b")).unwrap();
		fs::write(base.join("a/1.txt"), "hi").unwrap();
		fs::write(base.join("a/10.txt"), "hello\n").unwrap();
		fs::write(base.join("b/2.txt"), "").unwrap();
		(dir, base)
	}

	#[test_log::test]
	fn emits_sorted_full_records_with_known_empty_hash() {
		let (dir, root) = fixture();
		let out = dir.path().join("out.sf");
		let opts = GenerateOptions {
			root: root.clone(),
			..GenerateOptions::default()
		};
		let counters = generate(Some(&out), &opts).unwrap();
		assert_eq!(counters.total_files, 3);
		assert_eq!(counters.total_bytes, 8);

		let text = fs::read_to_string(&out).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 3);
		assert!(lines[0].ends_with("a/1.txt"));
		assert!(lines[1].ends_with("a/10.txt"));
		assert!(lines[2].ends_with("b/2.txt"));

		let empty = lines[2];
		assert!(empty.starts_with(EMPTY_HASH_B64));
		// modtime is 8 hex chars, then a 4-char zero size for the empty file
		assert_eq!(&empty[51..55], "0000");
		assert_eq!(&empty[55..57], " :");
	}

	#[test]
	fn refuses_to_overwrite_an_existing_target() {
		let (dir, root) = fixture();
		let out = dir.path().join("out.sf");
		fs::write(&out, "already here").unwrap();
		let opts = GenerateOptions {
			root,
			..GenerateOptions::default()
		};
		let err = generate(Some(&out), &opts).unwrap_err();
		assert_eq!(err.exit_code(), 6);
	}

	#[test]
	fn reduced_formats_drop_fields() {
		let (dir, root) = fixture();
		let out = dir.path().join("f1.sf");
		let opts = GenerateOptions {
			root: root.clone(),
			format_code: 1,
			..GenerateOptions::default()
		};
		generate(Some(&out), &opts).unwrap();
		let text = fs::read_to_string(&out).unwrap();
		assert!(text.lines().all(|l| l.len() == 43));
	}

	#[test]
	fn sum_format_uses_hex_and_double_space() {
		let (dir, root) = fixture();
		let out = dir.path().join("sums");
		let opts = GenerateOptions {
			root,
			format_code: 9,
			..GenerateOptions::default()
		};
		generate(Some(&out), &opts).unwrap();
		let text = fs::read_to_string(&out).unwrap();
		for line in text.lines() {
			assert_eq!(line.as_bytes()[64], b' ');
			assert_eq!(line.as_bytes()[65], b' ');
			assert!(line[..64].bytes().all(|b| b.is_ascii_hexdigit()));
		}
	}

	#[test]
	fn trailer_comments_report_duplicates() {
		let (dir, root) = fixture();
		fs::write(root.join("b/copy-of-1.txt"), "hi").unwrap();
		let out = dir.path().join("out.sf");
		let opts = GenerateOptions {
			root,
			dupes: true,
			totals: true,
			..GenerateOptions::default()
		};
		generate(Some(&out), &opts).unwrap();
		let text = fs::read_to_string(&out).unwrap();
		assert!(text.contains("# 4 files, 10 bytes"));
		assert!(text.contains("# ----------------- Duplicates -----------------"));
		assert!(text.contains(" x2"));
	}

	#[test]
	fn bad_format_is_a_usage_error() {
		let (_dir, root) = fixture();
		let opts = GenerateOptions {
			root,
			format_code: 7,
			..GenerateOptions::default()
		};
		assert_eq!(generate(None, &opts).unwrap_err().exit_code(), 8);
	}
}
