//! `misnamed`: files whose names need escaping
//!
//! A misnamed file is one whose path contains bytes the signature format
//! must escape (control characters or a backslash), usually the result of
//! an accident or something trying to hide.

use std::path::PathBuf;

use crate::codec::store_path;
use crate::error::OpResult;
use crate::paths::display;
use crate::walk::{WalkOptions, check_root, spawn_file_walk};

#[derive(Debug, Default)]
pub struct MisnamedReport {
	pub total: u64,
	pub suspicious: u64,
}

pub fn misnamed(root: &PathBuf, no_dot: bool) -> OpResult<MisnamedReport> {
	check_root(root)?;
	let rx = spawn_file_walk(
		root.clone(),
		WalkOptions {
			no_dot,
			cwd_only: false,
		},
	);
	let mut report = MisnamedReport::default();
	while let Ok(live) = rx.recv_blocking() {
		report.total += 1;
		let escaped = store_path(&live.path);
		if escaped != live.path {
			println!("{}\n{}\n", display(&live.path), display(&escaped));
			report.suspicious += 1;
		}
	}
	Ok(report)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn clean_names_are_not_suspicious() {
		let dir = TempDir::new().unwrap();
		let root = dir.path().join("tree");
		fs::create_dir(&root).unwrap();
		fs::write(root.join("ordinary name.txt"), "x").unwrap();
		let report = misnamed(&root, false).unwrap();
		assert_eq!(report.total, 1);
		assert_eq!(report.suspicious, 0);
	}

	#[cfg(unix)]
	#[test]
	fn control_bytes_in_names_are_flagged() {
		use std::ffi::OsStr;
		use std::os::unix::ffi::OsStrExt;
		let dir = TempDir::new().unwrap();
		let root = dir.path().join("tree");
		fs::create_dir(&root).unwrap();
		let weird = root.join(OsStr::from_bytes(b"bell\x07.txt"));
		fs::write(&weird, "x").unwrap();
		let report = misnamed(&root, false).unwrap();
		assert_eq!(report.suspicious, 1);
	}
}
