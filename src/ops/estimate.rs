//! `estimate`: quick size/count statistics for a tree

use std::path::PathBuf;

use crate::error::OpResult;
use crate::paths::display;
use crate::walk::{WalkOptions, check_root, spawn_file_walk};

#[derive(Debug, Default, Clone)]
pub struct Estimate {
	pub total_files: i64,
	pub total_bytes: i64,
	pub largest: i64,
	pub largest_name: Vec<u8>,
	pub longest: usize,
	pub longest_name: Vec<u8>,
}

/// Walk the tree without hashing anything, so the user can judge how long
/// the real operations will take.
pub fn estimate(root: &PathBuf) -> OpResult<Estimate> {
	check_root(root)?;
	let rx = spawn_file_walk(root.clone(), WalkOptions::default());
	let mut est = Estimate::default();
	while let Ok(live) = rx.recv_blocking() {
		if live.path.len() > est.longest {
			est.longest = live.path.len();
			est.longest_name = live.path.clone();
		}
		if live.size > est.largest {
			est.largest = live.size;
			est.largest_name = live.path.clone();
		}
		est.total_bytes += live.size;
		est.total_files += 1;
	}
	Ok(est)
}

pub fn print_estimate(est: &Estimate) {
	println!("Total files:  {}", est.total_files);
	println!("Total bytes:  {}", est.total_bytes);
	println!("Largest file: {} {}", est.largest, display(&est.largest_name));
	println!("Longest name: {} {}", est.longest, display(&est.longest_name));
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn totals_and_superlatives() {
		let dir = TempDir::new().unwrap();
		let root = dir.path().join("tree");
		fs::create_dir(&root).unwrap();
		fs::write(root.join("a"), "xx").unwrap();
		fs::write(root.join("really-long-name.bin"), "x".repeat(100)).unwrap();
		let est = estimate(&root).unwrap();
		assert_eq!(est.total_files, 2);
		assert_eq!(est.total_bytes, 102);
		assert_eq!(est.largest, 100);
		assert!(est.largest_name.ends_with(b"really-long-name.bin"));
		assert!(est.longest_name.ends_with(b"really-long-name.bin"));
	}
}
