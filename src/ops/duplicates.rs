//! `duplicates`: repeated hashes as a commented declutter script

use std::collections::HashMap;
use std::path::Path;

use crate::algebra::{duplicate_groups, record_count, scoreboard_retain_true, seed_duplicates};
use crate::error::OpResult;
use crate::ops::{bash_escape, require_input};

#[derive(Debug, Default)]
pub struct DuplicatesReport {
	pub records: u64,
	pub blocks: u64,
	pub files: u64,
}

/// Scan one manifest for repeated hashes and print `#rm "…"` blocks, sorted
/// by the first filename of each block. Nothing is ever deleted; the user
/// edits the commented script.
pub fn duplicates(file: &Path, include_sha: bool) -> OpResult<DuplicatesReport> {
	require_input(file)?;

	let records = record_count(file)?;
	println!("Valid file with {records} records");

	let mut board = HashMap::new();
	let (_, dupes) = seed_duplicates(file, &mut board)?;
	println!("File {} has {} SHAs with duplicate files", file.display(), dupes);

	if scoreboard_retain_true(&mut board) == 0 {
		println!("There are no duplicated files in '{}'", file.display());
		return Ok(DuplicatesReport {
			records,
			..DuplicatesReport::default()
		});
	}

	let groups = duplicate_groups(file, &board)?;
	println!(
		"Found {} duplicate blocks comprising {} files (potentially {} excess files)",
		groups.blocks,
		groups.files,
		groups.files - groups.blocks
	);

	for (first, hash) in &groups.firsts {
		if include_sha {
			println!("# {hash}");
		}
		println!("#rm \"{}\"", bash_escape(first));
		if let Some(subs) = groups.subordinates.get(hash) {
			for sub in subs {
				println!("#rm \"{}\"", bash_escape(sub));
			}
		}
		println!();
	}

	Ok(DuplicatesReport {
		records,
		blocks: groups.blocks,
		files: groups.files,
	})
}
