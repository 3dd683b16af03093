//! `compare`: hash-level overlap between two manifests

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::algebra::{
	record_count, scoreboard_mark, scoreboard_retain_true, scoreboard_seed,
	select_names_by_scoreboard,
};
use crate::codec::{ErrorBudget, SfReader, store_path};
use crate::error::OpResult;
use crate::ops::{bash_escape, require_input};

/// Intersect two manifests by hash and print removal commands for the
/// overlapping files of B. The smaller file seeds the scoreboard so memory
/// stays bounded by min(|A|, |B|). With `long`, every record of B is listed
/// and only the overlapping ones are live `rm` lines.
pub fn compare(a: &Path, b: &Path, long: bool) -> OpResult<u64> {
	require_input(a)?;
	require_input(b)?;

	let len_a = record_count(a)?;
	let len_b = record_count(b)?;
	let (smaller, larger) = if len_b < len_a { (b, a) } else { (a, b) };
	debug!(
		"comparing {} ({len_a}) with {} ({len_b}), seeding from {}",
		a.display(),
		b.display(),
		smaller.display()
	);

	let mut overlap: HashMap<String, bool> = HashMap::new();
	scoreboard_seed(smaller, &mut overlap)?;
	scoreboard_mark(larger, &mut overlap)?;
	let shared = scoreboard_retain_true(&mut overlap);
	if shared == 0 {
		println!(
			"There are no overlapping records between '{}' and '{}'",
			a.display(),
			b.display()
		);
		return Ok(0);
	}

	if !long {
		let names = select_names_by_scoreboard(b, &overlap)?;
		println!(
			"# Commands to delete {} overlapping files from {}",
			names.len(),
			b.display()
		);
		for name in names {
			println!("rm \"{}\"", bash_escape(&name));
		}
	} else {
		let mut reader = SfReader::open(b)?;
		let mut budget = ErrorBudget::new();
		while let Some(head) = reader.next_tolerant(&mut budget)? {
			let Some(raw_path) = reader.decode().path else {
				continue;
			};
			let stored = store_path(&raw_path);
			if overlap.contains_key(&head.hash_b64) {
				println!("rm \"{}\"", bash_escape(&stored));
			} else {
				println!("#   {} ", bash_escape(&stored));
			}
		}
	}
	Ok(shared)
}
