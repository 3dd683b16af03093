//! Hash-keyed set algebra: overlap scoreboards, duplicate grouping, and
//! consolidation with earliest-modtime semantics

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

use crate::codec::{ErrorBudget, Format, SfReader, store_path};
use crate::error::OpResult;

/// Modtimes below this hex value (≈ 1980-01-01 UTC) are suspect: they lose
/// the earliest-modtime contest to any non-suspect value.
pub const SUSPECT_MTIME_FLOOR: &str = "12ceec80";

/// Count the records of a signature file, applying the usual tolerance for
/// malformed lines.
pub fn record_count(path: &Path) -> OpResult<u64> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	while reader.next_tolerant(&mut budget)?.is_some() {}
	Ok(reader.record_count())
}

/// Seed a scoreboard with `false` for every hash in the file.
/// Returns (records read, unique hashes).
pub fn scoreboard_seed(path: &Path, board: &mut HashMap<String, bool>) -> OpResult<(u64, u64)> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		board.entry(head.hash_b64).or_insert(false);
	}
	Ok((reader.record_count(), board.len() as u64))
}

/// Mark `true` every scoreboard key that also appears in this file.
/// Returns (records read, marks applied).
pub fn scoreboard_mark(path: &Path, board: &mut HashMap<String, bool>) -> OpResult<(u64, u64)> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	let mut marked = 0u64;
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		if let Some(flag) = board.get_mut(&head.hash_b64) {
			if !*flag {
				marked += 1;
			}
			*flag = true;
		}
	}
	Ok((reader.record_count(), marked))
}

/// Drop every `false` entry; what remains is the marked set (intersection,
/// or the duplicated hashes). Returns the surviving count.
pub fn scoreboard_retain_true(board: &mut HashMap<String, bool>) -> u64 {
	board.retain(|_, marked| *marked);
	board.len() as u64
}

/// Duplicate pass: `false` on first sight of a hash, `true` on any repeat.
/// Returns (records read, distinct duplicated hashes).
pub fn seed_duplicates(path: &Path, board: &mut HashMap<String, bool>) -> OpResult<(u64, u64)> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	let mut dupes = 0u64;
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		match board.get_mut(&head.hash_b64) {
			None => {
				board.insert(head.hash_b64, false);
			}
			Some(flag) => {
				if !*flag {
					dupes += 1;
				}
				*flag = true;
			}
		}
	}
	Ok((reader.record_count(), dupes))
}

/// Grouped duplicates: the first filename to use each duplicated hash, plus
/// the newline-order list of its subordinates. Block order is the byte sort
/// of the first filenames (their stored, escaped form).
pub struct DuplicateGroups {
	/// (stored first filename, hash), sorted by filename
	pub firsts: Vec<(Vec<u8>, String)>,
	/// hash -> stored subordinate filenames, in file order
	pub subordinates: HashMap<String, Vec<Vec<u8>>>,
	/// number of duplicate blocks
	pub blocks: u64,
	/// total files across all blocks
	pub files: u64,
}

/// Second pass over the file, collecting names for every hash the (already
/// retained) duplicate scoreboard still contains.
pub fn duplicate_groups(
	path: &Path,
	board: &HashMap<String, bool>,
) -> OpResult<DuplicateGroups> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	let mut firsts: Vec<(Vec<u8>, String)> = Vec::new();
	let mut seen: HashMap<String, ()> = HashMap::new();
	let mut subordinates: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
	let mut files = 0u64;
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		if !board.contains_key(&head.hash_b64) {
			continue;
		}
		let entry = reader.decode();
		let Some(raw_path) = entry.path else {
			continue;
		};
		let stored = store_path(&raw_path);
		files += 1;
		if seen.insert(head.hash_b64.clone(), ()).is_none() {
			firsts.push((stored, head.hash_b64));
		} else {
			subordinates.entry(head.hash_b64).or_default().push(stored);
		}
	}
	firsts.sort();
	let blocks = firsts.len() as u64;
	debug!(
		"duplicate grouping: {} blocks over {} files in {}",
		blocks,
		files,
		path.display()
	);
	Ok(DuplicateGroups {
		firsts,
		subordinates,
		blocks,
		files,
	})
}

/// Stored filenames of records whose hash the scoreboard contains, in file
/// order (compare's short-form removal list).
pub fn select_names_by_scoreboard(
	path: &Path,
	board: &HashMap<String, bool>,
) -> OpResult<Vec<Vec<u8>>> {
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	let mut names = Vec::new();
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		if !board.contains_key(&head.hash_b64) {
			continue;
		}
		if let Some(raw_path) = reader.decode().path {
			names.push(store_path(&raw_path));
		}
	}
	Ok(names)
}

/// Pick the earlier of two 8-char hex modtimes under the 1980 rule.
pub fn earlier_mtime<'a>(a: &'a str, b: &'a str) -> &'a str {
	let a_suspect = a < SUSPECT_MTIME_FLOOR;
	let b_suspect = b < SUSPECT_MTIME_FLOOR;
	if a_suspect != b_suspect {
		if a_suspect { b } else { a }
	} else if a <= b {
		a
	} else {
		b
	}
}

/// Per-hash accumulator for consolidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consolidated {
	pub modtime: Option<String>,
	pub size: Option<String>,
}

impl Consolidated {
	/// Suffix appended to the hash at the requested output format. The
	/// effective format degrades to what the input actually carried.
	pub fn suffix(&self, format: Format) -> String {
		let mut out = String::new();
		if format >= Format::ShaMod
			&& let Some(mt) = &self.modtime
		{
			out.push_str(mt);
			if format >= Format::ShaModSize
				&& let Some(sz) = &self.size
			{
				out.push_str(sz);
			}
		}
		out
	}
}

/// Collapse a manifest to a hash-keyed map. For formats 2/3 the stored value
/// is the earliest valid modtime seen (and the size travelling with it).
/// The map iterates in ascending hash order by construction.
pub fn consolidate_collect(
	path: &Path,
	format: Format,
) -> OpResult<BTreeMap<String, Consolidated>> {
	let mut hits: BTreeMap<String, Consolidated> = BTreeMap::new();
	let mut reader = SfReader::open(path)?;
	let mut budget = ErrorBudget::new();
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		let entry = reader.decode();
		let slot = hits.entry(head.hash_b64).or_default();
		if format == Format::Sha {
			continue;
		}
		match (&slot.modtime, &entry.modtime) {
			(None, Some(mt)) => {
				slot.modtime = Some(mt.clone());
				slot.size = entry.size.clone();
			}
			(Some(have), Some(mt)) => {
				if earlier_mtime(mt, have) == mt && mt != have {
					slot.modtime = Some(mt.clone());
					slot.size = entry.size.clone();
				} else if slot.size.is_none() {
					slot.size = entry.size.clone();
				}
			}
			_ => {}
		}
	}
	Ok(hits)
}
