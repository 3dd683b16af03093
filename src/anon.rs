//! Anonymiser
//!
//! Reduces a manifest to a deduplicated, sorted hash-only projection. Useful
//! when a signature file must not disclose filenames (customer lists,
//! account codes) yet still support comparisons and detection. Formats 4 and
//! 5 would carry the very information being removed and are refused.

use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::codec::{ErrorBudget, Format, SfReader, modtime_hex, size_hex};
use crate::error::{OpError, OpResult};
use crate::hash::{EMPTY_HASH_B64, Sha256Bin, b64_of};
use crate::writer::ManifestWriter;

#[derive(Debug, Clone, Copy)]
pub struct AnonOptions {
	/// Output format, 1..=3
	pub format: Format,
	/// Drop the well-known empty-file hash
	pub no_empty: bool,
	/// Approximate number of decoy records to add (0 = off)
	pub chaff: u64,
}

#[derive(Debug, Default)]
pub struct AnonReport {
	pub records: u64,
	pub unique: u64,
	pub chaff_added: u64,
}

fn suffix_for(entry: &crate::codec::Entry, format: Format) -> String {
	let mut out = String::new();
	if format >= Format::ShaMod
		&& let Some(mt) = &entry.modtime
	{
		out.push_str(mt);
		if format >= Format::ShaModSize
			&& let Some(sz) = &entry.size
		{
			out.push_str(sz);
		}
	}
	out
}

/// Reduce `input` to hashes (plus modtime/size at formats 2/3), dedupe,
/// sort ascending, and write to `target` or stdout.
pub fn anonymise(input: &Path, target: Option<&Path>, opts: &AnonOptions) -> OpResult<AnonReport> {
	if opts.format > Format::ShaModSize {
		return Err(OpError::Usage(
			"anonymise only accepts formats 1, 2 and 3".into(),
		));
	}
	if !input.exists() {
		return Err(OpError::InputMissing {
			path: input.to_path_buf(),
		});
	}

	let mut reader = SfReader::open(input)?;
	let mut budget = ErrorBudget::new();
	let mut map: BTreeMap<String, String> = BTreeMap::new();
	while let Some(head) = reader.next_tolerant(&mut budget)? {
		if opts.no_empty && head.hash_b64 == EMPTY_HASH_B64 {
			continue;
		}
		let entry = reader.decode();
		map.entry(head.hash_b64)
			.or_insert_with(|| suffix_for(&entry, opts.format));
	}
	let records = reader.record_count();
	if map.is_empty() {
		return Err(OpError::NothingToDo("nothing found to anonymise".into()));
	}
	let unique = map.len() as u64;

	// decoy records deny cardinality analysis; the count itself is jittered
	let mut chaff_added = 0u64;
	if opts.chaff > 0 {
		let mut rng = rand::rng();
		let n = opts.chaff * rng.random_range(80..=120) / 100;
		for _ in 0..n {
			let mut bin: Sha256Bin = [0; 32];
			rng.fill(&mut bin[..]);
			let suffix = match opts.format {
				Format::Sha => String::new(),
				Format::ShaMod => modtime_hex(rng.random::<u32>() as i64),
				_ => {
					modtime_hex(rng.random::<u32>() as i64)
						+ &size_hex(rng.random_range(0..0x1000000))
				}
			};
			if map.insert(b64_of(&bin), suffix).is_none() {
				chaff_added += 1;
			}
		}
		debug!("anonymise: {chaff_added} chaff records mixed in");
	}

	let mut writer = ManifestWriter::open(target, 0)?;
	for (hash, suffix) in &map {
		writer.plain_line(format!("{hash}{suffix}").as_bytes())?;
	}
	writer.close()?;
	info!("anonymise: {records} records reduced to {unique} hashes");

	Ok(AnonReport {
		records,
		unique,
		chaff_added,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn sha(ch: char) -> String {
		ch.to_string().repeat(43)
	}

	fn input(dir: &TempDir) -> std::path::PathBuf {
		let path = dir.path().join("in.sf");
		let lines = [
			format!("{}68b482da0006 :one.txt", sha('B')),
			format!("{}58b482da0002 :two.txt", sha('A')),
			format!("{}68b482da0006 :copy.txt", sha('B')),
			format!("{EMPTY_HASH_B64}68b482da0000 :empty.txt"),
		];
		fs::write(&path, lines.join("\n") + "\n").unwrap();
		path
	}

	#[test]
	fn dedupes_sorts_and_strips_to_format_one() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		let report = anonymise(
			&input(&dir),
			Some(&out),
			&AnonOptions {
				format: Format::Sha,
				no_empty: false,
				chaff: 0,
			},
		)
		.unwrap();
		assert_eq!(report.records, 4);
		assert_eq!(report.unique, 3);
		let text = fs::read_to_string(&out).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines.len(), 3);
		assert!(lines.iter().all(|l| l.len() == 43));
		let mut sorted = lines.clone();
		sorted.sort();
		assert_eq!(lines, sorted);
	}

	#[test]
	fn no_empty_drops_the_empty_file_hash() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		let report = anonymise(
			&input(&dir),
			Some(&out),
			&AnonOptions {
				format: Format::Sha,
				no_empty: true,
				chaff: 0,
			},
		)
		.unwrap();
		assert_eq!(report.unique, 2);
		let text = fs::read_to_string(&out).unwrap();
		assert!(!text.contains(EMPTY_HASH_B64));
		assert_eq!(text.lines().count(), 2);
	}

	#[test]
	fn format_two_keeps_modtimes() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		anonymise(
			&input(&dir),
			Some(&out),
			&AnonOptions {
				format: Format::ShaMod,
				no_empty: true,
				chaff: 0,
			},
		)
		.unwrap();
		let text = fs::read_to_string(&out).unwrap();
		for line in text.lines() {
			assert_eq!(line.len(), 51);
		}
		assert!(text.contains(&format!("{}58b482da", sha('A'))));
	}

	#[test]
	fn chaff_inflates_the_record_count() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		let report = anonymise(
			&input(&dir),
			Some(&out),
			&AnonOptions {
				format: Format::ShaModSize,
				no_empty: false,
				chaff: 50,
			},
		)
		.unwrap();
		assert!(report.chaff_added >= 40 && report.chaff_added <= 60);
		let text = fs::read_to_string(&out).unwrap();
		assert_eq!(text.lines().count() as u64, 3 + report.chaff_added);
	}

	#[test]
	fn refuses_identifying_formats() {
		let dir = TempDir::new().unwrap();
		let err = anonymise(
			&input(&dir),
			None,
			&AnonOptions {
				format: Format::Full,
				no_empty: false,
				chaff: 0,
			},
		)
		.unwrap_err();
		assert_eq!(err.exit_code(), 8);
	}

	#[test]
	fn empty_input_is_reported() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("none.sf");
		fs::write(&path, "# only a comment\n").unwrap();
		let err = anonymise(
			&path,
			None,
			&AnonOptions {
				format: Format::Sha,
				no_empty: false,
				chaff: 0,
			},
		)
		.unwrap_err();
		assert!(matches!(err, OpError::NothingToDo(_)));
	}
}
