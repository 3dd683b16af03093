//! `consolidate`: collapse a manifest to one record per hash

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::algebra::consolidate_collect;
use crate::codec::Format;
use crate::error::{OpError, OpResult};
use crate::ops::require_input;
use crate::writer::ManifestWriter;

#[derive(Debug, Clone, Copy)]
pub struct ConsolidateOptions {
	/// Output format 1..=3 (default 3)
	pub format_code: u8,
	/// Replace the input file via a `.temp` staging file
	pub overwrite: bool,
}

impl Default for ConsolidateOptions {
	fn default() -> Self {
		ConsolidateOptions {
			format_code: 3,
			overwrite: false,
		}
	}
}

/// De-duplicate a manifest by hash, keeping the earliest valid modtime per
/// hash (pre-1980 values lose to any later valid one). Output is ascending
/// by hash, at the requested reduced format. The result is useful as a
/// destroy-list or a re-patch-origin-dates source.
pub fn consolidate(
	input: &Path,
	target: Option<&Path>,
	opts: &ConsolidateOptions,
) -> OpResult<u64> {
	let format = Format::from_code(opts.format_code)
		.filter(|f| *f <= Format::ShaModSize)
		.ok_or_else(|| {
			OpError::Usage(format!(
				"format {} invalid - consolidate only accepts formats 1, 2 and 3",
				opts.format_code
			))
		})?;
	require_input(input)?;
	if opts.overwrite && target.is_some() {
		return Err(OpError::Usage(
			"choose either a target file or --overwrite, not both".into(),
		));
	}

	let staged: Option<PathBuf> = opts.overwrite.then(|| {
		let mut os: OsString = input.as_os_str().to_os_string();
		os.push(".temp");
		PathBuf::from(os)
	});
	let sink = staged.as_deref().or(target);

	let hits = consolidate_collect(input, format)?;
	let unique = hits.len() as u64;

	let mut writer = ManifestWriter::open(sink, 0)?;
	for (hash, value) in &hits {
		writer.plain_line(format!("{hash}{}", value.suffix(format)).as_bytes())?;
	}
	writer.close()?;

	if let Some(temp) = staged {
		fs::remove_file(input)?;
		fs::rename(&temp, input)?;
	}
	info!("consolidate: {} unique hashes from {}", unique, input.display());
	Ok(unique)
}
