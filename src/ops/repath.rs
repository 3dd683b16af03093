//! `repath`: rewrite the path prefixes of a manifest's records

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{OpError, OpResult};
use crate::ops::require_input;
use crate::writer::ManifestWriter;

#[derive(Debug, Clone, Default)]
pub struct RepathOptions {
	/// Prefix to remove from every path (applied first)
	pub unfix: Option<Vec<u8>>,
	/// Prefix to prepend (applied second)
	pub prefix: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct RepathReport {
	pub rewritten: u64,
	pub errors: u64,
}

fn find_sep(s: &[u8]) -> Option<usize> {
	s.windows(2).position(|w| w == b" :")
}

/// Rewrite `…… :OLD/name` records to `…… :NEW/name`. Records whose path
/// does not begin with the unfix string are reported and skipped.
pub fn repath(input: &Path, target: Option<&Path>, opts: &RepathOptions) -> OpResult<RepathReport> {
	let unfix = opts.unfix.as_deref().unwrap_or_default();
	let prefix = opts.prefix.as_deref().unwrap_or_default();
	if unfix.is_empty() && prefix.is_empty() {
		return Err(OpError::Usage("no action to be performed".into()));
	}
	require_input(input)?;

	let mut writer = ManifestWriter::open(target, 0)?;
	let mut reader = BufReader::new(File::open(input)?);
	let mut report = RepathReport::default();
	let mut line: Vec<u8> = Vec::new();
	let mut lineno = 0u64;
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

		let (Some(space), Some(sep)) = (line.iter().position(|b| *b == b' '), find_sep(&line))
		else {
			println!("Line {lineno}: invalid format (no path field)");
			report.errors += 1;
			continue;
		};
		let id = line[..space].to_vec();
		let mut name = line[sep + 2..].to_vec();

		if !unfix.is_empty() {
			if unfix.len() >= name.len() {
				println!(
					"Line {lineno}: impossible to unfix '{}'",
					String::from_utf8_lossy(&name)
				);
				report.errors += 1;
				continue;
			}
			if !name.starts_with(unfix) {
				println!(
					"Line {lineno}: '{}' does not begin with unfix string",
					String::from_utf8_lossy(&name)
				);
				report.errors += 1;
				continue;
			}
			name.drain(..unfix.len());
		}
		if !prefix.is_empty() {
			let mut prefixed = prefix.to_vec();
			prefixed.extend_from_slice(&name);
			name = prefixed;
		}

		let mut out = id;
		out.extend_from_slice(b" :");
		out.extend_from_slice(&name);
		writer.plain_line(&out)?;
		report.rewritten += 1;
	}
	writer.close()?;
	Ok(report)
}
