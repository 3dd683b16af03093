//! `directory`: one-line summaries of signature files

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::codec::{ErrorBudget, SfReader};
use crate::error::{OpResult, SfError};
use crate::writer::with_commas;

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryOptions {
	pub grand_totals: bool,
	pub show_format: bool,
}

#[derive(Debug, Default, Clone)]
struct Summary {
	format: Option<u8>,
	files: i64,
	bytes: i64,
	date_start: String,
	date_end: String,
}

fn day(hex: &str) -> String {
	let secs = i64::from_str_radix(hex, 16).unwrap_or(0);
	DateTime::<Utc>::from_timestamp(secs, 0)
		.map(|t| t.format("%Y-%m-%d").to_string())
		.unwrap_or_default()
}

fn summarise(path: &PathBuf) -> Result<Summary, String> {
	let mut reader = match SfReader::open(path) {
		Ok(r) => r,
		Err(_) => return Err("cannot be read (check permissions)".into()),
	};
	let mut sum = Summary {
		date_start: "ffffffff".into(),
		date_end: "00000000".into(),
		..Summary::default()
	};
	let mut budget = ErrorBudget::new();
	loop {
		match reader.next_tolerant(&mut budget) {
			Ok(Some(head)) => {
				sum.format = Some(head.format.code());
				let entry = reader.decode();
				if let Some(mt) = &entry.modtime {
					if mt.as_str() < sum.date_start.as_str() {
						sum.date_start = mt.clone();
					}
					if mt.as_str() > sum.date_end.as_str() {
						sum.date_end = mt.clone();
					}
				}
				sum.bytes += entry.size_bytes().unwrap_or(0);
				sum.files += 1;
			}
			Ok(None) => break,
			Err(SfError::TooManyErrors { .. }) => return Err("invalid format".into()),
			Err(err) => return Err(err.to_string()),
		}
	}
	Ok(sum)
}

fn print_summary(name: &str, width: usize, sum: &Summary, show_format: bool) {
	print!("{name:<width$}  ");
	print!("{:>9}x  ", with_commas(sum.files));
	if sum.date_start != "ffffffff" {
		print!("{:>10}  {:>10}", day(&sum.date_start), day(&sum.date_end));
		if sum.bytes != 0 {
			print!("{:>19}", with_commas(sum.bytes));
		}
	}
	if show_format && let Some(f) = sum.format {
		print!("  (format {f})");
	}
	println!();
}

/// Print a one-line summary per file: record count, date range, declared
/// bytes. Unreadable or non-signature files are reported but do not abort
/// the listing.
pub fn directory(files: &[PathBuf], opts: &DirectoryOptions) -> OpResult<()> {
	const TOTAL_PHRASE: &str = "GRAND TOTAL";
	let width = files
		.iter()
		.map(|f| f.display().to_string().len())
		.chain([TOTAL_PHRASE.len()])
		.max()
		.unwrap_or(0);

	let mut grand = Summary {
		date_start: "ffffffff".into(),
		date_end: "00000000".into(),
		..Summary::default()
	};

	for file in files {
		if !file.exists() {
			println!("File '{}' not found", file.display());
			continue;
		}
		let name = file.display().to_string();
		match summarise(file) {
			Err(reason) => println!("File {name}: {reason}"),
			Ok(sum) => {
				grand.files += sum.files;
				grand.bytes += sum.bytes;
				if sum.date_start < grand.date_start {
					grand.date_start = sum.date_start.clone();
				}
				if sum.date_end > grand.date_end {
					grand.date_end = sum.date_end.clone();
				}
				print_summary(&name, width, &sum, opts.show_format);
			}
		}
	}

	if opts.grand_totals {
		println!();
		print_summary(TOTAL_PHRASE, width, &grand, false);
	}
	Ok(())
}
