//! Buffered manifest sink with change counters and flush policy

use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::codec::{Entry, Format, encode, store_path};
use crate::error::{OpError, OpResult};
use crate::paths::display;

const FILE_BUFFER: usize = 64 * 1024;
// small stdout buffer keeps piped output near-real-time
const STDOUT_BUFFER: usize = 512;
const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Record disposition tags produced by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
	New,
	Changed,
	Unchanged,
	Verified,
	Deleted,
}

/// Change counters maintained across one write session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
	pub new: u64,
	pub changed: u64,
	pub deleted: u64,
	pub unchanged: u64,
	pub total_files: u64,
	pub total_bytes: i64,
}

impl Counters {
	/// Classified changes (new, changed, deleted). Drives the exit-code
	/// policy and the decision to keep or discard an overwrite temp file.
	pub fn changes(&self) -> u64 {
		self.new + self.changed + self.deleted
	}
}

#[derive(Debug)]
enum Sink {
	File(BufWriter<File>),
	Stdout(BufWriter<Stdout>),
}

impl Sink {
	fn writer(&mut self) -> &mut dyn Write {
		match self {
			Sink::File(w) => w,
			Sink::Stdout(w) => w,
		}
	}
}

/// Buffered writer for signature files and related line outputs.
#[derive(Debug)]
pub struct ManifestWriter {
	sink: Sink,
	counters: Counters,
	verbosity: u8,
	dot: u64,
	last_flush: Instant,
}

impl ManifestWriter {
	/// Open a sink: a named file, or stdout when no target is given.
	pub fn open(target: Option<&Path>, verbosity: u8) -> OpResult<ManifestWriter> {
		let sink = match target {
			Some(path) => {
				let file = File::create(path).map_err(|source| OpError::Create {
					path: path.to_path_buf(),
					source,
				})?;
				Sink::File(BufWriter::with_capacity(FILE_BUFFER, file))
			}
			None => Sink::Stdout(BufWriter::with_capacity(STDOUT_BUFFER, io::stdout())),
		};
		Ok(ManifestWriter {
			sink,
			counters: Counters::default(),
			verbosity,
			dot: 0,
			last_flush: Instant::now(),
		})
	}

	pub fn counters(&self) -> &Counters {
		&self.counters
	}

	fn count(&mut self, tag: Tag) {
		match tag {
			Tag::New => self.counters.new += 1,
			Tag::Changed => self.counters.changed += 1,
			Tag::Unchanged | Tag::Verified => self.counters.unchanged += 1,
			Tag::Deleted => self.counters.deleted += 1,
		}
	}

	/// Terminal commentary: dots at verbosity 1, explanation lines at 2.
	fn report(&mut self, tag: Tag, name: &[u8], nbytes: i64, flags: &str) {
		self.dot += 1;
		match self.verbosity {
			1 if matches!(tag, Tag::New | Tag::Changed) => {
				if self.dot % 100 == 0 {
					print!(".");
					let _ = io::stdout().flush();
				}
			}
			2 if tag != Tag::Unchanged => {
				let shown = display(&store_path(name));
				let mut msg = match tag {
					Tag::New => format!("  New: {shown}"),
					Tag::Changed => format!("  Chg: {shown}"),
					Tag::Verified => format!("  N/C: {shown} (verified)"),
					Tag::Deleted => format!("  Del: {shown}"),
					Tag::Unchanged => unreachable!(),
				};
				if tag == Tag::Changed {
					for (flag, label) in [("T", " [Time]"), ("S", " [Size]"), ("H", " [Hash]")] {
						if flags.contains(flag) {
							msg.push_str(label);
						}
					}
				}
				if nbytes > 1024 * 1024 {
					msg.push_str(&format!(" ({}MB)", with_commas(nbytes / (1024 * 1024))));
				}
				println!("{msg}");
			}
			_ => {}
		}
	}

	fn push_line(&mut self, line: &[u8]) -> OpResult<()> {
		let w = self.sink.writer();
		w.write_all(line)?;
		w.write_all(b"\n")?;
		if self.last_flush.elapsed() >= FLUSH_INTERVAL {
			self.flush()?;
		}
		Ok(())
	}

	/// Classify, count, and (unless suppressed or deleted) emit a record.
	pub fn record(
		&mut self,
		emit: bool,
		format: Format,
		tag: Tag,
		entry: &Entry,
		flags: &str,
	) -> OpResult<()> {
		self.count(tag);
		let name = entry.path.clone().unwrap_or_default();
		let nbytes = entry.size_bytes().unwrap_or(0);
		self.report(tag, &name, nbytes, flags);
		if emit && tag != Tag::Deleted {
			let line = encode(entry, format);
			self.push_line(&line)?;
			self.counters.total_files += 1;
			self.counters.total_bytes += nbytes;
		}
		Ok(())
	}

	/// Pass an unchanged record through byte-identically (U and V tags).
	pub fn record_raw(
		&mut self,
		emit: bool,
		tag: Tag,
		raw: &[u8],
		name: &[u8],
		nbytes: i64,
	) -> OpResult<()> {
		self.count(tag);
		self.report(tag, name, nbytes, "");
		if emit && tag != Tag::Deleted {
			self.push_line(raw)?;
			self.counters.total_files += 1;
			self.counters.total_bytes += nbytes;
		}
		Ok(())
	}

	/// One GNU sha256sum line: `<hex><two spaces><raw path>`.
	pub fn record_sum(&mut self, hex: &str, path: &[u8], nbytes: i64) -> OpResult<()> {
		let mut line = Vec::with_capacity(66 + path.len());
		line.extend_from_slice(hex.as_bytes());
		line.extend_from_slice(b"  ");
		line.extend_from_slice(path);
		self.push_line(&line)?;
		self.counters.total_files += 1;
		self.counters.total_bytes += nbytes;
		Ok(())
	}

	/// Arbitrary pre-formed line (consolidate / anonymise output).
	pub fn plain_line(&mut self, line: &[u8]) -> OpResult<()> {
		self.push_line(line)
	}

	/// Comment trailer line.
	pub fn comment(&mut self, text: &str) -> OpResult<()> {
		self.push_line(format!("# {text}").as_bytes())
	}

	/// Grand-totals trailer.
	pub fn totals_comment(&mut self) -> OpResult<()> {
		let c = self.counters;
		self.comment(&format!("{} files, {} bytes", c.total_files, c.total_bytes))
	}

	pub fn flush(&mut self) -> OpResult<()> {
		self.sink.writer().flush()?;
		self.last_flush = Instant::now();
		Ok(())
	}

	/// Flush, sync file sinks to disk, and return the final counters.
	pub fn close(mut self) -> OpResult<Counters> {
		self.flush()?;
		if let Sink::File(w) = &mut self.sink {
			w.get_ref().sync_all()?;
		}
		Ok(self.counters)
	}
}

/// Decimal rendering with thousands separators, for report tables.
pub fn with_commas(n: i64) -> String {
	let digits = n.abs().to_string();
	let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
	if n < 0 {
		out.push('-');
	}
	let lead = digits.len() % 3;
	for (i, ch) in digits.chars().enumerate() {
		if i != 0 && (i + 3 - lead) % 3 == 0 {
			out.push(',');
		}
		out.push(ch);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const SHA: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU";

	fn entry(path: &str) -> Entry {
		Entry {
			hash_b64: SHA.to_string(),
			modtime: Some("68b482da".into()),
			size: Some("0006".into()),
			annotations: vec![],
			path: Some(path.as_bytes().to_vec()),
		}
	}

	#[test]
	fn writes_records_and_counts_by_tag() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		let mut w = ManifestWriter::open(Some(&out), 0).unwrap();
		w.record(true, Format::Full, Tag::New, &entry("a.txt"), "").unwrap();
		w.record(true, Format::Full, Tag::Changed, &entry("b.txt"), "TH")
			.unwrap();
		w.record(true, Format::Full, Tag::Deleted, &entry("c.txt"), "")
			.unwrap();
		w.record_raw(true, Tag::Unchanged, format!("{SHA}68b482da0006 :d.txt").as_bytes(), b"d.txt", 6)
			.unwrap();
		let c = w.close().unwrap();
		assert_eq!((c.new, c.changed, c.deleted, c.unchanged), (1, 1, 1, 1));
		assert_eq!(c.changes(), 3);
		// deleted records are never emitted
		assert_eq!(c.total_files, 3);
		assert_eq!(c.total_bytes, 18);
		let text = fs::read_to_string(&out).unwrap();
		assert_eq!(text.lines().count(), 3);
		assert!(!text.contains("c.txt"));
		assert!(text.ends_with('\n'));
	}

	#[test]
	fn sum_lines_use_two_spaces_and_raw_path() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("sums");
		let mut w = ManifestWriter::open(Some(&out), 0).unwrap();
		w.record_sum(&"ab".repeat(32), b"a b.txt", 3).unwrap();
		w.close().unwrap();
		let text = fs::read_to_string(&out).unwrap();
		assert_eq!(text, format!("{}  a b.txt\n", "ab".repeat(32)));
	}

	#[test]
	fn trailer_comments() {
		let dir = TempDir::new().unwrap();
		let out = dir.path().join("out.sf");
		let mut w = ManifestWriter::open(Some(&out), 0).unwrap();
		w.record(true, Format::Full, Tag::New, &entry("a.txt"), "").unwrap();
		w.totals_comment().unwrap();
		w.close().unwrap();
		let text = fs::read_to_string(&out).unwrap();
		assert!(text.contains("# 1 files, 6 bytes"));
	}

	#[test]
	fn refuses_uncreatable_targets() {
		let err = ManifestWriter::open(Some(Path::new("/no/such/dir/out.sf")), 0).unwrap_err();
		assert_eq!(err.exit_code(), 4);
	}

	#[test]
	fn comma_grouping() {
		assert_eq!(with_commas(0), "0");
		assert_eq!(with_commas(999), "999");
		assert_eq!(with_commas(1000), "1,000");
		assert_eq!(with_commas(1234567), "1,234,567");
		assert_eq!(with_commas(-1234), "-1,234");
	}
}
