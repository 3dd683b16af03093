//! Signature-file codec
//!
//! A signature file is an ordered sequence of `\n`-terminated lines: blank
//! lines and `#` comments are transparent; every other line is a record that
//! begins with a 43-character truncated-Base64 SHA-256 and is classified by
//! its suffix into one of five graded formats.
//!
//! The reader is two-stage: [`SfReader::next_record`] performs rapid triage
//! (enough to reject non-signature inputs quickly and classify the format),
//! and [`SfReader::decode`] extracts the fields of the last triaged line.
//! The codec never terminates the process; engines apply [`ErrorBudget`] and
//! abort with `TooManyErrors` themselves.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{SfError, SfResult};
use crate::hash::{HASH_B64_LEN, is_base64_body, is_hex};

/// Consecutive malformed lines tolerated in a single input.
pub const ERROR_TOLERANCE: u32 = 5;

/// The five graded record formats.
///
/// Formats 6..10 of the wire family (csv, native digests, raw binary) are
/// serialization-only and never parsed, so they are not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Format {
	/// Hash only
	Sha = 1,
	/// Hash + modification time
	ShaMod = 2,
	/// Hash + modification time + size
	ShaModSize = 3,
	/// Hash + modification time + size + annotations
	ShaModSizeAnnot = 4,
	/// Full record: identifier, optional annotations, encoded path
	Full = 5,
}

impl Format {
	pub fn code(self) -> u8 {
		self as u8
	}

	pub fn from_code(code: u8) -> Option<Format> {
		match code {
			1 => Some(Format::Sha),
			2 => Some(Format::ShaMod),
			3 => Some(Format::ShaModSize),
			4 => Some(Format::ShaModSizeAnnot),
			5 => Some(Format::Full),
			_ => None,
		}
	}
}

/// A fully decoded record. Hex fields keep their stored text form (they are
/// compared lexicographically far more often than they are done arithmetic
/// on); the path holds decoded OS bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
	pub hash_b64: String,
	pub modtime: Option<String>,
	pub size: Option<String>,
	pub annotations: Vec<Vec<u8>>,
	pub path: Option<Vec<u8>>,
}

impl Entry {
	pub fn modtime_secs(&self) -> Option<i64> {
		self.modtime
			.as_deref()
			.and_then(|m| i64::from_str_radix(m, 16).ok())
	}

	pub fn size_bytes(&self) -> Option<i64> {
		self.size
			.as_deref()
			.and_then(|s| i64::from_str_radix(s, 16).ok())
	}
}

/// Result of the triage stage.
#[derive(Debug, Clone)]
pub struct RecordHead {
	pub hash_b64: String,
	pub format: Format,
	pub line: u64,
}

/// Text form of a modification time: exactly 8 lowercase hex characters.
pub fn modtime_hex(secs: i64) -> String {
	format!("{:08x}", secs.max(0))
}

/// Text form of a byte size: lowercase hex, minimum width 4.
pub fn size_hex(bytes: i64) -> String {
	format!("{:04x}", bytes.max(0))
}

/// Serialize a raw path: control bytes become `\x??`, a backslash becomes
/// `\\`, everything else passes through byte-identical.
pub fn store_path(raw: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(raw.len());
	for &b in raw {
		match b {
			0x00..=0x1f => {
				out.extend_from_slice(format!("\\x{b:02x}").as_bytes());
			}
			b'\\' => out.extend_from_slice(b"\\\\"),
			_ => out.push(b),
		}
	}
	out
}

/// Exact inverse of [`store_path`]. Escape sequences the encoder never
/// produces are passed through untouched.
pub fn restore_path(stored: &[u8]) -> Vec<u8> {
	fn hex_val(b: u8) -> Option<u8> {
		match b {
			b'0'..=b'9' => Some(b - b'0'),
			b'a'..=b'f' => Some(b - b'a' + 10),
			_ => None,
		}
	}
	let mut out = Vec::with_capacity(stored.len());
	let mut i = 0;
	while i < stored.len() {
		let b = stored[i];
		if b == b'\\' && i + 1 < stored.len() {
			match stored[i + 1] {
				b'\\' => {
					out.push(b'\\');
					i += 2;
					continue;
				}
				b'x' if i + 3 < stored.len() => {
					if let (Some(hi), Some(lo)) =
						(hex_val(stored[i + 2]), hex_val(stored[i + 3]))
					{
						out.push(hi << 4 | lo);
						i += 4;
						continue;
					}
				}
				_ => {}
			}
		}
		out.push(b);
		i += 1;
	}
	out
}

/// Emit the line (without trailing newline) that [`SfReader::decode`] will
/// reverse. Missing numeric fields encode as their zero forms; a format-4
/// request without annotations degrades to format 3.
pub fn encode(entry: &Entry, format: Format) -> Vec<u8> {
	let mut line = Vec::with_capacity(HASH_B64_LEN + 16);
	line.extend_from_slice(entry.hash_b64.as_bytes());
	if format == Format::Sha {
		return line;
	}
	line.extend_from_slice(entry.modtime.as_deref().unwrap_or("00000000").as_bytes());
	if format == Format::ShaMod {
		return line;
	}
	line.extend_from_slice(entry.size.as_deref().unwrap_or("0000").as_bytes());
	if format == Format::ShaModSize {
		return line;
	}
	if !entry.annotations.is_empty() {
		for annot in &entry.annotations {
			line.push(b' ');
			line.extend_from_slice(annot);
		}
	}
	if format == Format::Full {
		line.extend_from_slice(b" :");
		line.extend_from_slice(&store_path(entry.path.as_deref().unwrap_or_default()));
	}
	line
}

/// Consecutive-error tolerance carried by engines across a single input.
#[derive(Debug)]
pub struct ErrorBudget {
	left: u32,
}

impl Default for ErrorBudget {
	fn default() -> Self {
		Self::new()
	}
}

impl ErrorBudget {
	pub fn new() -> Self {
		Self {
			left: ERROR_TOLERANCE,
		}
	}

	/// A valid record resets the run of tolerated errors.
	pub fn record_ok(&mut self) {
		self.left = ERROR_TOLERANCE;
	}

	/// Register a malformed line; returns false once the budget is spent.
	pub fn miss(&mut self) -> bool {
		if self.left == 0 {
			false
		} else {
			self.left -= 1;
			true
		}
	}
}

/// Streaming signature-file reader.
pub struct SfReader {
	input: BufReader<File>,
	path: PathBuf,
	line: u64,
	records: u64,
	raw: Vec<u8>,
	format: Format,
	space_pos: Option<usize>,
	sep_pos: Option<usize>,
}

impl SfReader {
	pub fn open(path: &Path) -> SfResult<SfReader> {
		let file = File::open(path)?;
		Ok(SfReader {
			input: BufReader::new(file),
			path: path.to_path_buf(),
			line: 0,
			records: 0,
			raw: Vec::new(),
			format: Format::Sha,
			space_pos: None,
			sep_pos: None,
		})
	}

	/// Count of valid records triaged so far. Malformed lines do not
	/// advance this.
	pub fn record_count(&self) -> u64 {
		self.records
	}

	/// Raw bytes of the last valid record line, without the newline.
	pub fn raw_line(&self) -> &[u8] {
		&self.raw
	}

	pub fn source(&self) -> &Path {
		&self.path
	}

	fn read_line(&mut self) -> SfResult<Option<Vec<u8>>> {
		let mut buf = Vec::new();
		let n = self.input.read_until(b'\n', &mut buf)?;
		if n == 0 {
			return Ok(None);
		}
		self.line += 1;
		if buf.last() == Some(&b'\n') {
			buf.pop();
		}
		if buf.last() == Some(&b'\r') {
			buf.pop();
		}
		Ok(Some(buf))
	}

	/// Advance to the next record, skipping blanks and comments. Returns
	/// `Ok(None)` on end of input; a malformed line yields
	/// `SfError::InvalidFormat` and leaves the reader usable.
	pub fn next_record(&mut self) -> SfResult<Option<RecordHead>> {
		loop {
			let Some(s) = self.read_line()? else {
				return Ok(None);
			};
			if s.is_empty() || s[0] == b'#' {
				continue;
			}
			if s.len() < HASH_B64_LEN || !is_base64_body(&s[..HASH_B64_LEN]) {
				return Err(SfError::InvalidFormat { line: self.line });
			}

			// ASCII by construction
			let hash_b64 = String::from_utf8_lossy(&s[..HASH_B64_LEN]).into_owned();

			let format = if s.len() == HASH_B64_LEN {
				self.space_pos = None;
				self.sep_pos = None;
				Format::Sha
			} else {
				match s.iter().position(|b| *b == b' ') {
					None => {
						let hex = &s[HASH_B64_LEN..];
						if !is_hex(hex) {
							return Err(SfError::InvalidFormat { line: self.line });
						}
						self.space_pos = None;
						self.sep_pos = None;
						match hex.len() {
							8 => Format::ShaMod,
							12..=22 => Format::ShaModSize,
							_ => return Err(SfError::InvalidFormat { line: self.line }),
						}
					}
					Some(pos) => {
						let hex = &s[HASH_B64_LEN..pos];
						if !is_hex(hex) || !(12..=22).contains(&hex.len()) {
							return Err(SfError::InvalidFormat { line: self.line });
						}
						if pos + 1 >= s.len() {
							// a trailing space delimits nothing
							return Err(SfError::InvalidFormat { line: self.line });
						}
						self.space_pos = Some(pos);
						match find_sep(&s, pos) {
							Some(sep) => {
								self.sep_pos = Some(sep);
								Format::Full
							}
							None => {
								self.sep_pos = None;
								Format::ShaModSizeAnnot
							}
						}
					}
				}
			};

			self.raw = s;
			self.format = format;
			self.records += 1;
			return Ok(Some(RecordHead {
				hash_b64,
				format,
				line: self.line,
			}));
		}
	}

	/// Like [`Self::next_record`], but consumes the caller's error budget on
	/// malformed lines and converts exhaustion into `TooManyErrors`.
	pub fn next_tolerant(&mut self, budget: &mut ErrorBudget) -> SfResult<Option<RecordHead>> {
		loop {
			match self.next_record() {
				Ok(Some(head)) => {
					budget.record_ok();
					return Ok(Some(head));
				}
				Ok(None) => return Ok(None),
				Err(SfError::InvalidFormat { line }) => {
					if budget.miss() {
						warn!(
							"ignoring line {} of {} - invalid format",
							line,
							self.path.display()
						);
						continue;
					}
					return Err(SfError::TooManyErrors {
						path: self.path.clone(),
					});
				}
				Err(other) => return Err(other),
			}
		}
	}

	/// Extract the fields of the last triaged record, in its stored forms.
	pub fn decode(&self) -> Entry {
		let s = &self.raw;
		let hash_b64 = String::from_utf8_lossy(&s[..HASH_B64_LEN]).into_owned();
		match self.format {
			Format::Sha => Entry {
				hash_b64,
				..Entry::default()
			},
			Format::ShaMod => Entry {
				hash_b64,
				modtime: Some(ascii(&s[43..51])),
				..Entry::default()
			},
			Format::ShaModSize => Entry {
				hash_b64,
				modtime: Some(ascii(&s[43..51])),
				size: Some(ascii(&s[51..])),
				..Entry::default()
			},
			Format::ShaModSizeAnnot => {
				let space = self.space_pos.unwrap_or(s.len());
				Entry {
					hash_b64,
					modtime: Some(ascii(&s[43..51])),
					size: Some(ascii(&s[51..space])),
					annotations: split_annotations(&s[space..]),
					path: None,
				}
			}
			Format::Full => {
				let space = self.space_pos.unwrap_or(s.len());
				let sep = self.sep_pos.unwrap_or(s.len());
				Entry {
					hash_b64,
					modtime: Some(ascii(&s[43..51])),
					size: Some(ascii(&s[51..space])),
					annotations: split_annotations(&s[space..sep]),
					path: Some(restore_path(&s[sep + 2..])),
				}
			}
		}
	}
}

/// Locate the ` :` separator that introduces the path, scanning from the
/// first space.
fn find_sep(s: &[u8], from: usize) -> Option<usize> {
	s[from..]
		.windows(2)
		.position(|w| w == b" :")
		.map(|p| p + from)
}

fn ascii(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

fn split_annotations(region: &[u8]) -> Vec<Vec<u8>> {
	region
		.split(|b| *b == b' ')
		.filter(|tok| !tok.is_empty())
		.map(|tok| tok.to_vec())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::TempDir;

	const SHA: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU";

	fn write_sf(lines: &[&[u8]]) -> (TempDir, PathBuf) {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("t.sf");
		let mut f = File::create(&path).unwrap();
		for l in lines {
			f.write_all(l).unwrap();
			f.write_all(b"\n").unwrap();
		}
		(dir, path)
	}

	#[test]
	fn classifies_all_five_formats() {
		let full = format!("{SHA}68b482da0006 :file.jpg");
		let annot = format!("{SHA}68b482da0006 P800x600");
		let annot_full = format!("{SHA}68b482da0006 P800x600 Fjpg :pics/a.jpg");
		let lines: Vec<Vec<u8>> = vec![
			SHA.as_bytes().to_vec(),
			format!("{SHA}68b482da").into_bytes(),
			format!("{SHA}68b482da0006").into_bytes(),
			annot.into_bytes(),
			full.into_bytes(),
			annot_full.into_bytes(),
		];
		let refs: Vec<&[u8]> = lines.iter().map(|l| l.as_slice()).collect();
		let (_dir, path) = write_sf(&refs);
		let mut r = SfReader::open(&path).unwrap();
		let mut seen = Vec::new();
		while let Some(head) = r.next_record().unwrap() {
			seen.push(head.format);
		}
		assert_eq!(
			seen,
			vec![
				Format::Sha,
				Format::ShaMod,
				Format::ShaModSize,
				Format::ShaModSizeAnnot,
				Format::Full,
				Format::Full,
			]
		);
		assert_eq!(r.record_count(), 6);
	}

	#[test]
	fn skips_blanks_and_comments_but_tracks_lines() {
		let rec = format!("{SHA}68b482da0006 :a.txt");
		let (_dir, path) = write_sf(&[b"# header", b"", rec.as_bytes()]);
		let mut r = SfReader::open(&path).unwrap();
		let head = r.next_record().unwrap().unwrap();
		assert_eq!(head.line, 3);
		assert_eq!(head.hash_b64, SHA);
		assert!(r.next_record().unwrap().is_none());
	}

	#[test]
	fn rejects_lines_with_foreign_hash_bytes() {
		let mut bad = SHA.as_bytes().to_vec();
		bad[10] = b'!';
		let (_dir, path) = write_sf(&[&bad]);
		let mut r = SfReader::open(&path).unwrap();
		assert!(matches!(
			r.next_record(),
			Err(SfError::InvalidFormat { line: 1 })
		));
		assert_eq!(r.record_count(), 0);
	}

	#[test]
	fn rejects_truncated_fields() {
		// 43 + 5 hex characters ends mid-field and is never salvaged
		let bad = format!("{SHA}68b48");
		let (_dir, path) = write_sf(&[bad.as_bytes()]);
		let mut r = SfReader::open(&path).unwrap();
		assert!(r.next_record().is_err());

		// a trailing space with nothing after it delimits nothing
		let bad = format!("{SHA}68b482da0006 ");
		let (_dir, path) = write_sf(&[bad.as_bytes()]);
		let mut r = SfReader::open(&path).unwrap();
		assert!(r.next_record().is_err());
	}

	#[test]
	fn accepts_wide_size_fields() {
		let rec = format!("{SHA}68b482da00000000012345"); // 14 hex of size
		let (_dir, path) = write_sf(&[rec.as_bytes()]);
		let mut r = SfReader::open(&path).unwrap();
		let head = r.next_record().unwrap().unwrap();
		assert_eq!(head.format, Format::ShaModSize);
		let e = r.decode();
		assert_eq!(e.size.as_deref(), Some("00000000012345"));
	}

	#[test]
	fn decode_extracts_fields_and_path() {
		let rec = format!("{SHA}68b482da0006 P800x600 :pics/a.jpg");
		let (_dir, path) = write_sf(&[rec.as_bytes()]);
		let mut r = SfReader::open(&path).unwrap();
		r.next_record().unwrap().unwrap();
		let e = r.decode();
		assert_eq!(e.hash_b64, SHA);
		assert_eq!(e.modtime.as_deref(), Some("68b482da"));
		assert_eq!(e.size.as_deref(), Some("0006"));
		assert_eq!(e.annotations, vec![b"P800x600".to_vec()]);
		assert_eq!(e.path.as_deref(), Some(b"pics/a.jpg".as_slice()));
		assert_eq!(e.modtime_secs(), Some(0x68b482da));
		assert_eq!(e.size_bytes(), Some(6));
	}

	#[test]
	fn encode_decode_round_trips_full_records() {
		let entry = Entry {
			hash_b64: SHA.to_string(),
			modtime: Some("68b482da".into()),
			size: Some("0006".into()),
			annotations: vec![b"P800x600".to_vec(), b"Fjpg".to_vec()],
			path: Some(b"dir/na\x01me\\x".to_vec()),
		};
		let line = encode(&entry, Format::Full);
		let (_dir, path) = write_sf(&[&line]);
		let mut r = SfReader::open(&path).unwrap();
		let head = r.next_record().unwrap().unwrap();
		assert_eq!(head.format, Format::Full);
		assert_eq!(r.decode(), entry);
	}

	#[test]
	fn encode_emits_reduced_formats() {
		let entry = Entry {
			hash_b64: SHA.to_string(),
			modtime: Some("68b482da".into()),
			size: Some("0006".into()),
			..Entry::default()
		};
		assert_eq!(encode(&entry, Format::Sha), SHA.as_bytes());
		assert_eq!(
			encode(&entry, Format::ShaMod),
			format!("{SHA}68b482da").as_bytes()
		);
		assert_eq!(
			encode(&entry, Format::ShaModSize),
			format!("{SHA}68b482da0006").as_bytes()
		);
		// format 4 with no annotations degrades to format 3
		assert_eq!(
			encode(&entry, Format::ShaModSizeAnnot),
			format!("{SHA}68b482da0006").as_bytes()
		);
	}

	#[test]
	fn path_escaping_is_the_identity_under_round_trip() {
		let cases: Vec<Vec<u8>> = vec![
			b"plain/name.txt".to_vec(),
			b"back\\slash".to_vec(),
			b"ctl\x00\x01\x1f.bin".to_vec(),
			"utf8/\u{00e9}\u{4e16}\u{754c}.txt".as_bytes().to_vec(),
			(0u8..=0x1f).collect(),
			b"\xff\xfe raw bytes".to_vec(),
		];
		for raw in cases {
			let stored = store_path(&raw);
			assert_eq!(restore_path(&stored), raw, "case {raw:?}");
			// stored form never contains raw control bytes
			assert!(stored.iter().all(|b| *b >= 0x20));
		}
	}

	#[test]
	fn store_path_escapes_exactly_ctl_and_backslash() {
		assert_eq!(store_path(b"a\nb"), b"a\\x0ab");
		assert_eq!(store_path(b"a\\b"), b"a\\\\b");
		assert_eq!(store_path(b"a b:c"), b"a b:c");
	}

	#[test]
	fn modtime_and_size_text_forms() {
		assert_eq!(modtime_hex(0x68b482da), "68b482da");
		assert_eq!(modtime_hex(1), "00000001");
		assert_eq!(size_hex(6), "0006");
		assert_eq!(size_hex(0x123456789), "123456789");
	}

	#[test]
	fn tolerant_reader_survives_scattered_errors() {
		let rec = format!("{SHA}68b482da0006 :ok.txt");
		let (_dir, path) = write_sf(&[
			b"not a record at all but long enough to look at 43",
			rec.as_bytes(),
			b"another bad line that is not base64 at all....!",
			rec.as_bytes(),
		]);
		let mut r = SfReader::open(&path).unwrap();
		let mut budget = ErrorBudget::new();
		let mut n = 0;
		while r.next_tolerant(&mut budget).unwrap().is_some() {
			n += 1;
		}
		assert_eq!(n, 2);
	}

	#[test]
	fn tolerant_reader_aborts_after_five_consecutive_errors() {
		let bad: Vec<&[u8]> = vec![b"bad line one that cannot possibly be a hash!!!!!!"; 6];
		let (_dir, path) = write_sf(&bad);
		let mut r = SfReader::open(&path).unwrap();
		let mut budget = ErrorBudget::new();
		let err = r.next_tolerant(&mut budget).unwrap_err();
		assert!(matches!(err, SfError::TooManyErrors { .. }));
	}
}
