//! Content hashing (streaming SHA-256 with the truncated-Base64 identity)

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::SfResult;

/// Raw 32-byte SHA-256 digest.
pub type Sha256Bin = [u8; 32];

/// Length of the textual hash form used inside signature files.
pub const HASH_B64_LEN: usize = 43;

/// Truncated-Base64 hash of the empty file.
pub const EMPTY_HASH_B64: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU";

/// Hash a file's contents without holding the whole file in memory.
///
/// Returns the raw digest together with its 43-character wire form. Open
/// and read failures surface as `SfError::Io`; the caller decides whether
/// to abort or skip.
pub fn hash_file(path: &Path) -> SfResult<(Sha256Bin, String)> {
	let mut file = File::open(path)?;
	let mut hasher = Sha256::new();
	let mut buf = [0u8; 64 * 1024];
	loop {
		let n = file.read(&mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	let bin: Sha256Bin = hasher.finalize().into();
	Ok((bin, b64_of(&bin)))
}

/// Encode a digest as its 43-character truncated standard-Base64 form.
///
/// Standard Base64 of 32 bytes is always 44 characters ending in a single
/// `=`; the wire form is those 44 characters with the padding stripped.
pub fn b64_of(sha: &Sha256Bin) -> String {
	let mut full = BASE64_STANDARD.encode(sha);
	debug_assert!(full.len() == 44 && full.ends_with('='));
	full.truncate(HASH_B64_LEN);
	full
}

/// Decode a 43-character wire hash back to its 32 raw bytes.
///
/// Returns `None` for anything that is not a canonical truncated-Base64
/// digest (wrong length, foreign characters, non-zero padding bits).
pub fn b64_to_bin(s: &str) -> Option<Sha256Bin> {
	if s.len() != HASH_B64_LEN {
		return None;
	}
	let mut padded = String::with_capacity(44);
	padded.push_str(s);
	padded.push('=');
	let bytes = BASE64_STANDARD.decode(padded).ok()?;
	bytes.try_into().ok()
}

/// Lowercase hexadecimal form, used only for sha256sum interoperation.
pub fn hex_of(sha: &Sha256Bin) -> String {
	let mut out = String::with_capacity(64);
	for b in sha {
		out.push_str(&format!("{b:02x}"));
	}
	out
}

/// Whether every byte is in the Base64 alphabet `[A-Za-z0-9+/]`.
pub fn is_base64_body(bytes: &[u8]) -> bool {
	bytes
		.iter()
		.all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
}

/// Whether every byte is a lowercase hex digit.
pub fn is_hex(bytes: &[u8]) -> bool {
	bytes
		.iter()
		.all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn empty_file_has_the_well_known_hash() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("empty");
		fs::write(&path, b"").unwrap();
		let (bin, b64) = hash_file(&path).unwrap();
		assert_eq!(b64, EMPTY_HASH_B64);
		assert_eq!(b64.len(), HASH_B64_LEN);
		assert_eq!(b64_to_bin(&b64), Some(bin));
	}

	#[test]
	fn digest_round_trips_through_base64() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("f");
		fs::write(&path, b"hello\n").unwrap();
		let (bin, b64) = hash_file(&path).unwrap();
		assert_eq!(b64.len(), 43);
		assert!(is_base64_body(b64.as_bytes()));
		assert_eq!(b64_to_bin(&b64), Some(bin));
		assert_eq!(hex_of(&bin).len(), 64);
	}

	#[test]
	fn streaming_matches_one_shot() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("big");
		let data = vec![0xabu8; 200 * 1024];
		fs::write(&path, &data).unwrap();
		let (bin, _) = hash_file(&path).unwrap();
		let expect: Sha256Bin = Sha256::digest(&data).into();
		assert_eq!(bin, expect);
	}

	#[test]
	fn missing_file_is_an_io_error() {
		assert!(hash_file(Path::new("/no/such/file")).is_err());
	}

	#[test]
	fn rejects_foreign_tokens() {
		assert!(!is_base64_body(b"abc ="));
		assert!(!is_base64_body(b"abc-_"));
		assert!(is_base64_body(b"AZaz09+/"));
		assert!(is_hex(b"0123456789abcdef"));
		assert!(!is_hex(b"ABCDEF"));
		assert!(!is_hex(b"12g4"));
	}

	#[test]
	fn b64_to_bin_rejects_bad_lengths() {
		assert!(b64_to_bin("short").is_none());
		assert!(b64_to_bin(&"A".repeat(44)).is_none());
	}
}
