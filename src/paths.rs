//! Path/byte conversions
//!
//! Signature files carry path names as the exact byte sequence the operating
//! system reported, so the crate moves paths around as `Vec<u8>` and only
//! converts at the filesystem boundary.

use std::path::{Path, PathBuf};

/// Bytes of a path exactly as the OS stores them (Unix). On other platforms
/// the conversion is lossy, matching what the rest of the ecosystem does.
#[cfg(unix)]
pub fn path_bytes(path: &Path) -> Vec<u8> {
	use std::os::unix::ffi::OsStrExt;
	path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
pub fn path_bytes(path: &Path) -> Vec<u8> {
	path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
	use std::ffi::OsStr;
	use std::os::unix::ffi::OsStrExt;
	PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
	PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Lossy rendering for diagnostics and reports.
pub fn display(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

/// Strip a leading `./` so that walking the current directory yields the
/// bare relative names that appear in manifests.
pub fn strip_dot_slash(bytes: &[u8]) -> &[u8] {
	bytes.strip_prefix(b"./").unwrap_or(bytes)
}
