//! Tree walking
//!
//! A walker runs on its own thread and feeds a bounded queue; the consuming
//! engine keeps hashing while the walker keeps the queue topped up. Entries
//! are visited in lexicographic byte order per directory, which is what the
//! update engine's merge-join and the manifest sort invariant rely on.

use async_channel::{Receiver, bounded};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{OpError, OpResult};
use crate::paths::{path_bytes, strip_dot_slash};

/// Capacity of the walker-to-engine queue.
pub const QUEUE_CAPACITY: usize = 4096;

/// One live filesystem entry: the path bytes as reported by the OS plus the
/// stat fields the signature format records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntry {
	pub path: Vec<u8>,
	pub modtime: i64,
	pub size: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
	/// Skip dot-named entries, prune dot directories, and drop any path
	/// containing `/.`
	pub no_dot: bool,
	/// Single-level listing, no recursion
	pub cwd_only: bool,
}

/// Fail early (exit-code 5 class) when the starting directory itself cannot
/// be read; deeper unreadable directories are warned about and skipped.
pub fn check_root(root: &Path) -> OpResult<()> {
	std::fs::read_dir(root).map_err(|_| OpError::DirRead {
		path: root.to_path_buf(),
	})?;
	Ok(())
}

fn dot_named(entry: &walkdir::DirEntry) -> bool {
	entry.depth() > 0 && entry.file_name().as_encoded_bytes().starts_with(b".")
}

fn builder(root: &Path, opts: WalkOptions) -> WalkDir {
	let mut wd = WalkDir::new(root).sort_by_file_name();
	if opts.cwd_only {
		wd = wd.max_depth(1);
	}
	wd
}

/// Spawn the file producer. Regular files become [`LiveEntry`]s; symlinks
/// and other non-regular entries are silently skipped; unreadable
/// directories are warned about on the diagnostic channel and skipped.
pub fn spawn_file_walk(root: PathBuf, opts: WalkOptions) -> Receiver<LiveEntry> {
	let (tx, rx) = bounded::<LiveEntry>(QUEUE_CAPACITY);
	std::thread::spawn(move || {
		let iter = builder(&root, opts)
			.into_iter()
			.filter_entry(move |e| !(opts.no_dot && dot_named(e)));
		for entry in iter {
			let entry = match entry {
				Ok(e) => e,
				Err(err) => {
					warn!("walk: skipping unreadable entry: {err}");
					continue;
				}
			};
			if !entry.file_type().is_file() {
				continue;
			}
			let meta = match entry.metadata() {
				Ok(m) => m,
				Err(err) => {
					warn!("walk: skipping {} (metadata: {err})", entry.path().display());
					continue;
				}
			};
			let raw = path_bytes(entry.path());
			let path = strip_dot_slash(&raw).to_vec();
			if opts.no_dot && (path.starts_with(b".") || path.windows(2).any(|w| w == b"/.")) {
				continue;
			}
			let modtime = meta
				.modified()
				.ok()
				.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
				.map(|d| d.as_secs() as i64)
				.unwrap_or(0);
			let live = LiveEntry {
				path,
				modtime,
				size: meta.len() as i64,
			};
			if tx.send_blocking(live).is_err() {
				break;
			}
		}
	});
	rx
}

/// Spawn the directory producer, used by the detector's registration phase.
/// The starting directory itself is yielded first.
pub fn spawn_dir_walk(root: PathBuf, opts: WalkOptions) -> Receiver<PathBuf> {
	let (tx, rx) = bounded::<PathBuf>(QUEUE_CAPACITY);
	std::thread::spawn(move || {
		let iter = builder(&root, opts)
			.into_iter()
			.filter_entry(move |e| !(opts.no_dot && dot_named(e)));
		for entry in iter {
			let entry = match entry {
				Ok(e) => e,
				Err(err) => {
					warn!("walk: skipping unreadable entry: {err}");
					continue;
				}
			};
			if !entry.file_type().is_dir() {
				continue;
			}
			if tx.send_blocking(entry.path().to_path_buf()).is_err() {
				break;
			}
		}
	});
	rx
}

/// Drain a receiver into a vector (small trees, tests, registration).
pub fn collect_files(rx: Receiver<LiveEntry>) -> Vec<LiveEntry> {
	let mut out = Vec::new();
	while let Ok(e) = rx.recv_blocking() {
		out.push(e);
	}
	out
}
