//! Incremental update engine
//!
//! A classical two-stream merge-join: the sorted manifest on one side, the
//! sorted live walk on the other. Each file is classified as New, Deleted,
//! Unchanged, Verified, or Changed; unchanged records pass through
//! byte-identically. Overwrites are staged to `<manifest>.temp` and renamed
//! into place only when something actually changed, so a no-change run never
//! touches the original file.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::codec::{Entry, ErrorBudget, Format, SfReader, modtime_hex, size_hex};
use crate::error::{OpError, OpResult, SfError};
use crate::hash::hash_file;
use crate::paths::{display, path_from_bytes};
use crate::walk::{LiveEntry, WalkOptions, check_root, spawn_file_walk};
use crate::writer::{Counters, ManifestWriter, Tag};

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
	/// Recompute hashes even when modtime and size both match
	pub rehash: bool,
	pub no_dot: bool,
	pub verbosity: u8,
	/// Append the grand-totals trailer comment
	pub totals: bool,
}

#[derive(Debug, Clone)]
pub enum UpdateTarget {
	/// Rewritten manifest to stdout
	Stdout,
	/// Rewritten manifest to a new file (must not exist)
	NewFile(PathBuf),
	/// Atomic in-place replacement of the source manifest
	Overwrite,
	/// Classification diagnostics only, no manifest output
	DryRun,
}

#[derive(Debug)]
pub struct UpdateOutcome {
	pub counters: Counters,
	pub exit_code: i32,
}

fn temp_path(manifest: &Path) -> PathBuf {
	let mut os: OsString = manifest.as_os_str().to_os_string();
	os.push(".temp");
	PathBuf::from(os)
}

/// Pull the next manifest record that carries a path. Records without one
/// cannot be merge-joined and burn the same error budget as malformed lines.
fn next_manifest(
	reader: &mut SfReader,
	budget: &mut ErrorBudget,
) -> OpResult<Option<(Entry, Vec<u8>)>> {
	loop {
		let Some(head) = reader.next_tolerant(budget)? else {
			return Ok(None);
		};
		let entry = reader.decode();
		if entry.path.is_some() {
			return Ok(Some((entry, reader.raw_line().to_vec())));
		}
		warn!(
			"line {} of {} has no path - cannot update an anonymised record",
			head.line,
			reader.source().display()
		);
		if !budget.miss() {
			return Err(OpError::Sf(SfError::TooManyErrors {
				path: reader.source().to_path_buf(),
			}));
		}
	}
}

fn emit_new(writer: &mut ManifestWriter, emit: bool, live: &LiveEntry) -> OpResult<()> {
	let path = path_from_bytes(&live.path);
	match hash_file(&path) {
		Ok((_, b64)) => {
			let entry = Entry {
				hash_b64: b64,
				modtime: Some(modtime_hex(live.modtime)),
				size: Some(size_hex(live.size)),
				annotations: vec![],
				path: Some(live.path.clone()),
			};
			writer.record(emit, Format::Full, Tag::New, &entry, "")
		}
		Err(err) => {
			let shown = display(&live.path);
			warn!("skipping {shown} (read failure: {err})");
			Ok(())
		}
	}
}

fn emit_matched(
	writer: &mut ManifestWriter,
	emit: bool,
	rehash: bool,
	live: &LiveEntry,
	manifest: &Entry,
	raw: &[u8],
) -> OpResult<()> {
	let same_meta = manifest.modtime_secs() == Some(live.modtime)
		&& manifest.size_bytes() == Some(live.size);
	if same_meta && !rehash {
		return writer.record_raw(emit, Tag::Unchanged, raw, &live.path, live.size);
	}

	let path = path_from_bytes(&live.path);
	let b64 = match hash_file(&path) {
		Ok((_, b64)) => b64,
		Err(err) => {
			// keep the old record rather than silently dropping the file
			let shown = display(&live.path);
			warn!("cannot rehash {shown} ({err}) - keeping previous record");
			return writer.record_raw(emit, Tag::Unchanged, raw, &live.path, live.size);
		}
	};

	let mut flags = String::new();
	if manifest.modtime_secs() != Some(live.modtime) {
		flags.push('T');
	}
	if manifest.size_bytes() != Some(live.size) {
		flags.push('S');
	}
	if manifest.hash_b64 != b64 {
		flags.push('H');
	}

	if flags.is_empty() {
		writer.record_raw(emit, Tag::Verified, raw, &live.path, live.size)
	} else {
		let entry = Entry {
			hash_b64: b64,
			modtime: Some(modtime_hex(live.modtime)),
			size: Some(size_hex(live.size)),
			annotations: vec![],
			path: Some(live.path.clone()),
		};
		writer.record(emit, Format::Full, Tag::Changed, &entry, &flags)
	}
}

/// Run the merge-join and rewrite (or classify) the manifest.
pub fn update(
	manifest: &Path,
	root: &Path,
	target: UpdateTarget,
	opts: &UpdateOptions,
) -> OpResult<UpdateOutcome> {
	if !manifest.exists() {
		return Err(OpError::InputMissing {
			path: manifest.to_path_buf(),
		});
	}
	check_root(root)?;

	let (sink, emit) = match &target {
		UpdateTarget::Stdout => (None, true),
		UpdateTarget::NewFile(path) => {
			if path.exists() {
				return Err(OpError::OutputExists { path: path.clone() });
			}
			(Some(path.clone()), true)
		}
		UpdateTarget::Overwrite => (Some(temp_path(manifest)), true),
		UpdateTarget::DryRun => (None, false),
	};
	let dry_run = matches!(target, UpdateTarget::DryRun);
	let mut writer = ManifestWriter::open(sink.as_deref(), opts.verbosity)?;

	let mut reader = SfReader::open(manifest)?;
	let mut budget = ErrorBudget::new();
	let rx = spawn_file_walk(
		root.to_path_buf(),
		WalkOptions {
			no_dot: opts.no_dot,
			cwd_only: false,
		},
	);

	let mut live = rx.recv_blocking().ok();
	let mut man = next_manifest(&mut reader, &mut budget)?;
	loop {
		match (live.take(), man.take()) {
			(None, None) => break,
			(Some(t), None) => {
				emit_new(&mut writer, emit, &t)?;
				live = rx.recv_blocking().ok();
			}
			(None, Some((s, _))) => {
				writer.record(emit, Format::Full, Tag::Deleted, &s, "")?;
				man = next_manifest(&mut reader, &mut budget)?;
			}
			(Some(t), Some((s, raw))) => {
				let s_path = s.path.as_deref().unwrap_or_default();
				match t.path.as_slice().cmp(s_path) {
					std::cmp::Ordering::Less => {
						emit_new(&mut writer, emit, &t)?;
						live = rx.recv_blocking().ok();
						man = Some((s, raw));
					}
					std::cmp::Ordering::Greater => {
						writer.record(emit, Format::Full, Tag::Deleted, &s, "")?;
						live = Some(t);
						man = next_manifest(&mut reader, &mut budget)?;
					}
					std::cmp::Ordering::Equal => {
						emit_matched(&mut writer, emit, opts.rehash, &t, &s, &raw)?;
						live = rx.recv_blocking().ok();
						man = next_manifest(&mut reader, &mut budget)?;
					}
				}
			}
		}
	}

	if opts.totals && emit {
		writer.totals_comment()?;
	}
	let counters = writer.close()?;
	info!(
		"update of {}: {} new, {} changed, {} deleted, {} unchanged",
		manifest.display(),
		counters.new,
		counters.changed,
		counters.deleted,
		counters.unchanged
	);

	if let UpdateTarget::Overwrite = target {
		let temp = temp_path(manifest);
		if counters.changes() > 0 {
			fs::remove_file(manifest)?;
			fs::rename(&temp, manifest)?;
			debug!("replaced {} atomically", manifest.display());
		} else {
			// no changes: leave the original untouched
			fs::remove_file(&temp)?;
		}
	}

	let exit_code = if dry_run || counters.changes() == 0 { 0 } else { 1 };
	Ok(UpdateOutcome {
		counters,
		exit_code,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::time::{Duration, SystemTime};
	use tempfile::TempDir;

	/// Manifests live beside the walked `tree/`, never inside it.
	fn fixture() -> (TempDir, PathBuf) {
		let dir = TempDir::new().unwrap();
		let base = dir.path().join("tree");
		fs::create_dir_all(base.join("a")).unwrap();
		fs::create_dir(base.join("b")).unwrap();
		fs::write(base.join("a/1.txt"), "hi").unwrap();
		fs::write(base.join("a/10.txt"), "hello\n").unwrap();
		fs::write(base.join("b/2.txt"), "").unwrap();
		(dir, base)
	}

	/// Build a manifest by updating an empty one: every live file classifies
	/// as New, which is exactly a generate pass through the same engine.
	fn manifest_of(dir: &TempDir, root: &Path, name: &str) -> PathBuf {
		let empty = dir.path().join("empty.sf");
		fs::write(&empty, b"").unwrap();
		let out = dir.path().join(name);
		update(
			&empty,
			root,
			UpdateTarget::NewFile(out.clone()),
			&UpdateOptions::default(),
		)
		.unwrap();
		fs::remove_file(&empty).unwrap();
		out
	}

	#[test_log::test]
	fn unchanged_tree_produces_zero_changes_and_identical_bytes() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");
		let m2 = dir.path().join("m2.sf");
		let out = update(
			&m1,
			&root,
			UpdateTarget::NewFile(m2.clone()),
			&UpdateOptions::default(),
		)
		.unwrap();
		assert_eq!(out.exit_code, 0);
		assert_eq!(out.counters.changes(), 0);
		assert_eq!(out.counters.unchanged, 3);
		assert_eq!(fs::read(&m1).unwrap(), fs::read(&m2).unwrap());
	}

	#[test]
	fn update_is_idempotent() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");
		let m2 = dir.path().join("m2.sf");
		let m3 = dir.path().join("m3.sf");
		update(&m1, &root, UpdateTarget::NewFile(m2.clone()), &UpdateOptions::default())
			.unwrap();
		update(&m2, &root, UpdateTarget::NewFile(m3.clone()), &UpdateOptions::default())
			.unwrap();
		assert_eq!(fs::read(&m2).unwrap(), fs::read(&m3).unwrap());
	}

	#[test_log::test]
	fn classifies_new_deleted_and_time_changed() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");

		fs::write(root.join("a/new.txt"), "fresh").unwrap();
		fs::remove_file(root.join("b/2.txt")).unwrap();
		let touched = fs::File::options()
			.write(true)
			.open(root.join("a/1.txt"))
			.unwrap();
		touched
			.set_modified(SystemTime::now() - Duration::from_secs(7200))
			.unwrap();
		drop(touched);

		let out = update(&m1, &root, UpdateTarget::DryRun, &UpdateOptions::default())
			.unwrap();
		assert_eq!(out.counters.new, 1);
		assert_eq!(out.counters.deleted, 1);
		assert_eq!(out.counters.changed, 1);
		assert_eq!(out.counters.unchanged, 1);
		// dry runs always report success
		assert_eq!(out.exit_code, 0);
	}

	#[test]
	fn overwrite_without_changes_never_touches_the_manifest() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");
		let before = fs::read(&m1).unwrap();
		let out = update(&m1, &root, UpdateTarget::Overwrite, &UpdateOptions::default())
			.unwrap();
		assert_eq!(out.exit_code, 0);
		assert_eq!(fs::read(&m1).unwrap(), before);
		assert!(!temp_path(&m1).exists());
	}

	#[test]
	fn overwrite_with_changes_replaces_atomically() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");
		fs::write(root.join("b/extra.txt"), "x").unwrap();
		let out = update(&m1, &root, UpdateTarget::Overwrite, &UpdateOptions::default())
			.unwrap();
		assert_eq!(out.exit_code, 1);
		assert!(!temp_path(&m1).exists());
		let text = fs::read_to_string(&m1).unwrap();
		assert!(text.contains(" :"));
		assert!(text.contains("extra.txt"));
	}

	#[test]
	fn missing_manifest_is_reported_before_any_io() {
		let (dir, root) = fixture();
		let err = update(
			&dir.path().join("nope.sf"),
			&root,
			UpdateTarget::DryRun,
			&UpdateOptions::default(),
		)
		.unwrap_err();
		assert_eq!(err.exit_code(), 6);
	}

	#[test]
	fn refuses_existing_new_target() {
		let (dir, root) = fixture();
		let m1 = manifest_of(&dir, &root, "m1.sf");
		let err = update(
			&m1,
			&root,
			UpdateTarget::NewFile(m1.clone()),
			&UpdateOptions::default(),
		)
		.unwrap_err();
		assert_eq!(err.exit_code(), 6);
	}
}
