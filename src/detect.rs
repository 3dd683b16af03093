//! Detection service
//!
//! Keeps a directory tree free from "watched-for" files. Three phases run in
//! strict order: ingest the watch list, sweep the existing tree, then
//! monitor filesystem events indefinitely. Anything that compromises
//! coverage (unreadable files, unknown events, loss of the event stream,
//! failed watch registration) is fail-safe: it drives the Detected state
//! rather than silently degrading.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::{OpError, OpResult};
use crate::hash::{Sha256Bin, b64_to_bin, hash_file, hex_of};
use crate::paths::path_from_bytes;
use crate::walk::{WalkOptions, check_root, spawn_file_walk};

/// Binary hashes the detector refuses to tolerate.
pub type WatchSet = HashSet<Sha256Bin>;

#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
	pub root: PathBuf,
	pub no_dot: bool,
	/// Break out of the sweep on the first hit
	pub asap: bool,
	/// Skip the initial sweep entirely
	pub no_precheck: bool,
	/// Expose the time-ordered hit log on `/log`
	pub disclose: bool,
	/// Health endpoint port; detection becomes sticky instead of exiting
	pub check_port: Option<u16>,
}

/// One recorded detection event.
#[derive(Debug, Clone)]
pub struct Hit {
	pub timestamp: i64,
	pub sha: Sha256Bin,
	pub during_prescan: bool,
	pub filename: String,
}

/// State shared with the health endpoint. Detected is terminal-sticky while
/// an endpoint is configured; there is no recovery transition.
pub struct DetectorShared {
	detected: AtomicBool,
	pub disclose: bool,
	hits: Mutex<Vec<Hit>>,
}

impl DetectorShared {
	pub fn new(disclose: bool) -> Arc<DetectorShared> {
		Arc::new(DetectorShared {
			detected: AtomicBool::new(false),
			disclose,
			hits: Mutex::new(Vec::new()),
		})
	}

	pub fn is_detected(&self) -> bool {
		self.detected.load(Ordering::SeqCst)
	}

	pub fn mark_detected(&self) {
		self.detected.store(true, Ordering::SeqCst);
	}

	pub fn log_hit(&self, hit: Hit) {
		if !self.disclose {
			return;
		}
		if let Ok(mut hits) = self.hits.lock() {
			hits.push(hit);
		}
	}

	/// CSV rows for `/log`, or `None` when nothing has been recorded.
	pub fn hits_csv(&self) -> Option<String> {
		let hits = self.hits.lock().ok()?;
		if hits.is_empty() {
			return None;
		}
		let mut out = String::new();
		for h in hits.iter() {
			out.push_str(&format!(
				"{},{},{},{}\n",
				h.timestamp,
				hex_of(&h.sha),
				h.during_prescan,
				h.filename
			));
		}
		Some(out)
	}
}

fn now_epoch() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

/// Phase 1: read watch-list manifests, taking the first 43 bytes of each
/// qualifying line as a hash. Short or non-Base64 lines are counted and
/// ignored; missing files are warned about. Returns the set plus the count
/// of ignored lines.
pub fn ingest_watch_lists(files: &[PathBuf]) -> OpResult<(WatchSet, u64)> {
	use std::io::BufRead;
	let mut set = WatchSet::new();
	let mut ignored = 0u64;
	for file in files {
		let handle = match std::fs::File::open(file) {
			Ok(f) => f,
			Err(err) => {
				warn!("signature file '{}' cannot be read: {err}", file.display());
				continue;
			}
		};
		let mut reader = std::io::BufReader::new(handle);
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
			if line.len() < 43 {
				debug!("ignoring line {lineno} of {} - not a signature", file.display());
				ignored += 1;
				continue;
			}
			let head = String::from_utf8_lossy(&line[..43]);
			match b64_to_bin(&head) {
				Some(bin) => {
					set.insert(bin);
				}
				None => {
					debug!("ignoring line {lineno} of {} - not a signature", file.display());
					ignored += 1;
				}
			}
		}
	}
	if set.is_empty() {
		return Err(OpError::WatchListEmpty);
	}
	info!("watch list has {} signature(s)", set.len());
	Ok((set, ignored))
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
	pub scanned: u64,
	pub hit: bool,
}

/// Phase 2: hash every file under the root and look it up in the watch set.
/// Unreadable files are themselves fail-safe hits (a file we cannot hash may
/// be a banned file we cannot inspect); files that vanished mid-sweep are
/// not present and are skipped.
pub fn sweep(
	opts: &DetectOptions,
	watch: &WatchSet,
	shared: &DetectorShared,
) -> OpResult<SweepOutcome> {
	check_root(&opts.root)?;
	let rx = spawn_file_walk(
		opts.root.clone(),
		WalkOptions {
			no_dot: opts.no_dot,
			cwd_only: false,
		},
	);
	let check_time = now_epoch();
	let mut outcome = SweepOutcome::default();
	while let Ok(entry) = rx.recv_blocking() {
		let path = path_from_bytes(&entry.path);
		let bin = match hash_file(&path) {
			Ok((bin, _)) => bin,
			Err(crate::error::SfError::Io(err))
				if err.kind() == std::io::ErrorKind::NotFound =>
			{
				continue;
			}
			Err(err) => {
				warn!("cannot inspect {} ({err}) - failing safe", path.display());
				shared.mark_detected();
				outcome.hit = true;
				if opts.asap {
					break;
				}
				continue;
			}
		};
		outcome.scanned += 1;
		if watch.contains(&bin) {
			eprintln!("Detected file: {}", path.display());
			shared.mark_detected();
			outcome.hit = true;
			shared.log_hit(Hit {
				timestamp: check_time,
				sha: bin,
				during_prescan: true,
				filename: path.display().to_string(),
			});
			if opts.asap {
				break;
			}
		}
	}
	Ok(outcome)
}

/// Check one file against the watch set during the monitor phase.
fn check_file(
	path: &Path,
	watch: &WatchSet,
	opts: &DetectOptions,
	shared: &DetectorShared,
) -> OpResult<()> {
	let bin = match hash_file(path) {
		Ok((bin, _)) => bin,
		Err(crate::error::SfError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
			debug!("{} vanished before it could be hashed", path.display());
			return Ok(());
		}
		Err(err) => {
			return fail_safe(
				opts,
				shared,
				&format!("cannot hash {} ({err})", path.display()),
			);
		}
	};
	if watch.contains(&bin) {
		warn!("Change: {} [matched]", path.display());
		shared.log_hit(Hit {
			timestamp: now_epoch(),
			sha: bin,
			during_prescan: false,
			filename: path.display().to_string(),
		});
		shared.mark_detected();
		if opts.check_port.is_none() {
			return Err(OpError::Detected("file on watchlist detected".into()));
		}
	} else {
		info!("Change: {} [ok]", path.display());
	}
	Ok(())
}

/// A coverage failure: with a health endpoint we stick in Detected, without
/// one we exit as a monitoring failure.
fn fail_safe(opts: &DetectOptions, shared: &DetectorShared, reason: &str) -> OpResult<()> {
	warn!("fail-safe: {reason}");
	shared.mark_detected();
	if opts.check_port.is_none() {
		return Err(OpError::Monitor(reason.to_string()));
	}
	Ok(())
}

/// Run the full detector. Returns only on a detection or monitoring failure
/// when no health endpoint is configured; otherwise blocks indefinitely.
pub fn run(watch_files: &[PathBuf], opts: &DetectOptions) -> OpResult<()> {
	if let Some(port) = opts.check_port
		&& port < 80
	{
		return Err(OpError::Usage(
			"invalid health check port - must be between 80 and 65535".into(),
		));
	}

	info!("phase 1 - establishing watch list");
	let (watch, ignored) = ingest_watch_lists(watch_files)?;
	if ignored > 0 {
		info!("{ignored} non-signature line(s) ignored");
	}
	let shared = DetectorShared::new(opts.disclose);

	if opts.no_precheck {
		debug!("skipping phase 2 (pre-check)");
	} else {
		info!("phase 2 - scanning existing file space");
		let outcome = sweep(opts, &watch, &shared)?;
		if outcome.hit && opts.check_port.is_none() {
			return Err(OpError::Detected(
				"one or more watched files found during pre-launch check".into(),
			));
		}
		println!("Scanned {} files - no problems", outcome.scanned);
	}

	info!("phase 3 - monitoring directories");
	monitor::run(watch, watch_files, opts, shared)
}

#[cfg(target_os = "linux")]
mod monitor {
	//! inotify-backed event loop. Watches are per-directory; new
	//! directories register themselves as their CREATE events arrive.

	use super::*;
	use crate::walk::spawn_dir_walk;
	use nix::errno::Errno;
	use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
	use std::collections::HashMap;

	static RELOAD: AtomicBool = AtomicBool::new(false);

	extern "C" fn on_sighup(_: nix::libc::c_int) {
		RELOAD.store(true, Ordering::SeqCst);
	}

	fn install_sighup() {
		use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
		let action = SigAction::new(
			SigHandler::Handler(on_sighup),
			SaFlags::empty(),
			SigSet::empty(),
		);
		// no SA_RESTART: the signal must interrupt the blocking event read
		// so the reload happens before the next event is processed
		if unsafe { sigaction(Signal::SIGHUP, &action) }.is_err() {
			warn!("cannot install SIGHUP handler - watch list reload disabled");
		}
	}

	fn watch_mask() -> AddWatchFlags {
		AddWatchFlags::IN_CREATE
			| AddWatchFlags::IN_CLOSE_WRITE
			| AddWatchFlags::IN_MOVED_TO
			| AddWatchFlags::IN_MOVED_FROM
			| AddWatchFlags::IN_DELETE
			| AddWatchFlags::IN_ATTRIB
			| AddWatchFlags::IN_DELETE_SELF
	}

	/// The monitor-relevant reading of an event mask.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub(super) enum Reading {
		Create,
		Write,
		Rename,
		Ignorable,
		WatchGone,
		Overflow,
		Unknown,
	}

	pub(super) fn classify(mask: AddWatchFlags) -> Reading {
		if mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
			Reading::Overflow
		} else if mask.contains(AddWatchFlags::IN_CREATE) {
			Reading::Create
		} else if mask.contains(AddWatchFlags::IN_MOVED_TO) {
			Reading::Rename
		} else if mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
			Reading::Write
		} else if mask.intersects(
			AddWatchFlags::IN_ATTRIB | AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM,
		) {
			Reading::Ignorable
		} else if mask.intersects(AddWatchFlags::IN_DELETE_SELF | AddWatchFlags::IN_IGNORED) {
			Reading::WatchGone
		} else {
			Reading::Unknown
		}
	}

	struct Registry {
		inotify: Inotify,
		dirs: HashMap<WatchDescriptor, PathBuf>,
		root_wd: Option<WatchDescriptor>,
	}

	impl Registry {
		fn register(
			&mut self,
			dir: &Path,
			is_root: bool,
			opts: &DetectOptions,
			shared: &DetectorShared,
		) -> OpResult<()> {
			debug!("registering directory {}", dir.display());
			match self.inotify.add_watch(dir, watch_mask()) {
				Ok(wd) => {
					self.dirs.insert(wd, dir.to_path_buf());
					if is_root {
						self.root_wd = Some(wd);
					}
					Ok(())
				}
				Err(err) => fail_safe(
					opts,
					shared,
					&format!("unable to register watcher on {} ({err})", dir.display()),
				),
			}
		}

		/// Register a subtree and check any files already inside it: they
		/// may have been deposited before the watch took effect.
		fn adopt_tree(
			&mut self,
			dir: &Path,
			watch: &WatchSet,
			opts: &DetectOptions,
			shared: &DetectorShared,
		) -> OpResult<()> {
			let dirs = spawn_dir_walk(dir.to_path_buf(), WalkOptions::default());
			while let Ok(d) = dirs.recv_blocking() {
				self.register(&d, false, opts, shared)?;
			}
			let files = spawn_file_walk(dir.to_path_buf(), WalkOptions::default());
			while let Ok(entry) = files.recv_blocking() {
				check_file(&path_from_bytes(&entry.path), watch, opts, shared)?;
			}
			Ok(())
		}
	}

	fn handle_event(
		reg: &mut Registry,
		event: &InotifyEvent,
		watch: &WatchSet,
		opts: &DetectOptions,
		shared: &DetectorShared,
	) -> OpResult<()> {
		let reading = classify(event.mask);
		match reading {
			Reading::Overflow => {
				return fail_safe(opts, shared, "event queue overflow (events may be lost)");
			}
			Reading::WatchGone => {
				if Some(event.wd) == reg.root_wd {
					return fail_safe(opts, shared, "monitored root is gone");
				}
				reg.dirs.remove(&event.wd);
				return Ok(());
			}
			Reading::Unknown => {
				return fail_safe(
					opts,
					shared,
					&format!("unknown event {:?} - cannot guarantee coverage", event.mask),
				);
			}
			Reading::Ignorable => return Ok(()),
			Reading::Create | Reading::Rename | Reading::Write => {}
		}

		let Some(base) = reg.dirs.get(&event.wd) else {
			return Ok(());
		};
		let path = match &event.name {
			Some(name) => base.join(name),
			None => base.clone(),
		};

		match reading {
			Reading::Write => check_file(&path, watch, opts, shared),
			Reading::Create | Reading::Rename => match std::fs::metadata(&path) {
				Ok(meta) if meta.is_dir() => reg.adopt_tree(&path, watch, opts, shared),
				Ok(_) => check_file(&path, watch, opts, shared),
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
				Err(err) => fail_safe(
					opts,
					shared,
					&format!("new entry {} cannot be examined ({err})", path.display()),
				),
			},
			_ => Ok(()),
		}
	}

	pub(super) fn run(
		mut watch: WatchSet,
		watch_files: &[PathBuf],
		opts: &DetectOptions,
		shared: Arc<DetectorShared>,
	) -> OpResult<()> {
		let inotify = Inotify::init(InitFlags::IN_CLOEXEC)
			.map_err(|err| OpError::Monitor(format!("inotify init failed: {err}")))?;
		let mut reg = Registry {
			inotify,
			dirs: HashMap::new(),
			root_wd: None,
		};

		let dirs = spawn_dir_walk(
			opts.root.clone(),
			WalkOptions {
				no_dot: opts.no_dot,
				cwd_only: false,
			},
		);
		let mut first = true;
		while let Ok(dir) = dirs.recv_blocking() {
			reg.register(&dir, first, opts, &shared)?;
			first = false;
		}
		install_sighup();

		// only now is a "clean" answer truthful
		if let Some(port) = opts.check_port {
			crate::health::spawn(port, shared.clone());
		}
		println!("Monitoring... press ^C to exit");

		loop {
			if RELOAD.swap(false, Ordering::SeqCst) {
				match ingest_watch_lists(watch_files) {
					Ok((set, _)) => {
						info!("watch list reloaded: {} signature(s)", set.len());
						watch = set;
					}
					Err(err) => warn!("watch list reload failed ({err}) - keeping old list"),
				}
			}
			let events = match reg.inotify.read_events() {
				Ok(events) => events,
				Err(Errno::EINTR) => continue,
				Err(err) => {
					fail_safe(opts, &shared, &format!("event stream lost ({err})"))?;
					// endpoint mode: stay up and keep answering 503
					loop {
						std::thread::park();
					}
				}
			};
			for event in &events {
				handle_event(&mut reg, event, &watch, opts, &shared)?;
			}
		}
	}
}

#[cfg(not(target_os = "linux"))]
mod monitor {
	use super::*;

	pub(super) fn run(
		_watch: WatchSet,
		_watch_files: &[PathBuf],
		_opts: &DetectOptions,
		_shared: Arc<DetectorShared>,
	) -> OpResult<()> {
		Err(OpError::Monitor(
			"filesystem monitoring unavailable on this platform".into(),
		))
	}
}
