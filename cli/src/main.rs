use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, subscriber::set_global_default};
use tracing_subscriber::EnvFilter;

use treesig::anon::{AnonOptions, anonymise};
use treesig::codec::Format;
use treesig::detect::{DetectOptions, run as detect_run};
use treesig::error::{OpError, OpResult};
use treesig::ops::compare::compare;
use treesig::ops::consolidate::{ConsolidateOptions, consolidate};
use treesig::ops::directory::{DirectoryOptions, directory};
use treesig::ops::duplicates::duplicates;
use treesig::ops::estimate::{estimate, print_estimate};
use treesig::ops::generate::{GenerateOptions, generate};
use treesig::ops::misnamed::misnamed;
use treesig::ops::rank::{RankKey, RankOptions, rank};
use treesig::ops::repath::{RepathOptions, repath};
use treesig::ops::sum::{SumOptions, sum};
use treesig::update::{UpdateOptions, UpdateTarget, update};

fn init_tracing(verbosity: u8) {
	// Map -q/-v to tracing levels; default WARN so reports stay clean
	let level = match verbosity {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};

	let env_filter = EnvFilter::from_default_env().add_directive(level.into());

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr) // logs to stderr, output to stdout
		.with_target(false)
		.with_level(true)
		.compact()
		.finish();

	// Ignore error if already set in tests or env
	let _ = set_global_default(subscriber);
}

#[derive(Parser)]
#[command(
	name = "treesig",
	version,
	about = "Content-addressed file inventory and declutter tool"
)]
pub struct Opts {
	/// Increase verbosity (-v, -vv). Default WARN.
	#[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
	/// Decrease verbosity (-q). Each -q reduces level by one step.
	#[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
	pub quiet: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Generate a signature file from a directory tree
	#[command(alias = "gen")]
	Generate {
		/// Output file (stdout if omitted); refused if it already exists
		file: Option<PathBuf>,
		/// Directory to scan (default: current directory)
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		/// Record format 1..5, or 9 for sha256sum lines
		#[arg(short = 'f', long, default_value_t = 5)]
		format: u8,
		/// Ignore files/directories beginning '.'
		#[arg(long)]
		no_dot: bool,
		/// Append duplicate hashes as trailer comments
		#[arg(short = 'd', long)]
		dupes: bool,
		/// Append a files/bytes totals trailer comment
		#[arg(short = 't', long)]
		totals: bool,
	},

	/// Update an existing signature file against the live tree
	#[command(alias = "upd")]
	Update {
		/// Source signature file, plus an optional output file
		#[arg(num_args = 0..=2)]
		files: Vec<PathBuf>,
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		/// Replace the source file in place (atomic)
		#[arg(short = 'o', long)]
		overwrite: bool,
		/// Recompute hashes even when modtime and size match
		#[arg(long)]
		rehash: bool,
		/// Classify only; write nothing
		#[arg(long)]
		dry_run: bool,
		#[arg(long)]
		no_dot: bool,
		#[arg(short = 't', long)]
		totals: bool,
	},

	/// Detect multiple copies of the same content in a signature file
	#[command(alias = "dup")]
	Duplicates {
		files: Vec<PathBuf>,
		/// Include each block's hash as a comment
		#[arg(long)]
		include_sha: bool,
	},

	/// Compare two signature files at hash level
	#[command(alias = "com")]
	Compare {
		files: Vec<PathBuf>,
		/// List every record of B, with overlaps as live rm lines
		#[arg(short = 'l', long)]
		long: bool,
	},

	/// Show the largest files
	#[command(alias = "big", alias = "largest")]
	Biggest {
		/// Signature files to rank (live tree walk if none)
		files: Vec<PathBuf>,
		#[arg(short = 'c', long, default_value_t = 10)]
		count: usize,
		/// Collapse repeated sizes in the listing
		#[arg(long)]
		ellipsis: bool,
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		#[arg(long)]
		no_dot: bool,
	},

	/// Show the most recently modified files
	#[command(alias = "lat")]
	Latest {
		/// Signature files to rank (live tree walk if none)
		files: Vec<PathBuf>,
		#[arg(short = 'c', long, default_value_t = 20)]
		count: usize,
		/// Path prefix to exclude from results
		#[arg(long)]
		discard: Option<String>,
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		#[arg(long)]
		no_dot: bool,
	},

	/// Strip a signature file down to hashes only
	#[command(alias = "ano", alias = "anonymize")]
	Anonymise {
		/// Input file, plus an optional output file
		#[arg(num_args = 0..=2)]
		files: Vec<PathBuf>,
		/// Output format 1..3
		#[arg(short = 'f', long, default_value_t = 1)]
		format: u8,
		/// Drop the hash of the empty file
		#[arg(long)]
		no_empty: bool,
		/// Approximate number of decoy records to add
		#[arg(long, default_value_t = 0)]
		chaff: u64,
	},

	/// Collapse a signature file to one record per hash (earliest modtime)
	#[command(alias = "con")]
	Consolidate {
		/// Input file, plus an optional output file
		#[arg(num_args = 0..=2)]
		files: Vec<PathBuf>,
		/// Output format 1..3
		#[arg(short = 'f', long, default_value_t = 3)]
		format: u8,
		/// Replace the input file in place
		#[arg(short = 'o', long)]
		overwrite: bool,
	},

	/// Rewrite record path prefixes (--unfix first, then --prefix)
	Repath {
		/// Input file, plus an optional output file
		#[arg(num_args = 0..=2)]
		files: Vec<PathBuf>,
		/// Prefix to remove from every path
		#[arg(long)]
		unfix: Option<String>,
		/// Prefix to prepend to every path
		#[arg(long)]
		prefix: Option<String>,
	},

	/// Produce a GNU sha256sum check file from a live tree
	Sum {
		/// Output file (stdout if omitted); refused if it already exists
		file: Option<PathBuf>,
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		#[arg(long)]
		no_dot: bool,
	},

	/// Watch a tree for files whose hashes appear on the given watch lists
	#[command(alias = "det")]
	Detect {
		/// Watch-list signature files
		files: Vec<PathBuf>,
		/// Directory to monitor (default: current directory)
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		/// Health-check port (HTTP 200/503); detection no longer exits
		#[arg(short = 'c', long)]
		check: Option<u16>,
		/// Break the initial sweep on the first hit
		#[arg(long)]
		asap: bool,
		/// Skip the initial sweep of the tree
		#[arg(long)]
		no_precheck: bool,
		/// Expose the hit log on the /log endpoint
		#[arg(long)]
		disclose: bool,
		#[arg(long)]
		no_dot: bool,
	},

	/// One-line summary of each signature file
	#[command(alias = "dir")]
	Directory {
		files: Vec<PathBuf>,
		/// Display grand totals on completion
		#[arg(short = 'g', long)]
		grand_totals: bool,
		/// Show each file's determined format
		#[arg(long)]
		show_format: bool,
	},

	/// Quick file/byte counts for a tree, without hashing
	#[command(alias = "est")]
	Estimate {
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
	},

	/// List files whose names contain bytes that need escaping
	#[command(alias = "mis")]
	Misnamed {
		#[arg(short = 'p', long, default_value = ".")]
		path: PathBuf,
		#[arg(long)]
		no_dot: bool,
	},
}

fn take_one(mut files: Vec<PathBuf>, what: &str) -> OpResult<(PathBuf, Option<PathBuf>)> {
	match files.len() {
		0 => Err(OpError::MissingArgument(format!("{what} not specified"))),
		1 => Ok((files.remove(0), None)),
		2 => {
			let second = files.pop();
			Ok((files.remove(0), second))
		}
		_ => Err(OpError::Usage("too many files specified".into())),
	}
}

fn dispatch(command: Command, verbosity: u8) -> OpResult<i32> {
	match command {
		Command::Generate {
			file,
			path,
			format,
			no_dot,
			dupes,
			totals,
		} => {
			let opts = GenerateOptions {
				root: path,
				format_code: format,
				no_dot,
				dupes,
				totals,
				verbosity,
			};
			generate(file.as_deref(), &opts)?;
			Ok(0)
		}

		Command::Update {
			files,
			path,
			overwrite,
			rehash,
			dry_run,
			no_dot,
			totals,
		} => {
			let (source, target) = take_one(files, "signature file to update")?;
			let target = match (overwrite, dry_run, target) {
				(true, _, Some(_)) => {
					return Err(OpError::Usage(
						"choose either a target file or --overwrite, not both".into(),
					));
				}
				(_, true, _) => UpdateTarget::DryRun,
				(true, _, None) => UpdateTarget::Overwrite,
				(false, _, Some(new)) => UpdateTarget::NewFile(new),
				(false, _, None) => UpdateTarget::Stdout,
			};
			let opts = UpdateOptions {
				rehash,
				no_dot,
				verbosity,
				totals,
			};
			let outcome = update(&source, &path, target, &opts)?;
			Ok(outcome.exit_code)
		}

		Command::Duplicates { files, include_sha } => {
			let (file, extra) = take_one(files, "signature file for dupe-check")?;
			if extra.is_some() {
				return Err(OpError::Usage("too many files specified - expected one".into()));
			}
			duplicates(&file, include_sha)?;
			Ok(0)
		}

		Command::Compare { files, long } => {
			if files.len() > 2 {
				return Err(OpError::Usage("too many files specified - expected two".into()));
			}
			if files.len() < 2 {
				return Err(OpError::MissingArgument(
					"two signature files are needed to make a comparison".into(),
				));
			}
			compare(&files[0], &files[1], long)?;
			Ok(0)
		}

		Command::Biggest {
			files,
			count,
			ellipsis,
			path,
			no_dot,
		} => {
			if files.len() > 8 {
				return Err(OpError::Usage("too many files specified - eight is enough".into()));
			}
			let opts = RankOptions {
				count,
				ellipsis,
				discard: None,
				no_dot,
				root: path,
			};
			rank(&files, RankKey::Size, &opts)?;
			Ok(0)
		}

		Command::Latest {
			files,
			count,
			discard,
			path,
			no_dot,
		} => {
			if files.len() > 8 {
				return Err(OpError::Usage("too many files specified - eight is enough".into()));
			}
			let opts = RankOptions {
				count,
				ellipsis: false,
				discard: discard.map(String::into_bytes),
				no_dot,
				root: path,
			};
			rank(&files, RankKey::Date, &opts)?;
			Ok(0)
		}

		Command::Anonymise {
			files,
			format,
			no_empty,
			chaff,
		} => {
			let (input, target) = take_one(files, "input file")?;
			let format = Format::from_code(format)
				.ok_or_else(|| OpError::Usage(format!("format {format} is not valid")))?;
			anonymise(
				&input,
				target.as_deref(),
				&AnonOptions {
					format,
					no_empty,
					chaff,
				},
			)?;
			Ok(0)
		}

		Command::Consolidate {
			files,
			format,
			overwrite,
		} => {
			let (input, target) = take_one(files, "input file")?;
			consolidate(
				&input,
				target.as_deref(),
				&ConsolidateOptions {
					format_code: format,
					overwrite,
				},
			)?;
			Ok(0)
		}

		Command::Repath {
			files,
			unfix,
			prefix,
		} => {
			let (input, target) = take_one(files, "input file")?;
			repath(
				&input,
				target.as_deref(),
				&RepathOptions {
					unfix: unfix.map(String::into_bytes),
					prefix: prefix.map(String::into_bytes),
				},
			)?;
			Ok(0)
		}

		Command::Sum { file, path, no_dot } => {
			sum(file.as_deref(), &SumOptions { root: path, no_dot })?;
			Ok(0)
		}

		Command::Detect {
			files,
			path,
			check,
			asap,
			no_precheck,
			disclose,
			no_dot,
		} => {
			if files.len() > 20 {
				return Err(OpError::Usage("too many watch lists".into()));
			}
			if files.is_empty() {
				return Err(OpError::MissingArgument(
					"you need to give at least one signature file to use as the watch list"
						.into(),
				));
			}
			let opts = DetectOptions {
				root: path,
				no_dot,
				asap,
				no_precheck,
				disclose,
				check_port: check,
			};
			detect_run(&files, &opts)?;
			Ok(0)
		}

		Command::Directory {
			files,
			grand_totals,
			show_format,
		} => {
			if files.len() > 99 {
				return Err(OpError::Usage("too many signature files".into()));
			}
			if files.is_empty() {
				return Err(OpError::MissingArgument(
					"you need to give at least one file".into(),
				));
			}
			directory(
				&files,
				&DirectoryOptions {
					grand_totals,
					show_format,
				},
			)?;
			Ok(0)
		}

		Command::Estimate { path } => {
			let est = estimate(&path)?;
			print_estimate(&est);
			Ok(0)
		}

		Command::Misnamed { path, no_dot } => {
			misnamed(&path, no_dot)?;
			Ok(0)
		}
	}
}

fn main() {
	let opts = Opts::parse();
	let verbosity = opts.verbose.saturating_sub(opts.quiet);
	init_tracing(verbosity);
	let code = match dispatch(opts.command, verbosity) {
		Ok(code) => code,
		Err(err) => {
			eprintln!("error: {err}");
			err.exit_code()
		}
	};
	std::process::exit(code);
}
