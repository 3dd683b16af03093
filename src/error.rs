//! Error types for signature-file processing and the exit-code policy

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while reading or decoding a signature file.
///
/// The codec never terminates the process; these are surfaced to the calling
/// engine, which applies the error-tolerance policy (see [`ErrorBudget`] in
/// the codec module) and decides whether to continue, skip, or abort.
#[derive(Debug, Error)]
pub enum SfError {
	/// A line that is neither blank, a comment, nor a well-formed record
	#[error("invalid format at line {line}")]
	InvalidFormat { line: u64 },

	/// Too many consecutive malformed lines; the file is declared corrupt
	#[error("too many errors in {} - giving up", path.display())]
	TooManyErrors { path: PathBuf },

	/// Underlying read failure on the signature file or a hashed file
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Errors produced by engines and verb-level operations.
///
/// Each variant maps onto a documented process exit code via
/// [`OpError::exit_code`]; the mapping is applied only in the CLI binary so
/// the library stays exit-free.
#[derive(Debug, Error)]
pub enum OpError {
	/// A watched file was found, or a fail-safe condition forced detection
	#[error("{0}")]
	Detected(String),

	/// Signature-file codec failure that aborts the operation
	#[error(transparent)]
	Sf(#[from] SfError),

	/// The monitoring machinery could not be established or was lost
	#[error("unable to continue monitoring: {0}")]
	Monitor(String),

	/// Cannot create an output file
	#[error("cannot create file {}", path.display())]
	Create {
		path: PathBuf,
		source: std::io::Error,
	},

	/// Read failure on a user-named input
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The starting directory cannot be read at all
	#[error("unable to read directory {}", path.display())]
	DirRead { path: PathBuf },

	/// A named input file does not exist
	#[error("file '{}' does not exist", path.display())]
	InputMissing { path: PathBuf },

	/// A named output file already exists and will not be overwritten
	#[error("output file '{}' already exists", path.display())]
	OutputExists { path: PathBuf },

	/// The watch list contained no usable signatures
	#[error("nothing to detect (watch list is empty)")]
	WatchListEmpty,

	/// An operation that found no input to work on
	#[error("{0}")]
	NothingToDo(String),

	/// Command-line shape violation (too many arguments, bad combination)
	#[error("{0}")]
	Usage(String),

	/// A required argument was not supplied
	#[error("{0}")]
	MissingArgument(String),

	/// Impossible-by-construction condition
	#[error("internal error: {0}")]
	Internal(String),
}

impl OpError {
	/// Process exit code for this failure.
	pub fn exit_code(&self) -> i32 {
		match self {
			OpError::Detected(_) => 1,
			OpError::Sf(SfError::Io(_)) => 4,
			OpError::Sf(_) => 1,
			OpError::Monitor(_) => 2,
			OpError::Create { .. } | OpError::Io(_) => 4,
			OpError::DirRead { .. } => 5,
			OpError::InputMissing { .. } | OpError::OutputExists { .. } => 6,
			OpError::WatchListEmpty | OpError::NothingToDo(_) => 1,
			OpError::Usage(_) => 8,
			OpError::MissingArgument(_) => 9,
			OpError::Internal(_) => 10,
		}
	}
}

pub type SfResult<T> = Result<T, SfError>;
pub type OpResult<T> = Result<T, OpError>;
