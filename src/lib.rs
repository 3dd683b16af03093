//! # treesig - content-addressed file inventory and declutter tool
//!
//! For a rooted directory tree, treesig computes a canonical line-oriented
//! manifest, the signature file, in which every file is identified by its
//! SHA-256 content hash together with its modification time and byte size.
//! From those manifests it supports incremental update, set algebra between
//! trees (overlap, duplicates), ranked queries, anonymisation, and a
//! long-running watchdog that refuses to tolerate the presence of any file
//! whose hash appears on a watch list.
//!
//! ## Architecture
//!
//! - **Codec**: [`codec`] - the five graded record formats, the two-stage
//!   reader, the encoder, and the path escaping rules
//! - **Hashing**: [`hash`] - streaming SHA-256 and the 43-character
//!   truncated-Base64 identity used on the wire
//! - **Walking**: [`walk`] - a producer thread feeding a bounded queue in
//!   lexicographic byte order
//! - **Writing**: [`writer`] - buffered sinks with change counters, flush
//!   policy, and progress commentary
//! - **Engines**: [`update`] (merge-join incremental update with atomic
//!   replace), [`algebra`] (hash-keyed scoreboards), [`anon`]
//!   (hash-only projections), [`top`] (bounded ranked selection)
//! - **Detection**: [`detect`] - the three-phase watchdog, with its
//!   [`health`] endpoint
//! - **Operations**: [`ops`] - the verb-level wiring the CLI dispatches to
//! - **Errors**: [`error`] - per-concern error enums and the exit-code map
//!
//! ## Quick start
//!
//! ```no_run
//! use treesig::ops::generate::{GenerateOptions, generate};
//!
//! # fn main() -> Result<(), treesig::error::OpError> {
//! let opts = GenerateOptions {
//! 	root: "./photos".into(),
//! 	..GenerateOptions::default()
//! };
//! let counters = generate(Some(std::path::Path::new("photos.sf")), &opts)?;
//! println!("{} files signed", counters.total_files);
//! # Ok(())
//! # }
//! ```

pub mod algebra;
pub mod anon;
pub mod codec;
pub mod detect;
pub mod error;
pub mod hash;
pub mod health;
pub mod ops;
pub mod paths;
pub mod top;
pub mod update;
pub mod walk;
pub mod writer;

pub use codec::{Entry, Format, SfReader};
pub use error::{OpError, OpResult, SfError, SfResult};
pub use hash::{EMPTY_HASH_B64, Sha256Bin, hash_file};
pub use update::{UpdateOptions, UpdateTarget, update};
pub use walk::{LiveEntry, WalkOptions};
pub use writer::{Counters, ManifestWriter, Tag};
