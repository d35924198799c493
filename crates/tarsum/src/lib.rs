//! Deterministic, content-addressed digests for tar streams.
//!
//! A tarsum identifies a tar archive — a container image layer,
//! typically — by its semantic content: file names, metadata, extended
//! attributes and payloads all participate, while representational noise
//! (gzip framing, block padding, entry order for colliding names) does
//! not. The same layer shipped raw or gzipped, or repacked with
//! different padding, digests to the same string.
//!
//! The entry point is [`TarSum`], a pass-through reader: it delivers the
//! source bytes to the caller unchanged while observing them on the side
//! to drive a per-entry hashing protocol. Each entry's header is
//! canonicalized under a [`Version`] policy and hashed together with the
//! entry payload; the sorted per-entry digests are hashed again —
//! optionally with caller-supplied trailing bytes such as an image
//! manifest — into the final digest, rendered as
//! `<versionLabel>+<hashLabel>:<hex>`.
//!
//! ```no_run
//! use std::{fs::File, io};
//! use tarsum::{TarSum, Version};
//!
//! let layer = File::open("layer.tar.gz")?;
//! let mut tarsum = TarSum::new(layer, false, Version::V0)?;
//! io::copy(&mut tarsum, &mut io::sink())?;
//! assert!(tarsum.sum(None).starts_with("tarsum+sha256:"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod entry;
pub mod error;
pub mod header;
pub mod scan;
pub mod sums;
pub mod tarsum;
pub mod thash;
pub mod version;

pub use entry::TarEntry;
pub use error::{Result, TarSumError};
pub use scan::{EntryScanner, EntrySink};
pub use sums::{EntryDigester, EntrySum};
pub use tarsum::TarSum;
pub use thash::THash;
pub use version::{CanonicalField, Version};
