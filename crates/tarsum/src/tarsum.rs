//! The streaming pass-through digest filter.

use std::io::{self, Read, Write};

use flate2::write::GzDecoder;
use tracing::debug;

use crate::error::{Result, TarSumError};
use crate::scan::EntryScanner;
use crate::sums::{EntryDigester, EntrySum};
use crate::thash::THash;
use crate::version::Version;

/// A reader that digests a tar stream while passing it through unchanged.
///
/// `TarSum` wraps a byte source yielding a tar archive, optionally
/// gzip-wrapped. Reading from it returns the source bytes verbatim —
/// gzip framing, block padding and the end-of-archive marker included —
/// while the same bytes are observed on the side: gzip input is decoded
/// inline, entry boundaries are discovered, and every entry's canonical
/// header plus payload is hashed. Once the stream is drained,
/// [`sum`](TarSum::sum) yields the archive digest.
///
/// A `TarSum` is single-use: create it, read it to EOF, finalize it.
/// All work happens synchronously inside `read`; it blocks only as much
/// as the underlying source blocks, and the instance is not meant to be
/// shared across threads mid-stream.
///
/// # Example
///
/// ```no_run
/// use std::{fs::File, io};
/// use tarsum::{TarSum, Version};
///
/// let layer = File::open("layer.tar")?;
/// let mut tarsum = TarSum::new(layer, true, Version::V0)?;
/// io::copy(&mut tarsum, &mut io::sink())?;
/// println!("{}", tarsum.sum(None));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct TarSum<R> {
    source: R,
    version: Version,
    thash: THash,
    observer: Observer,
    eof: bool,
    /// Set once the observer has failed; digesting stops, pass-through
    /// continues.
    failed: bool,
    /// A scan error waiting to be reported by the next `read` call.
    pending_error: Option<io::Error>,
}

impl<R: Read> TarSum<R> {
    /// Create a digest filter over `source` using the default `sha256`
    /// hash.
    ///
    /// `raw` declares the transport: `true` for a plain tar stream,
    /// `false` for a gzip-wrapped one. With `raw == false` the caller
    /// still receives the gzipped bytes; only the digest side sees the
    /// decoded archive.
    pub fn new(source: R, raw: bool, version: Version) -> Result<TarSum<R>> {
        TarSum::with_hash(source, raw, version, THash::default())
    }

    /// Create a digest filter with an explicit hash function.
    pub fn with_hash(source: R, raw: bool, version: Version, thash: THash) -> Result<TarSum<R>> {
        let pipeline = DigestPipeline {
            scanner: EntryScanner::new(),
            digester: EntryDigester::new(version, thash.clone()),
        };
        let observer = if raw {
            Observer::Raw(pipeline)
        } else {
            Observer::Gzip(GzDecoder::new(pipeline))
        };
        Ok(TarSum {
            source,
            version,
            thash,
            observer,
            eof: false,
            failed: false,
            pending_error: None,
        })
    }

    /// The version policy this filter digests with.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The hash function this filter digests with.
    #[must_use]
    pub fn hash(&self) -> &THash {
        &self.thash
    }

    /// The digests of the entries completed so far, in arrival order.
    #[must_use]
    pub fn entry_sums(&self) -> &[EntrySum] {
        self.observer.digester().entry_sums()
    }

    /// Compute the archive digest, formatted as
    /// `<versionLabel>+<hashLabel>:<hex>`.
    ///
    /// `extra` bytes (an image manifest, typically) are hashed once after
    /// all entry digests. The call is idempotent and never fails; callers
    /// are expected to drain the reader first, and an entry whose payload
    /// is still mid-stream does not contribute.
    #[must_use]
    pub fn sum(&self, extra: Option<&[u8]>) -> String {
        let sum = format!(
            "{}+{}:{}",
            self.version,
            self.thash.name(),
            self.observer.digester().archive_sum(extra)
        );
        debug!(entries = self.entry_sums().len(), %sum, "archive digest");
        sum
    }

    /// Consume the filter and return the underlying source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for TarSum<R> {
    /// Read source bytes into `buf` unchanged, advancing the digest state
    /// as a side effect.
    ///
    /// Format, decompression and truncation problems on the observed
    /// stream surface as [`std::io::Error`]s wrapping a [`TarSumError`],
    /// but never swallow bytes: the chunk that exposed the problem is
    /// still delivered normally and the error is returned by the next
    /// call. After that, digesting is stopped and the pass-through
    /// continues.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        let n = self.source.read(buf)?;
        if n == 0 {
            if !self.eof {
                self.eof = true;
                if !self.failed {
                    self.observer.finish()?;
                }
            }
            return Ok(0);
        }
        if !self.failed {
            if let Err(err) = self.observer.observe(&buf[..n]) {
                self.failed = true;
                self.pending_error = Some(err);
            }
        }
        Ok(n)
    }
}

impl<R> std::fmt::Debug for TarSum<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // source doesn't impl Debug
        f.debug_struct("TarSum")
            .field("version", &self.version)
            .field("thash", &self.thash)
            .field("eof", &self.eof)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// The digesting side of the filter: scanner feeding the entry digester.
#[derive(Debug)]
struct DigestPipeline {
    scanner: EntryScanner,
    digester: EntryDigester,
}

impl DigestPipeline {
    fn finish(&mut self) -> io::Result<()> {
        self.scanner
            .finish(&mut self.digester)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Write for DigestPipeline {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scanner
            .feed(buf, &mut self.digester)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where observed bytes go: straight to the pipeline, or through an
/// inline gzip decoder first.
enum Observer {
    Raw(DigestPipeline),
    Gzip(GzDecoder<DigestPipeline>),
}

impl Observer {
    fn digester(&self) -> &EntryDigester {
        match self {
            Observer::Raw(pipeline) => &pipeline.digester,
            Observer::Gzip(decoder) => &decoder.get_ref().digester,
        }
    }

    fn observe(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Observer::Raw(pipeline) => pipeline.write_all(data),
            Observer::Gzip(decoder) => decoder.write_all(data).map_err(classify_gzip),
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            Observer::Raw(pipeline) => pipeline.finish(),
            Observer::Gzip(decoder) => {
                decoder.try_finish().map_err(classify_gzip)?;
                decoder.get_mut().finish()
            }
        }
    }
}

/// Separate decoder failures from errors the pipeline itself raised while
/// consuming decoded bytes.
fn classify_gzip(err: io::Error) -> io::Error {
    if err.get_ref().is_some_and(|inner| inner.is::<TarSumError>()) {
        err
    } else {
        io::Error::new(
            io::ErrorKind::InvalidData,
            TarSumError::Decompression(err),
        )
    }
}
