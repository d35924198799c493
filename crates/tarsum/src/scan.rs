//! Push-mode tar entry scanner.
//!
//! [`EntryScanner`] consumes an uncompressed tar byte stream in whatever
//! chunks it arrives and reports entry boundaries to an [`EntrySink`]. It
//! is the inverse of a pull parser: the pass-through reader hands over
//! each chunk as the downstream consumer drains it, so the scanner must
//! be able to suspend at any byte offset — in the middle of a header
//! block, a metadata payload, or file content.
//!
//! GNU long name (`L`), GNU long link (`K`) and PAX extended header (`x`)
//! entries are accumulated and folded into the next file entry; PAX
//! global headers (`g`) are consumed without effect. Sinks only ever see
//! materialized file entries and their payload bytes — never header
//! blocks, metadata entries, or block padding.

use std::cmp;
use std::collections::BTreeMap;
use std::mem;

use tracing::trace;

use crate::entry::TarEntry;
use crate::error::{Result, TarSumError};
use crate::header::{
    HeaderBlock, PaxRecords, BLOCK_SIZE, PAX_GID, PAX_GNAME, PAX_LINKPATH, PAX_MTIME, PAX_PATH,
    PAX_SCHILY_XATTR, PAX_SIZE, PAX_UID, PAX_UNAME,
};

/// Maximum accepted payload for a single metadata entry.
const MAX_META_SIZE: u64 = 1024 * 1024;

/// Receiver for entry boundary events.
///
/// For each file entry the scanner calls `entry_start` once, then
/// `payload` zero or more times with consecutive content slices, then
/// `entry_end` exactly once. Zero-size entries produce `entry_start`
/// immediately followed by `entry_end`.
pub trait EntrySink {
    /// A new entry's materialized header is available.
    fn entry_start(&mut self, entry: &TarEntry);

    /// A slice of the current entry's content, in stream order. Block
    /// padding is never included.
    fn payload(&mut self, data: &[u8]);

    /// The current entry's content is complete.
    fn entry_end(&mut self);
}

/// Metadata accumulated from GNU/PAX entries, pending the next file entry.
#[derive(Debug, Default)]
struct PendingMetadata {
    gnu_long_name: Option<Vec<u8>>,
    gnu_long_link: Option<Vec<u8>>,
    pax_extensions: Option<Vec<u8>>,
}

impl PendingMetadata {
    fn is_empty(&self) -> bool {
        self.gnu_long_name.is_none()
            && self.gnu_long_link.is_none()
            && self.pax_extensions.is_none()
    }
}

#[derive(Clone, Copy, Debug)]
enum MetaKind {
    LongName,
    LongLink,
    Pax,
    Discard,
}

#[derive(Debug)]
enum State {
    /// Accumulating the next 512-byte header block.
    Header,
    /// Consuming a metadata entry's payload, then its padding.
    Meta {
        kind: MetaKind,
        remaining: u64,
        padding: u64,
        data: Vec<u8>,
    },
    /// Streaming a file entry's payload, then its padding.
    Payload { remaining: u64, padding: u64 },
    /// Past the end-of-archive marker or a scan failure; remaining bytes
    /// are ignored.
    Trailer,
}

/// Resumable scanner over an uncompressed tar stream.
#[derive(Debug)]
pub struct EntryScanner {
    state: State,
    header_buf: [u8; BLOCK_SIZE],
    header_fill: usize,
    pending: PendingMetadata,
    /// Offset into the (decoded) stream, for error reporting.
    pos: u64,
}

impl Default for EntryScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryScanner {
    /// Create a scanner positioned at the start of an archive.
    #[must_use]
    pub fn new() -> EntryScanner {
        EntryScanner {
            state: State::Header,
            header_buf: [0u8; BLOCK_SIZE],
            header_fill: 0,
            pending: PendingMetadata::default(),
            pos: 0,
        }
    }

    /// Consume the next chunk of the stream, reporting boundaries to `sink`.
    ///
    /// After an error the scanner parks in its trailer state: further
    /// chunks are accepted and ignored, so the surrounding pass-through
    /// reader keeps delivering bytes while digesting stops.
    pub fn feed(&mut self, mut buf: &[u8], sink: &mut impl EntrySink) -> Result<()> {
        while !buf.is_empty() {
            match &mut self.state {
                State::Trailer => break,

                State::Header => {
                    let take = cmp::min(BLOCK_SIZE - self.header_fill, buf.len());
                    self.header_buf[self.header_fill..self.header_fill + take]
                        .copy_from_slice(&buf[..take]);
                    self.header_fill += take;
                    self.pos += take as u64;
                    buf = &buf[take..];

                    if self.header_fill == BLOCK_SIZE {
                        self.header_fill = 0;
                        if let Err(e) = self.on_header(sink) {
                            self.state = State::Trailer;
                            return Err(e);
                        }
                    }
                }

                State::Meta {
                    remaining,
                    padding,
                    data,
                    ..
                } => {
                    if *remaining > 0 {
                        let take = cmp::min(*remaining, buf.len() as u64) as usize;
                        data.extend_from_slice(&buf[..take]);
                        *remaining -= take as u64;
                        self.pos += take as u64;
                        buf = &buf[take..];
                    } else {
                        let take = cmp::min(*padding, buf.len() as u64) as usize;
                        *padding -= take as u64;
                        self.pos += take as u64;
                        buf = &buf[take..];
                    }

                    if matches!(
                        self.state,
                        State::Meta {
                            remaining: 0,
                            padding: 0,
                            ..
                        }
                    ) {
                        let State::Meta { kind, data, .. } =
                            mem::replace(&mut self.state, State::Header)
                        else {
                            unreachable!()
                        };
                        self.apply_meta(kind, data);
                    }
                }

                State::Payload { remaining, padding } => {
                    if *remaining > 0 {
                        let take = cmp::min(*remaining, buf.len() as u64) as usize;
                        sink.payload(&buf[..take]);
                        *remaining -= take as u64;
                        self.pos += take as u64;
                        buf = &buf[take..];
                        if *remaining == 0 {
                            sink.entry_end();
                        }
                    } else {
                        let take = cmp::min(*padding, buf.len() as u64) as usize;
                        *padding -= take as u64;
                        self.pos += take as u64;
                        buf = &buf[take..];
                    }

                    if matches!(
                        self.state,
                        State::Payload {
                            remaining: 0,
                            padding: 0,
                        }
                    ) {
                        self.state = State::Header;
                    }
                }
            }
        }
        Ok(())
    }

    /// Signal end of the byte stream.
    ///
    /// A still-open entry is closed with the payload observed so far.
    /// Returns [`TarSumError::UnexpectedEof`] if the stream ended inside a
    /// header block, a metadata entry, or a file entry.
    pub fn finish(&mut self, sink: &mut impl EntrySink) -> Result<()> {
        match mem::replace(&mut self.state, State::Trailer) {
            State::Trailer => Ok(()),
            State::Header if self.header_fill == 0 => Ok(()),
            State::Header | State::Meta { .. } => Err(TarSumError::UnexpectedEof(self.pos)),
            State::Payload { remaining, .. } => {
                // Close the open entry with what was observed; padding-only
                // truncation means the entry itself already completed.
                if remaining > 0 {
                    sink.entry_end();
                }
                Err(TarSumError::UnexpectedEof(self.pos))
            }
        }
    }

    fn on_header(&mut self, sink: &mut impl EntrySink) -> Result<()> {
        let header = HeaderBlock::from_bytes_exact(&self.header_buf);

        if header.is_empty() {
            if !self.pending.is_empty() {
                return Err(TarSumError::OrphanedMetadata);
            }
            trace!(pos = self.pos, "end-of-archive marker");
            self.state = State::Trailer;
            return Ok(());
        }

        header.verify_checksum()?;
        let size = header.entry_size()?;

        match header.typeflag() {
            b'L' => self.begin_meta(MetaKind::LongName, "GNU long name", size),
            b'K' => self.begin_meta(MetaKind::LongLink, "GNU long link", size),
            b'x' => self.begin_meta(MetaKind::Pax, "PAX extended header", size),
            b'g' => self.begin_meta(MetaKind::Discard, "PAX global header", size),
            _ => {
                let pending = mem::take(&mut self.pending);
                let entry = resolve_entry(header, pending)?;
                let padded = entry
                    .size
                    .checked_next_multiple_of(BLOCK_SIZE as u64)
                    .ok_or(TarSumError::InvalidSize(entry.size))?;

                trace!(name = %entry.name_lossy(), size = entry.size, "file entry");
                sink.entry_start(&entry);
                if entry.size == 0 {
                    sink.entry_end();
                    self.state = State::Header;
                } else {
                    self.state = State::Payload {
                        remaining: entry.size,
                        padding: padded - entry.size,
                    };
                }
                Ok(())
            }
        }
    }

    fn begin_meta(&mut self, kind: MetaKind, what: &'static str, size: u64) -> Result<()> {
        if size > MAX_META_SIZE {
            return Err(TarSumError::MetadataTooLarge {
                size,
                limit: MAX_META_SIZE,
            });
        }
        let padded = size
            .checked_next_multiple_of(BLOCK_SIZE as u64)
            .ok_or(TarSumError::InvalidSize(size))?;

        let duplicate = match kind {
            MetaKind::LongName => self.pending.gnu_long_name.is_some(),
            MetaKind::LongLink => self.pending.gnu_long_link.is_some(),
            MetaKind::Pax => self.pending.pax_extensions.is_some(),
            MetaKind::Discard => false,
        };
        if duplicate {
            return Err(TarSumError::DuplicateMetadata(what));
        }

        self.state = State::Meta {
            kind,
            remaining: size,
            padding: padded - size,
            data: Vec::with_capacity(size as usize),
        };
        Ok(())
    }

    fn apply_meta(&mut self, kind: MetaKind, mut data: Vec<u8>) {
        match kind {
            MetaKind::LongName => {
                data.pop_if(|&mut b| b == 0);
                self.pending.gnu_long_name = Some(data);
            }
            MetaKind::LongLink => {
                data.pop_if(|&mut b| b == 0);
                self.pending.gnu_long_link = Some(data);
            }
            MetaKind::Pax => self.pending.pax_extensions = Some(data),
            MetaKind::Discard => {}
        }
    }
}

/// Materialize a file entry from its header block and pending metadata.
///
/// Precedence follows the usual reader rules: PAX records beat GNU long
/// name/link entries, which beat the inline header fields (including the
/// UStar prefix).
fn resolve_entry(header: &HeaderBlock, pending: PendingMetadata) -> Result<TarEntry> {
    let mut name = header.path_bytes().to_vec();
    if let Some(prefix) = header.prefix() {
        if !prefix.is_empty() {
            let mut joined = prefix.to_vec();
            joined.push(b'/');
            joined.extend_from_slice(header.path_bytes());
            name = joined;
        }
    }

    let mut linkname = header.link_name_bytes().to_vec();
    let mut uname = header.username().unwrap_or_default().to_vec();
    let mut gname = header.groupname().unwrap_or_default().to_vec();
    let mut uid = header.uid()?;
    let mut gid = header.gid()?;
    let mut size = header.entry_size()?;
    let mut mtime = header.mtime()?;

    if let Some(long_name) = pending.gnu_long_name {
        name = long_name;
    }
    if let Some(long_link) = pending.gnu_long_link {
        linkname = long_link;
    }

    let mut xattrs = BTreeMap::new();
    if let Some(ref pax) = pending.pax_extensions {
        for record in PaxRecords::new(pax) {
            let record = record?;
            let key = record.key().map_err(crate::header::PaxError::from)?;
            let value = record.value_bytes();

            match key {
                PAX_PATH => name = value.to_vec(),
                PAX_LINKPATH => linkname = value.to_vec(),
                PAX_UNAME => uname = value.to_vec(),
                PAX_GNAME => gname = value.to_vec(),
                PAX_UID => {
                    if let Ok(v) = std::str::from_utf8(value) {
                        if let Ok(v) = v.parse::<u64>() {
                            uid = v;
                        }
                    }
                }
                PAX_GID => {
                    if let Ok(v) = std::str::from_utf8(value) {
                        if let Ok(v) = v.parse::<u64>() {
                            gid = v;
                        }
                    }
                }
                PAX_SIZE => {
                    if let Ok(v) = std::str::from_utf8(value) {
                        if let Ok(v) = v.parse::<u64>() {
                            size = v;
                        }
                    }
                }
                PAX_MTIME => {
                    // PAX mtime can carry fractional seconds; keep the
                    // integer part.
                    if let Ok(v) = std::str::from_utf8(value) {
                        if let Some(s) = v.split('.').next() {
                            if let Ok(m) = s.parse::<u64>() {
                                mtime = m;
                            }
                        }
                    }
                }
                _ if key.starts_with(PAX_SCHILY_XATTR) => {
                    xattrs.insert(key[PAX_SCHILY_XATTR.len()..].to_string(), value.to_vec());
                }
                _ => {
                    // Ignore unknown keys.
                }
            }
        }
    }

    Ok(TarEntry {
        name,
        mode: header.mode()?,
        uid,
        gid,
        size,
        mtime,
        typeflag: header.typeflag(),
        linkname,
        uname,
        gname,
        devmajor: header.device_major()?.unwrap_or(0),
        devminor: header.device_minor()?.unwrap_or(0),
        xattrs: xattrs.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Event {
        Start(TarEntry),
        Payload(Vec<u8>),
        End,
    }

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl EntrySink for Recorder {
        fn entry_start(&mut self, entry: &TarEntry) {
            self.events.push(Event::Start(entry.clone()));
        }
        fn payload(&mut self, data: &[u8]) {
            // Coalesce adjacent payload slices so chunking is invisible.
            if let Some(Event::Payload(buf)) = self.events.last_mut() {
                buf.extend_from_slice(data);
            } else {
                self.events.push(Event::Payload(data.to_vec()));
            }
        }
        fn entry_end(&mut self) {
            self.events.push(Event::End);
        }
    }

    fn archive(build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        build(&mut builder);
        builder.into_inner().unwrap()
    }

    fn file_header(name: &str, size: u64) -> tar::Header {
        let mut header = tar::Header::new_ustar();
        header.as_mut_bytes()[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(size);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        header
    }

    fn scan(data: &[u8], chunk: usize) -> Recorder {
        let mut scanner = EntryScanner::new();
        let mut recorder = Recorder::default();
        for piece in data.chunks(chunk) {
            scanner.feed(piece, &mut recorder).unwrap();
        }
        scanner.finish(&mut recorder).unwrap();
        recorder
    }

    #[test]
    fn test_single_file() {
        let data = archive(|b| {
            b.append(&file_header("hello.txt", 5), b"world".as_slice())
                .unwrap();
        });
        let recorder = scan(&data, data.len());
        assert_eq!(recorder.events.len(), 3);
        let Event::Start(ref entry) = recorder.events[0] else {
            panic!("expected entry start");
        };
        assert_eq!(entry.name, b"hello.txt");
        assert_eq!(entry.size, 5);
        assert_eq!(recorder.events[1], Event::Payload(b"world".to_vec()));
        assert_eq!(recorder.events[2], Event::End);
    }

    #[test]
    fn test_chunking_is_invisible() {
        let data = archive(|b| {
            b.append(&file_header("a", 600), vec![7u8; 600].as_slice())
                .unwrap();
            b.append(&file_header("b", 0), b"".as_slice()).unwrap();
        });
        let whole = scan(&data, data.len());
        for chunk in [1, 3, 511, 512, 513] {
            assert_eq!(scan(&data, chunk).events, whole.events);
        }
    }

    #[test]
    fn test_zero_size_entry() {
        let data = archive(|b| {
            b.append(&file_header("empty", 0), b"".as_slice()).unwrap();
        });
        let recorder = scan(&data, 1);
        assert!(matches!(recorder.events[0], Event::Start(_)));
        assert_eq!(recorder.events[1], Event::End);
    }

    #[test]
    fn test_padding_not_in_payload() {
        let data = archive(|b| {
            b.append(&file_header("f", 1), b"x".as_slice()).unwrap();
        });
        let recorder = scan(&data, 7);
        assert_eq!(recorder.events[1], Event::Payload(b"x".to_vec()));
    }

    #[test]
    fn test_gnu_long_name() {
        let long = "dir/".repeat(40) + "leaf.txt";
        let data = archive(|b| {
            let mut meta = tar::Header::new_gnu();
            meta.as_mut_bytes()[..13].copy_from_slice(b"././@LongLink");
            meta.set_size(long.len() as u64 + 1);
            meta.set_entry_type(tar::EntryType::GNULongName);
            meta.set_cksum();
            let mut content = long.clone().into_bytes();
            content.push(0);
            b.append(&meta, content.as_slice()).unwrap();
            b.append(&file_header("dir/truncated", 0), b"".as_slice())
                .unwrap();
        });
        let recorder = scan(&data, 17);
        let Event::Start(ref entry) = recorder.events[0] else {
            panic!("expected entry start");
        };
        assert_eq!(entry.name, long.as_bytes());
    }

    #[test]
    fn test_pax_overrides_and_xattrs() {
        let rec1 = pax_record("path", b"override/path.txt");
        let rec2 = pax_record("SCHILY.xattr.user.a", b"hello");
        let mut payload = rec1;
        payload.extend_from_slice(&rec2);

        let data = archive(|b| {
            let mut meta = tar::Header::new_ustar();
            meta.as_mut_bytes()[..10].copy_from_slice(b"PaxHeaders");
            meta.set_size(payload.len() as u64);
            meta.set_entry_type(tar::EntryType::XHeader);
            meta.set_cksum();
            b.append(&meta, payload.as_slice()).unwrap();
            b.append(&file_header("short", 4), b"data".as_slice()).unwrap();
        });
        let recorder = scan(&data, 64);
        let Event::Start(ref entry) = recorder.events[0] else {
            panic!("expected entry start");
        };
        assert_eq!(entry.name, b"override/path.txt");
        assert_eq!(
            entry.xattrs,
            vec![("user.a".to_string(), b"hello".to_vec())]
        );
        assert_eq!(recorder.events[1], Event::Payload(b"data".to_vec()));
    }

    #[test]
    fn test_truncated_archive() {
        let data = archive(|b| {
            b.append(&file_header("f", 100), vec![0u8; 100].as_slice())
                .unwrap();
        });
        let mut scanner = EntryScanner::new();
        let mut recorder = Recorder::default();
        // Stop in the middle of the payload.
        scanner.feed(&data[..512 + 50], &mut recorder).unwrap();
        let err = scanner.finish(&mut recorder).unwrap_err();
        assert!(matches!(err, TarSumError::UnexpectedEof(_)));
        // The open entry was still closed.
        assert_eq!(*recorder.events.last().unwrap(), Event::End);
    }

    #[test]
    fn test_bad_checksum() {
        let mut data = archive(|b| {
            b.append(&file_header("f", 0), b"".as_slice()).unwrap();
        });
        data[0] ^= 0xff;
        let mut scanner = EntryScanner::new();
        let mut recorder = Recorder::default();
        let err = scanner.feed(&data, &mut recorder).unwrap_err();
        assert!(matches!(err, TarSumError::Header(_)));
        // Scanner is parked; further bytes are accepted without effect.
        scanner.feed(&data, &mut recorder).unwrap();
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_empty_archive() {
        let recorder = scan(&[0u8; 1024], 100);
        assert!(recorder.events.is_empty());
    }

    fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
        let base = key.len() + value.len() + 3;
        let mut len = base;
        loop {
            let total = base + len.to_string().len();
            if total == len {
                break;
            }
            len = total;
        }
        let mut record = format!("{len} {key}=").into_bytes();
        record.extend_from_slice(value);
        record.push(b'\n');
        record
    }
}
