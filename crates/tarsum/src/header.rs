//! Raw tar header blocks and PAX extended header records.
//!
//! Tar archives are sequences of 512-byte blocks. Each entry starts with a
//! header block whose fields are fixed-offset ASCII octal numbers and
//! NUL-terminated strings; the checksum covers the whole block with the
//! checksum field itself read as spaces. This module provides a zero-copy
//! view over a header block with just the accessors the digest
//! canonicalization needs, plus an iterator over the `<length> <key>=<value>\n`
//! records found in PAX extended headers.
//!
//! Format detection is by magic: UStar headers carry `ustar\0` + `00` at
//! offset 257, GNU headers carry `ustar ` + ` \0`. Old (pre-POSIX) headers
//! have neither and lack the user/group name, device and prefix fields.

use std::fmt;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of a tar block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Magic string for UStar format headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version field for UStar format headers ("00").
pub const USTAR_VERSION: &[u8; 2] = b"00";

/// Magic string for GNU tar format headers ("ustar ").
pub const GNU_MAGIC: &[u8; 6] = b"ustar ";

/// Version field for GNU tar format headers (" \0").
pub const GNU_VERSION: &[u8; 2] = b" \0";

/// PAX extended header key for the file path.
pub const PAX_PATH: &str = "path";
/// PAX extended header key for the link target path.
pub const PAX_LINKPATH: &str = "linkpath";
/// PAX extended header key for file size.
pub const PAX_SIZE: &str = "size";
/// PAX extended header key for owner user ID.
pub const PAX_UID: &str = "uid";
/// PAX extended header key for owner group ID.
pub const PAX_GID: &str = "gid";
/// PAX extended header key for owner user name.
pub const PAX_UNAME: &str = "uname";
/// PAX extended header key for owner group name.
pub const PAX_GNAME: &str = "gname";
/// PAX extended header key for modification time.
pub const PAX_MTIME: &str = "mtime";
/// PAX extended header prefix for SCHILY extended attributes.
pub const PAX_SCHILY_XATTR: &str = "SCHILY.xattr.";

/// Errors that can occur when parsing a tar header block.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// An octal field contains invalid characters.
    #[error("invalid octal field: {0:?}")]
    InvalidOctal(Vec<u8>),

    /// The header checksum does not match the computed value.
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// The checksum value stored in the header.
        expected: u64,
        /// The checksum computed from the header bytes.
        computed: u64,
    },
}

/// Error parsing a PAX extension record.
#[derive(Debug, Error)]
pub enum PaxError {
    /// The record format is malformed.
    #[error("malformed PAX extension record")]
    Malformed,
    /// The key is not valid UTF-8.
    #[error("PAX key is not valid UTF-8: {0}")]
    InvalidKey(#[from] std::str::Utf8Error),
}

/// A 512-byte tar header block with field accessors.
///
/// The accessors return the raw field values; overlaying PAX records and
/// GNU long name/link entries onto them is the scanner's job.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct HeaderBlock {
    bytes: [u8; BLOCK_SIZE],
}

impl HeaderBlock {
    /// View exactly 512 bytes as a header block, without copying.
    #[must_use]
    pub fn from_bytes_exact(bytes: &[u8; BLOCK_SIZE]) -> &HeaderBlock {
        // HeaderBlock is repr(transparent) over [u8; 512].
        HeaderBlock::ref_from_bytes(bytes).expect("size is correct")
    }

    /// Get a reference to the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.bytes
    }

    /// Check if this header uses UStar format.
    #[must_use]
    pub fn is_ustar(&self) -> bool {
        self.bytes[257..263] == *USTAR_MAGIC && self.bytes[263..265] == *USTAR_VERSION
    }

    /// Check if this header uses GNU tar format.
    #[must_use]
    pub fn is_gnu(&self) -> bool {
        self.bytes[257..263] == *GNU_MAGIC && self.bytes[263..265] == *GNU_VERSION
    }

    /// Get the raw type flag byte.
    ///
    /// Regular files may be `'0'` or, in old archives, NUL. The byte is
    /// deliberately not normalized: the digest canonicalization hashes it
    /// verbatim.
    #[must_use]
    pub fn typeflag(&self) -> u8 {
        self.bytes[156]
    }

    /// Get the entry size (file content length) in bytes.
    pub fn entry_size(&self) -> Result<u64, HeaderError> {
        parse_numeric(&self.bytes[124..136])
    }

    /// Get the file mode (permissions).
    pub fn mode(&self) -> Result<u32, HeaderError> {
        parse_numeric(&self.bytes[100..108]).map(|v| v as u32)
    }

    /// Get the owner user ID.
    pub fn uid(&self) -> Result<u64, HeaderError> {
        parse_numeric(&self.bytes[108..116])
    }

    /// Get the owner group ID.
    pub fn gid(&self) -> Result<u64, HeaderError> {
        parse_numeric(&self.bytes[116..124])
    }

    /// Get the modification time as a Unix timestamp.
    pub fn mtime(&self) -> Result<u64, HeaderError> {
        parse_numeric(&self.bytes[136..148])
    }

    /// Get the raw path bytes (the name field only; see [`prefix`]).
    ///
    /// [`prefix`]: HeaderBlock::prefix
    #[must_use]
    pub fn path_bytes(&self) -> &[u8] {
        trim_nul(&self.bytes[0..100])
    }

    /// Get the raw link target bytes.
    #[must_use]
    pub fn link_name_bytes(&self) -> &[u8] {
        trim_nul(&self.bytes[157..257])
    }

    /// Get the owner user name, or `None` for old-style headers.
    #[must_use]
    pub fn username(&self) -> Option<&[u8]> {
        if !self.is_ustar() && !self.is_gnu() {
            return None;
        }
        Some(trim_nul(&self.bytes[265..297]))
    }

    /// Get the owner group name, or `None` for old-style headers.
    #[must_use]
    pub fn groupname(&self) -> Option<&[u8]> {
        if !self.is_ustar() && !self.is_gnu() {
            return None;
        }
        Some(trim_nul(&self.bytes[297..329]))
    }

    /// Get the device major number, or `None` when the format lacks it.
    pub fn device_major(&self) -> Result<Option<u32>, HeaderError> {
        if !self.is_ustar() && !self.is_gnu() {
            return Ok(None);
        }
        parse_octal(&self.bytes[329..337]).map(|v| Some(v as u32))
    }

    /// Get the device minor number, or `None` when the format lacks it.
    pub fn device_minor(&self) -> Result<Option<u32>, HeaderError> {
        if !self.is_ustar() && !self.is_gnu() {
            return Ok(None);
        }
        parse_octal(&self.bytes[337..345]).map(|v| Some(v as u32))
    }

    /// Get the UStar prefix field for long paths.
    ///
    /// A non-empty prefix is joined to the name field with `/`. Returns
    /// `None` for old-style and GNU headers, which use these bytes
    /// differently.
    #[must_use]
    pub fn prefix(&self) -> Option<&[u8]> {
        if !self.is_ustar() {
            return None;
        }
        Some(trim_nul(&self.bytes[345..500]))
    }

    /// Verify the header checksum.
    pub fn verify_checksum(&self) -> Result<(), HeaderError> {
        let expected = parse_octal(&self.bytes[148..156])?;
        let computed = self.compute_checksum();
        if expected != computed {
            return Err(HeaderError::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }

    /// Compute the header checksum: the unsigned sum of the block bytes,
    /// with the checksum field itself (bytes 148..156) read as spaces.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        let total: u64 = self.bytes.iter().map(|&b| u64::from(b)).sum();
        let stored: u64 = self.bytes[148..156].iter().map(|&b| u64::from(b)).sum();
        total - stored + 8 * u64::from(b' ')
    }

    /// Check if this block is all zeros (the end-of-archive marker).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for HeaderBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderBlock")
            .field("path", &String::from_utf8_lossy(self.path_bytes()))
            .field("typeflag", &self.typeflag())
            .field("size", &self.entry_size().ok())
            .finish_non_exhaustive()
    }
}

/// Parse an octal ASCII field into a u64.
///
/// Octal fields are runs of ASCII digits with optional leading spaces,
/// terminated by a space or NUL; an all-blank field reads as zero. Bytes
/// after the terminator are ignored.
pub fn parse_octal(field: &[u8]) -> Result<u64, HeaderError> {
    let digits = field
        .iter()
        .skip_while(|&&b| b == b' ')
        .take_while(|&&b| b != b' ' && b != b'\0');

    let mut value: u64 = 0;
    for &byte in digits {
        if !(b'0'..=b'7').contains(&byte) {
            return Err(HeaderError::InvalidOctal(field.to_vec()));
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or_else(|| HeaderError::InvalidOctal(field.to_vec()))?;
    }
    Ok(value)
}

/// Parse a numeric field that may be octal ASCII or GNU base-256 encoded.
///
/// Values too large for octal are stored big-endian, with the high bit of
/// the first byte set as the format marker.
pub fn parse_numeric(field: &[u8]) -> Result<u64, HeaderError> {
    match field.first() {
        None => Ok(0),
        Some(&first) if first & 0x80 != 0 => {
            let mut value = u64::from(first & 0x7f);
            for &byte in &field[1..] {
                value = value
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(u64::from(byte)))
                    .ok_or_else(|| HeaderError::InvalidOctal(field.to_vec()))?;
            }
            Ok(value)
        }
        Some(_) => parse_octal(field),
    }
}

/// The portion of a fixed-size string field before its first NUL byte.
fn trim_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// A single PAX extended header key/value pair.
#[derive(Debug, Clone)]
pub struct PaxRecord<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

impl<'a> PaxRecord<'a> {
    /// Returns the key as a string.
    pub fn key(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.key)
    }

    /// Returns the raw value bytes.
    ///
    /// Values can carry arbitrary binary data (extended attributes in
    /// particular), so no UTF-8 is assumed.
    #[must_use]
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value
    }
}

/// Iterator over PAX extended header records.
///
/// Records have the form `<length> <key>=<value>\n`, where `<length>` is
/// the decimal total record length including the length field itself.
#[derive(Debug)]
pub struct PaxRecords<'a> {
    data: &'a [u8],
}

impl<'a> PaxRecords<'a> {
    /// Create a new iterator over the payload of a PAX extended header.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for PaxRecords<'a> {
    type Item = Result<PaxRecord<'a>, PaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let space_pos = self.data.iter().position(|&b| b == b' ')?;

        let len_str = std::str::from_utf8(&self.data[..space_pos]).ok()?;
        let len: usize = len_str.parse().ok()?;

        if len > self.data.len() || len < space_pos + 2 {
            return Some(Err(PaxError::Malformed));
        }

        if self.data.get(len.saturating_sub(1)) != Some(&b'\n') {
            return Some(Err(PaxError::Malformed));
        }

        // Exclude the length prefix and the trailing newline.
        let kv = &self.data[space_pos + 1..len - 1];

        let eq_pos = match kv.iter().position(|&b| b == b'=') {
            Some(pos) => pos,
            None => return Some(Err(PaxError::Malformed)),
        };

        let key = &kv[..eq_pos];
        let value = &kv[eq_pos + 1..];

        self.data = &self.data[len..];

        Some(Ok(PaxRecord { key, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(edit: impl FnOnce(&mut [u8; BLOCK_SIZE])) -> [u8; BLOCK_SIZE] {
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes[257..263].copy_from_slice(USTAR_MAGIC);
        bytes[263..265].copy_from_slice(USTAR_VERSION);
        edit(&mut bytes);
        bytes
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal(b"0000644\0").unwrap(), 0o644);
        assert_eq!(parse_octal(b"     123 ").unwrap(), 0o123);
        assert_eq!(parse_octal(b"").unwrap(), 0);
        assert_eq!(parse_octal(b"   \0\0\0").unwrap(), 0);
        assert_eq!(parse_octal(b"77777777777\0").unwrap(), 0o77777777777);
        assert!(parse_octal(b"abc").is_err());
        assert!(parse_octal(b"128").is_err());
    }

    #[test]
    fn test_parse_numeric_base256() {
        assert_eq!(parse_numeric(&[0x80, 0x00, 0x00, 0x01]).unwrap(), 1);
        assert_eq!(parse_numeric(&[0x80, 0x00, 0x01, 0x00]).unwrap(), 256);
        assert_eq!(parse_numeric(b"0000755\0").unwrap(), 0o755);
    }

    #[test]
    fn test_trim_nul() {
        assert_eq!(trim_nul(b"hello\0world"), b"hello");
        assert_eq!(trim_nul(b"no null"), b"no null");
        assert_eq!(trim_nul(b"\0start"), b"");
    }

    #[test]
    fn test_field_accessors() {
        let bytes = block_with(|b| {
            b[0..8].copy_from_slice(b"file.txt");
            b[100..108].copy_from_slice(b"0000644\0");
            b[108..116].copy_from_slice(b"0001750\0");
            b[124..136].copy_from_slice(b"00000000004\0");
            b[156] = b'0';
            b[265..269].copy_from_slice(b"user");
        });
        let header = HeaderBlock::from_bytes_exact(&bytes);
        assert_eq!(header.path_bytes(), b"file.txt");
        assert_eq!(header.mode().unwrap(), 0o644);
        assert_eq!(header.uid().unwrap(), 0o1750);
        assert_eq!(header.entry_size().unwrap(), 4);
        assert_eq!(header.typeflag(), b'0');
        assert_eq!(header.username().unwrap(), b"user");
        assert!(header.is_ustar());
        assert!(!header.is_gnu());
    }

    #[test]
    fn test_old_header_has_no_ustar_fields() {
        let mut bytes = [0u8; BLOCK_SIZE];
        bytes[0..4].copy_from_slice(b"test");
        let header = HeaderBlock::from_bytes_exact(&bytes);
        assert!(header.username().is_none());
        assert!(header.groupname().is_none());
        assert_eq!(header.device_major().unwrap(), None);
        assert_eq!(header.prefix(), None);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut bytes = block_with(|b| {
            b[0..4].copy_from_slice(b"test");
            b[156] = b'0';
        });
        let computed = HeaderBlock::from_bytes_exact(&bytes).compute_checksum();
        let field = format!("{computed:06o}\0 ");
        bytes[148..156].copy_from_slice(field.as_bytes());

        let header = HeaderBlock::from_bytes_exact(&bytes);
        header.verify_checksum().unwrap();

        let mut corrupted = bytes;
        corrupted[0] = b'x';
        let header = HeaderBlock::from_bytes_exact(&corrupted);
        assert!(matches!(
            header.verify_checksum(),
            Err(HeaderError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_is_empty() {
        let zeros = [0u8; BLOCK_SIZE];
        assert!(HeaderBlock::from_bytes_exact(&zeros).is_empty());
        let bytes = block_with(|_| {});
        assert!(!HeaderBlock::from_bytes_exact(&bytes).is_empty());
    }

    #[test]
    fn test_pax_records() {
        let data = b"20 path=foo/bar.txt\n12 uid=1000\n";
        let records: Vec<_> = PaxRecords::new(data).map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key().unwrap(), "path");
        assert_eq!(records[0].value_bytes(), b"foo/bar.txt");
        assert_eq!(records[1].key().unwrap(), "uid");
        assert_eq!(records[1].value_bytes(), b"1000");
    }

    #[test]
    fn test_pax_binary_value() {
        let data = b"24 SCHILY.xattr.foo=\x00\x01\x02\n";
        let record = PaxRecords::new(data).next().unwrap().unwrap();
        assert_eq!(record.key().unwrap(), "SCHILY.xattr.foo");
        assert_eq!(record.value_bytes(), b"\x00\x01\x02");
    }

    #[test]
    fn test_pax_malformed() {
        assert!(PaxRecords::new(b"15 pathfoobar\n").next().unwrap().is_err());
        assert!(PaxRecords::new(b"100 path=foo\n").next().unwrap().is_err());
        assert!(PaxRecords::new(b"").next().is_none());
    }
}
