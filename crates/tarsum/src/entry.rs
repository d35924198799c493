//! Materialized tar entries.

/// A tar entry's metadata after all extensions have been applied.
///
/// This is the "logical" header the digest canonicalization operates on:
/// UStar prefixes are joined into the name, GNU long name/link entries and
/// PAX record overrides have been resolved, and extended attributes
/// gathered from `SCHILY.xattr.*` records are available in sorted order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TarEntry {
    /// Full file path within the archive.
    pub name: Vec<u8>,

    /// File mode (permission bits).
    pub mode: u32,

    /// Owner user ID.
    pub uid: u64,

    /// Owner group ID.
    pub gid: u64,

    /// Payload size in bytes.
    pub size: u64,

    /// Modification time as seconds since the Unix epoch.
    pub mtime: u64,

    /// Raw type flag byte, unnormalized (`'0'` and NUL both mean a regular
    /// file and stay distinct).
    pub typeflag: u8,

    /// Link target for hard and symbolic links; empty otherwise.
    pub linkname: Vec<u8>,

    /// Owner user name; empty when the header format lacks it.
    pub uname: Vec<u8>,

    /// Owner group name; empty when the header format lacks it.
    pub gname: Vec<u8>,

    /// Major device number; zero for non-device entries.
    pub devmajor: u32,

    /// Minor device number; zero for non-device entries.
    pub devminor: u32,

    /// Extended attributes, sorted by key. Keys have the `SCHILY.xattr.`
    /// prefix stripped; values are raw bytes. Duplicate keys keep the last
    /// record.
    pub xattrs: Vec<(String, Vec<u8>)>,
}

impl TarEntry {
    /// Get the path as a lossy UTF-8 string, for diagnostics.
    #[must_use]
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}
