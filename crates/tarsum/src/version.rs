//! Version policy: which header fields participate in the digest.
//!
//! A tarsum version pins down three things: the label that prefixes the
//! final digest string, the set of header fields that feed each entry's
//! hash, and whether extended attributes participate. [`Version::V0`] is
//! the historical format, frozen for compatibility. [`Version::VDev`]
//! additionally hashes extended attributes (making xattr-bearing archives
//! distinguishable) and drops `mtime`, which is noise for content
//! identity.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::entry::TarEntry;
use crate::error::TarSumError;
use crate::header::PAX_SCHILY_XATTR;

/// A canonical header field: an ASCII key and the field's rendered value.
///
/// Serializing a header means emitting each field's key bytes immediately
/// followed by its value bytes, with no separators anywhere.
pub type CanonicalField<'e> = (Cow<'static, str>, Cow<'e, [u8]>);

/// A tarsum digest version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Version {
    /// The frozen historical format: no extended attributes, `mtime`
    /// included. Label `tarsum`.
    V0,
    /// The development format: extended attributes included, `mtime`
    /// dropped. Label `tarsum.dev`.
    VDev,
}

impl Version {
    /// All supported versions, in declaration order.
    pub const ALL: [Version; 2] = [Version::V0, Version::VDev];

    /// The label that prefixes digest strings of this version.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Version::V0 => "tarsum",
            Version::VDev => "tarsum.dev",
        }
    }

    /// Recover the version from a full digest string such as
    /// `tarsum.dev+sha256:deadbeef`.
    pub fn from_sum(sum: &str) -> Result<Version, TarSumError> {
        let label = sum.split('+').next().unwrap_or(sum);
        label.parse()
    }

    /// Produce the ordered canonical fields for a materialized header.
    ///
    /// Integer fields render as base-10 ASCII with no leading zeros; the
    /// type flag is the raw header byte; string fields pass through
    /// verbatim. Extended attribute pairs, when this version includes
    /// them, follow the fixed fields under their full canonical key
    /// (`SCHILY.xattr.<name>`), in byte-lexicographic key order.
    #[must_use]
    pub fn canonical_fields<'e>(self, entry: &'e TarEntry) -> Vec<CanonicalField<'e>> {
        let xattr_count = match self {
            Version::V0 => 0,
            Version::VDev => entry.xattrs.len(),
        };
        let mut fields: Vec<CanonicalField<'e>> = Vec::with_capacity(12 + xattr_count);

        fields.push(("name".into(), Cow::Borrowed(entry.name.as_slice())));
        fields.push(("mode".into(), owned_decimal(u64::from(entry.mode))));
        fields.push(("uid".into(), owned_decimal(entry.uid)));
        fields.push(("gid".into(), owned_decimal(entry.gid)));
        fields.push(("size".into(), owned_decimal(entry.size)));
        if self == Version::V0 {
            fields.push(("mtime".into(), owned_decimal(entry.mtime)));
        }
        fields.push(("typeflag".into(), Cow::Owned(vec![entry.typeflag])));
        fields.push(("linkname".into(), Cow::Borrowed(entry.linkname.as_slice())));
        fields.push(("uname".into(), Cow::Borrowed(entry.uname.as_slice())));
        fields.push(("gname".into(), Cow::Borrowed(entry.gname.as_slice())));
        fields.push(("devmajor".into(), owned_decimal(u64::from(entry.devmajor))));
        fields.push(("devminor".into(), owned_decimal(u64::from(entry.devminor))));

        if self == Version::VDev {
            for (key, value) in &entry.xattrs {
                fields.push((
                    Cow::Owned(format!("{PAX_SCHILY_XATTR}{key}")),
                    Cow::Borrowed(value.as_slice()),
                ));
            }
        }

        fields
    }
}

fn owned_decimal<'e>(value: u64) -> Cow<'e, [u8]> {
    Cow::Owned(value.to_string().into_bytes())
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Version {
    type Err = TarSumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tarsum" => Ok(Version::V0),
            "tarsum.dev" => Ok(Version::VDev),
            other => Err(TarSumError::UnknownVersion(other.to_string())),
        }
    }
}
