//! Per-entry digesting and archive-level aggregation.

use std::collections::HashMap;
use std::fmt;

use digest::DynDigest;

use crate::entry::TarEntry;
use crate::scan::EntrySink;
use crate::thash::THash;
use crate::version::Version;

/// A completed entry's digest, with the keys aggregation orders by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySum {
    name: Vec<u8>,
    pos: usize,
    sum: String,
}

impl EntrySum {
    /// The entry's materialized name.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Arrival position within the archive, starting at zero.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Lowercase hex digest over the canonical header image and payload.
    #[must_use]
    pub fn sum(&self) -> &str {
        &self.sum
    }
}

/// The hash state of the entry currently being streamed.
struct OpenEntry {
    name: Vec<u8>,
    hasher: Box<dyn DynDigest>,
}

/// Hashes each entry (canonical header image followed by payload) and
/// aggregates the per-entry digests into the archive digest.
///
/// Acts as the [`EntrySink`] behind the pass-through reader: a fresh hash
/// state is opened on `entry_start`, fed the canonical header then the
/// payload slices, and finalized to a lowercase hex string on
/// `entry_end`. Completed digests accumulate in arrival order.
/// Aggregation orders a copy by digest — except that entries sharing a
/// name keep their arrival order relative to each other — so the archive
/// digest is invariant under reordering of distinct entries but
/// sensitive to the order of same-named duplicates.
pub struct EntryDigester {
    version: Version,
    thash: THash,
    current: Option<OpenEntry>,
    sums: Vec<EntrySum>,
}

impl EntryDigester {
    /// Create a digester for the given version policy and hash.
    #[must_use]
    pub fn new(version: Version, thash: THash) -> EntryDigester {
        EntryDigester {
            version,
            thash,
            current: None,
            sums: Vec::new(),
        }
    }

    /// The digests of all completed entries, in arrival order.
    #[must_use]
    pub fn entry_sums(&self) -> &[EntrySum] {
        &self.sums
    }

    /// Compute the archive digest over the completed entries.
    ///
    /// A copy of the entry digests is put in aggregation order (see the
    /// type docs) and fed to a fresh hash, followed by `extra` when
    /// given. The result is lowercase hex. Repeated calls with the same
    /// `extra` return the same string; an entry whose payload is still
    /// mid-stream does not contribute.
    #[must_use]
    pub fn archive_sum(&self, extra: Option<&[u8]>) -> String {
        let mut hasher = self.thash.hasher();
        for entry in aggregation_order(&self.sums) {
            hasher.update(entry.sum.as_bytes());
        }
        if let Some(extra) = extra {
            hasher.update(extra);
        }
        hex::encode(hasher.finalize())
    }
}

/// Order entry digests for aggregation: byte-lexicographically by hex
/// digest, with same-named entries holding their arrival order relative
/// to each other in the slots their digests claimed. (The pairwise rule
/// "same name → by position, otherwise → by digest" is not a total
/// order, so it cannot be handed to a comparison sort directly.)
fn aggregation_order(sums: &[EntrySum]) -> Vec<EntrySum> {
    let mut sorted = sums.to_vec();
    sorted.sort_by(|a, b| a.sum.cmp(&b.sum).then(a.pos.cmp(&b.pos)));

    let mut groups: HashMap<&[u8], Vec<usize>> = HashMap::new();
    for (slot, entry) in sorted.iter().enumerate() {
        groups.entry(&entry.name).or_default().push(slot);
    }

    let mut result = sorted.clone();
    for slots in groups.into_values() {
        if slots.len() < 2 {
            continue;
        }
        let mut group: Vec<&EntrySum> = slots.iter().map(|&slot| &sorted[slot]).collect();
        group.sort_by_key(|entry| entry.pos);
        for (&slot, entry) in slots.iter().zip(group) {
            result[slot] = entry.clone();
        }
    }
    result
}

impl EntrySink for EntryDigester {
    fn entry_start(&mut self, entry: &TarEntry) {
        let mut hasher = self.thash.hasher();
        for (key, value) in self.version.canonical_fields(entry) {
            hasher.update(key.as_bytes());
            hasher.update(&value);
        }
        self.current = Some(OpenEntry {
            name: entry.name.clone(),
            hasher,
        });
    }

    fn payload(&mut self, data: &[u8]) {
        if let Some(open) = &mut self.current {
            open.hasher.update(data);
        }
    }

    fn entry_end(&mut self) {
        if let Some(open) = self.current.take() {
            self.sums.push(EntrySum {
                name: open.name,
                pos: self.sums.len(),
                sum: hex::encode(open.hasher.finalize()),
            });
        }
    }
}

impl fmt::Debug for EntryDigester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // current doesn't impl Debug
        f.debug_struct("EntryDigester")
            .field("version", &self.version)
            .field("thash", &self.thash)
            .field("sums", &self.sums)
            .finish_non_exhaustive()
    }
}
