//! The digest table maps the digest of a file's content to the offset of its payload region.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::digest::ContentDigest;

/// In-memory form of the digest table of a single container.
///
/// Every distinct content digest has exactly one entry. The table is built once per package and
/// is read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestTable {
    key_size: u32,
    entries: HashMap<ContentDigest, u64>,
}

/// Returned by [`DigestTable::insert`] when the digest does not have the length of the table's
/// keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("digest of {actual} bytes does not match the table key size of {expected} bytes")]
pub struct KeySizeMismatch {
    /// The key size of the table.
    pub expected: u32,
    /// The length of the rejected digest.
    pub actual: usize,
}

/// The raw header of a digest table as it is stored in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    /// The number of entries that follow.
    pub key_count: u32,
    /// The length in bytes of every digest.
    pub key_size: u32,
}

impl TableHeader {
    /// Reads a table header.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let key_count = reader.read_u32::<LittleEndian>()?;
        let key_size = reader.read_u32::<LittleEndian>()?;
        Ok(Self {
            key_count,
            key_size,
        })
    }

    /// The number of bytes occupied by the entries following this header.
    pub fn entries_len(&self) -> u64 {
        u64::from(self.key_count)
            .saturating_mul(u64::from(self.key_size) + crate::format::TABLE_OFFSET_SIZE)
    }
}

impl DigestTable {
    /// Constructs an empty table for digests of `key_size` bytes.
    pub fn new(key_size: u32) -> Self {
        Self {
            key_size,
            entries: HashMap::new(),
        }
    }

    /// Constructs an empty table with room for `capacity` entries.
    pub fn with_capacity(key_size: u32, capacity: usize) -> Self {
        Self {
            key_size,
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// The length in bytes of every digest in this table.
    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the offset of the payload region for the given digest.
    pub fn get(&self, digest: &[u8]) -> Option<u64> {
        self.entries.get(digest).copied()
    }

    /// Returns true if the table contains the digest.
    pub fn contains(&self, digest: &[u8]) -> bool {
        self.entries.contains_key(digest)
    }

    /// Adds an entry unless the digest is already present. Returns the offset stored for the
    /// digest, which is the existing one if there was one.
    pub fn insert(&mut self, digest: ContentDigest, offset: u64) -> Result<u64, KeySizeMismatch> {
        if digest.len() != self.key_size as usize {
            return Err(KeySizeMismatch {
                expected: self.key_size,
                actual: digest.len(),
            });
        }
        Ok(*self.entries.entry(digest).or_insert(offset))
    }

    /// Adds an entry read from a container. Returns false if the digest was already present, in
    /// which case the table is left unchanged.
    pub(crate) fn insert_unique(&mut self, digest: ContentDigest, offset: u64) -> bool {
        match self.entries.entry(digest) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(offset);
                true
            }
        }
    }

    /// Iterates over all entries ordered by digest.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&ContentDigest, u64)> + '_ {
        let mut entries = self
            .entries
            .iter()
            .map(|(digest, offset)| (digest, *offset))
            .collect::<Vec<_>>();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    /// The number of bytes [`DigestTable::write_to`] produces.
    pub fn encoded_len(&self) -> u64 {
        crate::format::TABLE_HEADER_SIZE
            + TableHeader {
                key_count: self.entries.len() as u32,
                key_size: self.key_size,
            }
            .entries_len()
    }

    /// Writes the table, sorted by digest so the output is deterministic.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let key_count = u32::try_from(self.entries.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many table entries"))?;
        writer.write_u32::<LittleEndian>(key_count)?;
        writer.write_u32::<LittleEndian>(self.key_size)?;
        for (digest, offset) in self.iter_sorted() {
            writer.write_all(digest.as_bytes())?;
            writer.write_u64::<LittleEndian>(offset)?;
        }
        Ok(())
    }
}
