//! Reading the trailing structures of an extents container.
//!
//! [`read_container`] is the single place where a payload is classified. A payload whose footer
//! magic does not match is simply not a container, that is not an error. Everything else that goes
//! wrong once the magic matched is an error: a container with a damaged table must never be
//! mistaken for a plain payload.

use std::io::{self, Read, Seek, SeekFrom};

use crate::digest::ContentDigest;
use crate::format::{self, Footer, FOOTER_SIZE, TABLE_HEADER_SIZE};
use crate::records::{SignatureVerification, SourceDigests};
use crate::table::{DigestTable, TableHeader};

/// Describes how the trailing structures of a container are inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedContainer {
    /// The footer offsets are not ordered or point past the footer.
    #[error(
        "footer offsets are out of bounds (verification: {verification_offset}, table: \
         {table_offset}, source digests: {source_digests_offset}, footer: {footer_offset})"
    )]
    FooterOutOfBounds {
        /// Offset of the signature verification record.
        verification_offset: u64,
        /// Offset of the digest table.
        table_offset: u64,
        /// Offset of the source digests record.
        source_digests_offset: u64,
        /// Offset of the footer itself.
        footer_offset: u64,
    },

    /// The table claims to have entries but its keys have no length.
    #[error("digest table has {key_count} entries but a key size of zero")]
    ZeroKeySize {
        /// The number of entries claimed by the table.
        key_count: u32,
    },

    /// The entries of the table do not fit between the table offset and the footer.
    #[error("digest table of {key_count} entries of {key_size} bytes does not fit in the container")]
    TableOutOfBounds {
        /// The number of entries claimed by the table.
        key_count: u32,
        /// The key size claimed by the table.
        key_size: u32,
    },

    /// A table entry points outside of the payload area.
    #[error("digest {digest} points to offset {offset} outside of the payload area")]
    OffsetOutOfBounds {
        /// The digest of the entry.
        digest: ContentDigest,
        /// The offset stored for the entry.
        offset: u64,
    },

    /// The same digest appears more than once in the table.
    #[error("digest {0} appears more than once in the digest table")]
    DuplicateDigest(ContentDigest),
}

/// An error that can occur while reading the structures of a container.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Reading or seeking the payload failed.
    #[error("failed to read the extents container")]
    Io(#[from] io::Error),

    /// The container is internally inconsistent.
    #[error("malformed extents container")]
    Malformed(#[from] MalformedContainer),
}

/// The trailing structures of a container that was successfully read.
#[derive(Debug, Clone)]
pub struct ExtentsContainer {
    /// The footer of the container.
    pub footer: Footer,

    /// The length of the container in bytes.
    pub len: u64,

    /// The digest table.
    pub table: DigestTable,
}

impl ExtentsContainer {
    /// The offset at which the footer starts.
    pub fn footer_offset(&self) -> u64 {
        self.len - FOOTER_SIZE
    }
}

/// Reads the footer and digest table of `reader`.
///
/// Returns `Ok(None)` if the payload is not an extents container. The stream position is restored
/// before returning, also when an error occurs.
pub fn read_container<R: Read + Seek>(
    reader: &mut R,
) -> Result<Option<ExtentsContainer>, ContainerError> {
    format::with_restored_position(reader, |reader| {
        let Some((footer, len)) = format::read_footer(reader)? else {
            return Ok(None);
        };
        let footer_offset = len - FOOTER_SIZE;
        validate_footer(&footer, footer_offset)?;

        reader.seek(SeekFrom::Start(footer.table_offset))?;
        let header = TableHeader::read_from(reader)?;
        tracing::debug!(
            "table_start={:#x}, keys={}, keysize={}",
            footer.table_offset,
            header.key_count,
            header.key_size
        );

        if header.key_count > 0 && header.key_size == 0 {
            return Err(MalformedContainer::ZeroKeySize {
                key_count: header.key_count,
            }
            .into());
        }
        let table_end = footer
            .table_offset
            .saturating_add(TABLE_HEADER_SIZE)
            .saturating_add(header.entries_len());
        if table_end > footer_offset {
            return Err(MalformedContainer::TableOutOfBounds {
                key_count: header.key_count,
                key_size: header.key_size,
            }
            .into());
        }

        let table = read_table_entries(reader, header, footer.verification_offset)?;
        Ok(Some(ExtentsContainer { footer, len, table }))
    })
}

fn validate_footer(footer: &Footer, footer_offset: u64) -> Result<(), MalformedContainer> {
    let ordered = footer.verification_offset <= footer.table_offset
        && footer.table_offset <= footer.source_digests_offset
        && footer.source_digests_offset <= footer_offset
        && footer.table_offset.saturating_add(TABLE_HEADER_SIZE) <= footer_offset;
    if ordered {
        Ok(())
    } else {
        Err(MalformedContainer::FooterOutOfBounds {
            verification_offset: footer.verification_offset,
            table_offset: footer.table_offset,
            source_digests_offset: footer.source_digests_offset,
            footer_offset,
        })
    }
}

fn read_table_entries<R: Read>(
    reader: &mut R,
    header: TableHeader,
    payload_end: u64,
) -> Result<DigestTable, ContainerError> {
    let mut table = DigestTable::with_capacity(header.key_size, header.key_count as usize);
    let key_size = header.key_size as usize;
    let mut entry = vec![0u8; key_size + 8];
    for _ in 0..header.key_count {
        reader.read_exact(&mut entry)?;
        let digest = ContentDigest::from(&entry[..key_size]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&entry[key_size..]);
        let offset = u64::from_le_bytes(offset);
        if offset >= payload_end {
            return Err(MalformedContainer::OffsetOutOfBounds { digest, offset }.into());
        }
        if !table.insert_unique(digest.clone(), offset) {
            return Err(MalformedContainer::DuplicateDigest(digest).into());
        }
    }
    Ok(table)
}

/// Reads the signature verification record of a container. Returns `Ok(None)` if `reader` is not
/// an extents container. The stream position is restored.
pub fn read_signature_verification<R: Read + Seek>(
    reader: &mut R,
) -> Result<Option<SignatureVerification>, ContainerError> {
    format::with_restored_position(reader, |reader| {
        let Some((footer, len)) = format::read_footer(reader)? else {
            return Ok(None);
        };
        validate_footer(&footer, len - FOOTER_SIZE)?;
        reader.seek(SeekFrom::Start(footer.verification_offset))?;
        Ok(Some(SignatureVerification::read_from(reader)?))
    })
}

/// Reads the digests of the original input archive. Returns `Ok(None)` if `reader` is not an
/// extents container. The stream position is restored.
pub fn read_source_digests<R: Read + Seek>(
    reader: &mut R,
) -> Result<Option<SourceDigests>, ContainerError> {
    format::with_restored_position(reader, |reader| {
        let Some((footer, len)) = format::read_footer(reader)? else {
            return Ok(None);
        };
        validate_footer(&footer, len - FOOTER_SIZE)?;
        reader.seek(SeekFrom::Start(footer.source_digests_offset))?;
        Ok(Some(SourceDigests::read_from(reader)?))
    })
}
