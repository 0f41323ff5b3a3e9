//! Byte layout of an extents container.
//!
//! ```text
//! [payload region]*            raw file content, every region starts at a multiple of the
//!                              alignment unit used while transcoding
//! [signature verification]     code: i32, message_len: u64, message
//! [digest table]               key_count: u32, key_size: u32, key_count * (digest, offset: u64)
//! [source digests]             input_len: u64, algo_count: u32,
//!                              algo_count * (name_len: u32, digest_len: u32, name, digest)
//! [padding]                    up to the next multiple of the alignment unit, minus the footer
//! [footer]                     verification_offset: u64, table_offset: u64,
//!                              source_digests_offset: u64, magic: u64
//! ```
//!
//! All integers are little endian. The footer always occupies the last [`FOOTER_SIZE`] bytes so a
//! reader can find it without scanning.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The magic value stored at the very end of an extents container, the bytes `KWTSH100`.
pub const EXTENTS_MAGIC: u64 = u64::from_le_bytes(*b"KWTSH100");

/// Size of the footer in bytes: three offsets and the magic.
pub const FOOTER_SIZE: u64 = 8 + 8 + 8 + 8;

/// Size of the digest table header: `key_count` and `key_size`.
pub const TABLE_HEADER_SIZE: u64 = 4 + 4;

/// Size of the offset that follows every digest in the table.
pub const TABLE_OFFSET_SIZE: u64 = 8;

/// The fixed trailing record of an extents container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Offset of the signature verification record.
    pub verification_offset: u64,

    /// Offset of the digest table.
    pub table_offset: u64,

    /// Offset of the source digests record.
    pub source_digests_offset: u64,
}

impl Footer {
    /// Writes the footer, including the magic, to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.verification_offset)?;
        writer.write_u64::<LittleEndian>(self.table_offset)?;
        writer.write_u64::<LittleEndian>(self.source_digests_offset)?;
        writer.write_u64::<LittleEndian>(EXTENTS_MAGIC)?;
        Ok(())
    }

    /// Reads the raw footer fields from `reader` and returns them together with the stored magic.
    /// No validation is performed.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, u64)> {
        let verification_offset = reader.read_u64::<LittleEndian>()?;
        let table_offset = reader.read_u64::<LittleEndian>()?;
        let source_digests_offset = reader.read_u64::<LittleEndian>()?;
        let magic = reader.read_u64::<LittleEndian>()?;
        Ok((
            Self {
                verification_offset,
                table_offset,
                source_digests_offset,
            },
            magic,
        ))
    }
}

/// Returns the number of bytes needed to advance `pos` to the next multiple of `unit`. `unit` must
/// be a power of two.
pub fn pad_to(pos: u64, unit: u64) -> u64 {
    debug_assert!(unit.is_power_of_two());
    pos.wrapping_neg() & (unit - 1)
}

/// Rounds `size` up to the next multiple of `unit`. Unlike [`pad_to`] this accepts any non-zero
/// unit.
pub fn round_up(size: u64, unit: u64) -> u64 {
    match size % unit {
        0 => size,
        rem => size + (unit - rem),
    }
}

/// Returns the size of the filesystem pages on this system. Clone requests have to be aligned to
/// this granularity.
pub fn page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as u64;
        }
    }
    4096
}

/// Runs `f` against `reader` and afterwards moves the stream back to where it was before. The
/// position is restored on every exit path; if `f` succeeded but restoring the position fails that
/// failure is returned instead.
pub(crate) fn with_restored_position<R, T, E>(
    reader: &mut R,
    f: impl FnOnce(&mut R) -> Result<T, E>,
) -> Result<T, E>
where
    R: Seek,
    E: From<io::Error>,
{
    let current = reader.stream_position()?;
    let result = f(reader);
    match reader.seek(SeekFrom::Start(current)) {
        Ok(_) => result,
        Err(err) => {
            tracing::error!("unable to seek back to original location: {err}");
            result.and(Err(err.into()))
        }
    }
}

/// Reads the footer at the end of `reader` if there is one. Returns `Ok(None)` if the stream is
/// too short to contain a footer or if the magic does not match. The stream position is restored.
pub fn read_footer<R: Read + Seek>(reader: &mut R) -> io::Result<Option<(Footer, u64)>> {
    with_restored_position(reader, |reader| {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < FOOTER_SIZE {
            return Ok(None);
        }
        reader.seek(SeekFrom::Start(len - FOOTER_SIZE))?;
        let (footer, magic) = Footer::read_from(reader)?;
        Ok((magic == EXTENTS_MAGIC).then_some((footer, len)))
    })
}

/// Returns true if `reader` contains an extents container. This only looks at the magic in the
/// footer and leaves the stream position untouched.
pub fn is_extents_container<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    Ok(read_footer(reader)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[test]
    fn test_magic_bytes() {
        assert_eq!(EXTENTS_MAGIC, 3_472_329_499_408_095_051);
    }

    #[rstest]
    #[case(0, 4096, 0)]
    #[case(1, 4096, 4095)]
    #[case(4095, 4096, 1)]
    #[case(4096, 4096, 0)]
    #[case(4097, 8, 7)]
    fn test_pad_to(#[case] pos: u64, #[case] unit: u64, #[case] expected: u64) {
        assert_eq!(pad_to(pos, unit), expected);
    }

    #[rstest]
    #[case(0, 4096, 0)]
    #[case(1, 4096, 4096)]
    #[case(4096, 4096, 4096)]
    #[case(5000, 4096, 8192)]
    #[case(10, 3, 12)]
    fn test_round_up(#[case] size: u64, #[case] unit: u64, #[case] expected: u64) {
        assert_eq!(round_up(size, unit), expected);
    }

    #[test]
    fn test_footer_round_trip() {
        let footer = Footer {
            verification_offset: 4096,
            table_offset: 4200,
            source_digests_offset: 4300,
        };
        let mut buf = b"payload".to_vec();
        footer.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, 7 + FOOTER_SIZE);
        assert_eq!(&buf[buf.len() - 8..], b"KWTSH100");

        let mut cursor = Cursor::new(buf);
        cursor.set_position(3);
        let (read, len) = read_footer(&mut cursor).unwrap().unwrap();
        assert_eq!(read, footer);
        assert_eq!(len, 7 + FOOTER_SIZE);
        assert_eq!(cursor.position(), 3);
    }

    #[rstest]
    #[case::empty(Vec::new())]
    #[case::short(b"tiny".to_vec())]
    #[case::plain(vec![0u8; 1024])]
    fn test_not_an_extents_container(#[case] content: Vec<u8>) {
        let mut cursor = Cursor::new(content);
        assert!(!is_extents_container(&mut cursor).unwrap());
        assert_eq!(cursor.position(), 0);
    }
}
