//! Copy avoidance: sharing storage between a byte range of the payload and a destination file.

use std::fmt::Debug;
use std::fs::File;
use std::io;
use std::num::NonZeroU64;

use reflink_copy::ReflinkBlockBuilder;

/// A file system primitive that makes `len` bytes of `src` starting at `src_offset` appear in
/// `dest` at `dest_offset` without copying them.
///
/// Any error is treated the same by the installer: the content is copied instead.
pub trait RangeClone: Debug + Send + Sync {
    /// Clones the byte range.
    fn clone_range(
        &self,
        dest: &File,
        src: &File,
        src_offset: u64,
        len: u64,
        dest_offset: u64,
    ) -> io::Result<()>;
}

/// Clones ranges with the block cloning primitive of the file system: `FICLONERANGE` on Linux
/// (btrfs, xfs) and block cloning on ReFS volumes on Windows. Requests on file systems without
/// support fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCloneRange;

impl RangeClone for FileCloneRange {
    fn clone_range(
        &self,
        dest: &File,
        src: &File,
        src_offset: u64,
        len: u64,
        dest_offset: u64,
    ) -> io::Result<()> {
        let len = NonZeroU64::new(len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot clone an empty range")
        })?;
        ReflinkBlockBuilder::new(src, dest, len)
            .from_offset(src_offset)
            .to_offset(dest_offset)
            .reflink_block()
    }
}

/// Never clones anything, which makes the installer copy all content.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClone;

impl RangeClone for NoClone {
    fn clone_range(
        &self,
        _dest: &File,
        _src: &File,
        _src_offset: u64,
        _len: u64,
        _dest_offset: u64,
    ) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "range cloning is disabled",
        ))
    }
}
