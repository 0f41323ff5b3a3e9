//! Places the content of a single file from an extents container.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;

use super::{FileAction, PackageInstall};
use crate::digest::ContentDigest;
use crate::format::round_up;
use crate::manifest::FileEntry;

/// Describes how the content of a file ended up at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementMethod {
    /// The byte range was cloned from the container.
    Cloned,

    /// The content was copied from the container because cloning failed.
    Copied,

    /// A hard link to an earlier path of the same inode was created.
    HardLinked,

    /// The file is empty, no content had to be placed.
    Empty,
}

impl fmt::Display for PlacementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementMethod::Cloned => write!(f, "clone"),
            PlacementMethod::Copied => write!(f, "copy"),
            PlacementMethod::HardLinked => write!(f, "hardlink"),
            PlacementMethod::Empty => write!(f, "empty"),
        }
    }
}

/// The result of [`PackageInstall::place_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Nothing was done. The content of the file has to be written by the ordinary installer.
    NotHandled,

    /// The content of the file is in place. Only its metadata remains to be applied.
    ContentsPlaced(PlacementMethod),
}

/// Errors that can occur when calling [`PackageInstall::place_file`]. All of them are fatal for
/// the installation of the package.
#[derive(Debug, thiserror::Error)]
pub enum PlaceFileError {
    /// The destination file could not be created.
    #[error("could not create destination file")]
    FailedToCreateDestinationFile(#[source] io::Error),

    /// A hard link to an earlier path of the same inode could not be created.
    #[error("failed to hard link to '{}'", .0.display())]
    FailedToLink(PathBuf, #[source] io::Error),

    /// The file has content but the manifest does not record its digest.
    #[error("the package manifest does not record a digest for this file")]
    MissingDigest,

    /// The digest of the file is not part of the container.
    #[error("the payload does not contain content with digest {0}")]
    DigestNotFound(ContentDigest),

    /// Reading from the container failed or ended prematurely.
    #[error("failed to read {len} bytes at offset {offset:#x} of the payload")]
    ShortRead {
        /// The offset of the read.
        offset: u64,
        /// The number of bytes requested.
        len: usize,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Writing to the destination failed or wrote fewer bytes than requested.
    #[error("failed to write to the destination file")]
    ShortWrite(#[source] io::Error),

    /// The destination could not be truncated to the size of the file after cloning.
    #[error("failed to truncate the destination file to {0} bytes")]
    FailedToTruncate(u64, #[source] io::Error),

    /// The read position of the payload could not be moved or restored.
    #[error("failed to reposition the payload")]
    SourcePosition(#[from] io::Error),
}

impl PackageInstall {
    /// Places the content of the regular file `entry` below `target_dir`.
    ///
    /// Returns [`Placement::NotHandled`] when the payload is not an extents container, when only
    /// the metadata of the file is updated ([`FileAction::Touch`]) and for entries without content
    /// in the payload such as directories, symlinks and ghost files. Otherwise the destination is
    /// created exclusively and its content is cloned or copied from the container, or it is hard
    /// linked to an earlier path of the same inode.
    pub fn place_file(
        &mut self,
        entry: &FileEntry,
        target_dir: &Path,
        action: FileAction,
    ) -> Result<Placement, PlaceFileError> {
        let Some(container) = &self.container else {
            return Ok(Placement::NotHandled);
        };
        if !entry.is_regular() || entry.flags.ghost {
            return Ok(Placement::NotHandled);
        }

        let destination = target_dir.join(&entry.path);

        if action == FileAction::Touch {
            // An existing path is still a valid link target for the other paths of its inode.
            if entry.nlink > 1 {
                self.inode_index.entry(entry.inode).or_insert(destination);
            }
            return Ok(Placement::NotHandled);
        }

        if entry.nlink > 1 {
            if let Some(existing) = self.inode_index.get(&entry.inode) {
                fs::hard_link(existing, &destination)
                    .map_err(|e| PlaceFileError::FailedToLink(existing.clone(), e))?;
                self.stats.hard_links += 1;
                return Ok(Placement::ContentsPlaced(PlacementMethod::HardLinked));
            }
            self.inode_index.insert(entry.inode, destination.clone());
        }

        let dest_file =
            create_exclusive(&destination).map_err(PlaceFileError::FailedToCreateDestinationFile)?;

        if entry.size == 0 {
            self.stats.empty_files += 1;
            return Ok(Placement::ContentsPlaced(PlacementMethod::Empty));
        }

        let digest = entry.digest.as_ref().ok_or(PlaceFileError::MissingDigest)?;
        let offset = container
            .table
            .get(digest.as_bytes())
            .ok_or_else(|| PlaceFileError::DigestNotFound(digest.clone()))?;

        let padded_len = round_up(entry.size, self.alignment_unit);
        match self
            .cloner
            .clone_range(&dest_file, &self.payload, offset, padded_len, 0)
        {
            Ok(()) => {
                dest_file
                    .set_len(entry.size)
                    .map_err(|e| PlaceFileError::FailedToTruncate(entry.size, e))?;
                self.stats.cloned_files += 1;
                self.stats.cloned_bytes += entry.size;
                Ok(Placement::ContentsPlaced(PlacementMethod::Cloned))
            }
            Err(err) => {
                tracing::debug!(
                    "failed to clone {} bytes at {:#x} to {}: {err}, falling back to copying",
                    padded_len,
                    offset,
                    destination.display()
                );
                copy_range(
                    &self.payload,
                    offset,
                    entry.size,
                    dest_file,
                    self.buffer_size,
                )?;
                self.stats.copied_files += 1;
                self.stats.copied_bytes += entry.size;
                Ok(Placement::ContentsPlaced(PlacementMethod::Copied))
            }
        }
    }
}

/// Creates `path`, failing if it already exists. Until the installer applies the final permissions
/// the file is only readable by its owner.
fn create_exclusive(path: &Path) -> io::Result<File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o400);
    }
    options.open(path)
}

/// Copies `len` bytes starting at `offset` of `source` to `dest` in chunks of at most
/// `buffer_size` bytes.
fn copy_range(
    source: &File,
    offset: u64,
    len: u64,
    mut dest: File,
    buffer_size: usize,
) -> Result<(), PlaceFileError> {
    let mut buffer = vec![0u8; buffer_size.min(usize::try_from(len).unwrap_or(usize::MAX))];
    let mut position = offset;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = buffer.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        read_exact_at(source, &mut buffer[..chunk], position)?;
        dest.write_all(&buffer[..chunk])
            .map_err(PlaceFileError::ShortWrite)?;
        position += chunk as u64;
        remaining -= chunk as u64;
    }
    dest.flush().map_err(PlaceFileError::ShortWrite)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<(), PlaceFileError> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
        .map_err(|source| PlaceFileError::ShortRead {
            offset,
            len: buf.len(),
            source,
        })
}

#[cfg(not(unix))]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<(), PlaceFileError> {
    use std::io::{Read, Seek, SeekFrom};
    let mut handle = file;
    crate::format::with_restored_position(&mut handle, |handle| {
        handle.seek(SeekFrom::Start(offset))?;
        let len = buf.len();
        handle
            .read_exact(buf)
            .map_err(|source| PlaceFileError::ShortRead {
                offset,
                len,
                source,
            })
    })
}
