//! Converts a package archive into an extents container.
//!
//! The [`Transcoder`] writes the content of every regular file uncompressed to the output, each
//! region starting at a multiple of the alignment unit. Content is deduplicated by digest: a file
//! whose digest was seen before reuses the earlier region. [`transcode_tar`] drives the transcoder
//! from a tar stream and the [`PackageManifest`] describing it.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::digest::{ContentDigest, DigestAlgorithm, DigestingReader};
use crate::format::{pad_to, page_size, Footer, FOOTER_SIZE};
use crate::manifest::{normalize_archive_path, FileEntry, PackageManifest, PathTraversal};
use crate::records::{SignatureVerification, SourceDigests};
use crate::table::DigestTable;

/// The name of the environment variable that holds a comma separated deny list.
pub const DENY_LIST_ENV: &str = "RATTLER_EXTENTS_TRANSCODE_DENYLIST";

/// An error that can occur while transcoding a package.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// An I/O error occurred while reading the input or writing the container.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The alignment unit is not a power of two.
    #[error("the alignment unit must be a non-zero power of two, got {0}")]
    InvalidAlignment(u64),

    /// The digest of a file does not have the key size of the digest table.
    #[error("digest of {actual} bytes does not match the table key size of {expected} bytes")]
    DigestLengthMismatch {
        /// The key size of the table.
        expected: u32,
        /// The length of the digest.
        actual: usize,
    },

    /// A regular file with content has no digest in the manifest.
    #[error("'{0}' has no content digest in the package manifest")]
    MissingDigest(PathBuf),

    /// The archive contains a file that is not described by the manifest.
    #[error("'{0}' is not part of the package manifest")]
    UnknownEntry(PathBuf),

    /// The size of a file in the archive differs from its size in the manifest.
    #[error("'{path}' is {actual} bytes in the archive but {expected} bytes in the manifest")]
    SizeMismatch {
        /// The path of the file.
        path: PathBuf,
        /// The size recorded in the manifest.
        expected: u64,
        /// The size of the archive entry.
        actual: u64,
    },

    /// A file with content in the manifest has no counterpart in the archive.
    #[error("the content of '{0}' is missing from the archive")]
    MissingContent(PathBuf),

    /// The content stream of a file ended before the declared size was read.
    #[error("expected {expected} bytes of content but the stream ended after {actual}")]
    ShortRead {
        /// The declared size.
        expected: u64,
        /// The number of bytes that could be read.
        actual: u64,
    },

    /// An archive entry refers to a path outside of the package.
    #[error(transparent)]
    PathTraversal(#[from] PathTraversal),
}

/// Options that control transcoding.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// The alignment unit of the payload regions. Defaults to the page size of the system.
    pub alignment: u64,

    /// The algorithms used to hash the complete input stream.
    pub source_digests: Vec<DigestAlgorithm>,

    /// Package names that contain any of these substrings are not transcoded but copied to the
    /// output as-is.
    pub deny_list: Vec<String>,

    /// The outcome of the signature verification of the package, stored in the container.
    pub verification: SignatureVerification,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            alignment: page_size(),
            source_digests: vec![DigestAlgorithm::Sha256],
            deny_list: Vec::new(),
            verification: SignatureVerification::default(),
        }
    }
}

impl TranscodeOptions {
    /// Returns true if the package with the given name must not be transcoded.
    pub fn is_denied(&self, package_name: &str) -> bool {
        self.deny_list
            .iter()
            .any(|entry| !entry.is_empty() && package_name.contains(entry.as_str()))
    }
}

/// Splits a comma separated deny list.
pub fn parse_deny_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
}

/// Counters collected while writing a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    /// Regular files with content that were added.
    pub files: u64,

    /// Files whose content was already present and was not written again.
    pub deduplicated: u64,

    /// Bytes of file content written, excluding padding.
    pub content_bytes: u64,

    /// The total length of the container.
    pub container_len: u64,
}

/// The result of [`transcode_tar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The package was transcoded into an extents container.
    Transcoded(TranscodeStats),

    /// The package is on the deny list and was copied unchanged.
    PassedThrough {
        /// The number of bytes copied.
        bytes: u64,
    },
}

/// Wraps a writer and keeps track of the current offset in the output.
#[derive(Debug)]
struct CountingWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> CountingWriter<W> {
    fn write_zeros(&mut self, count: u64) -> io::Result<()> {
        io::copy(&mut io::repeat(0).take(count), self)?;
        Ok(())
    }
}

/// Writes an extents container.
#[derive(Debug)]
pub struct Transcoder<W: Write> {
    writer: CountingWriter<W>,
    alignment: u64,
    table: DigestTable,
    stats: TranscodeStats,
}

impl<W: Write> Transcoder<W> {
    /// Constructs a transcoder that writes to `writer`, aligning regions to `alignment` bytes and
    /// keying the table with digests of `key_size` bytes.
    pub fn new(writer: W, alignment: u64, key_size: u32) -> Result<Self, TranscodeError> {
        if !alignment.is_power_of_two() {
            return Err(TranscodeError::InvalidAlignment(alignment));
        }
        Ok(Self {
            writer: CountingWriter {
                inner: writer,
                bytes_written: 0,
            },
            alignment,
            table: DigestTable::new(key_size),
            stats: TranscodeStats::default(),
        })
    }

    /// The table of all content written so far.
    pub fn table(&self) -> &DigestTable {
        &self.table
    }

    /// Adds the content of a file with the given digest and size. If content with this digest was
    /// already written `content` is not read at all. Returns the offset of the payload region.
    ///
    /// Files without content should not be added; they are not part of the table.
    pub fn add_file(
        &mut self,
        digest: &ContentDigest,
        size: u64,
        content: impl Read,
    ) -> Result<u64, TranscodeError> {
        if digest.len() != self.table.key_size() as usize {
            return Err(TranscodeError::DigestLengthMismatch {
                expected: self.table.key_size(),
                actual: digest.len(),
            });
        }

        self.stats.files += 1;
        if let Some(offset) = self.table.get(digest.as_bytes()) {
            self.stats.deduplicated += 1;
            return Ok(offset);
        }

        let padding = pad_to(self.writer.bytes_written, self.alignment);
        self.writer.write_zeros(padding)?;
        let offset = self.writer.bytes_written;

        let copied = io::copy(&mut content.take(size), &mut self.writer)?;
        if copied != size {
            return Err(TranscodeError::ShortRead {
                expected: size,
                actual: copied,
            });
        }
        self.stats.content_bytes += size;

        self.table
            .insert(digest.clone(), offset)
            .map_err(|e| TranscodeError::DigestLengthMismatch {
                expected: e.expected,
                actual: e.actual,
            })
    }

    /// Writes the trailing records and the footer. Returns the underlying writer and the
    /// statistics of the container.
    pub fn finish(
        mut self,
        verification: &SignatureVerification,
        source_digests: &SourceDigests,
    ) -> Result<(W, TranscodeStats), TranscodeError> {
        let padding = pad_to(self.writer.bytes_written, self.alignment);
        self.writer.write_zeros(padding)?;

        let verification_offset = self.writer.bytes_written;
        verification.write_to(&mut self.writer)?;

        let table_offset = self.writer.bytes_written;
        self.table.write_to(&mut self.writer)?;

        let source_digests_offset = self.writer.bytes_written;
        source_digests.write_to(&mut self.writer)?;

        let padding = pad_to(self.writer.bytes_written + FOOTER_SIZE, self.alignment);
        self.writer.write_zeros(padding)?;

        Footer {
            verification_offset,
            table_offset,
            source_digests_offset,
        }
        .write_to(&mut self.writer)?;
        self.writer.flush()?;

        tracing::debug!(
            "wrote container of {} bytes, table_start={:#x}, keys={}, keysize={}",
            self.writer.bytes_written,
            table_offset,
            self.table.len(),
            self.table.key_size()
        );

        self.stats.container_len = self.writer.bytes_written;
        Ok((self.writer.inner, self.stats))
    }
}

/// Transcodes the tar archive read from `input` into an extents container written to `output`.
///
/// The digests of the files are taken from `manifest`, the content is not hashed again. The whole
/// input is hashed with the algorithms of [`TranscodeOptions::source_digests`] and the result is
/// stored in the container. Packages on the deny list are copied to `output` unchanged.
#[instrument(skip_all, fields(package = %manifest.name))]
pub fn transcode_tar<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    manifest: &PackageManifest,
    options: &TranscodeOptions,
) -> Result<TranscodeOutcome, TranscodeError> {
    if options.is_denied(&manifest.name) {
        tracing::warn!(
            "package '{}' is on the deny list, copying it unchanged",
            manifest.name
        );
        let bytes = io::copy(&mut input, &mut output)?;
        output.flush()?;
        return Ok(TranscodeOutcome::PassedThrough { bytes });
    }

    let entries: HashMap<&Path, &FileEntry> = manifest
        .files
        .iter()
        .map(|entry| (entry.path.as_path(), entry))
        .collect();

    let key_size = manifest.digest_algorithm.digest_len() as u32;
    let mut transcoder = Transcoder::new(output, options.alignment, key_size)?;
    let mut reader = DigestingReader::new(input, options.source_digests.iter().copied());

    {
        let mut archive = tar::Archive::new(&mut reader);
        for entry in archive.entries()? {
            let entry = entry?;
            let entry_type = entry.header().entry_type();
            if !entry_type.is_file() {
                continue;
            }

            let Some(path) = normalize_archive_path(&entry.path()?)? else {
                continue;
            };
            let Some(file) = entries.get(path.as_path()) else {
                return Err(TranscodeError::UnknownEntry(path));
            };
            if !file.has_content() {
                continue;
            }
            if entry.size() != file.size {
                return Err(TranscodeError::SizeMismatch {
                    path,
                    expected: file.size,
                    actual: entry.size(),
                });
            }
            let Some(digest) = &file.digest else {
                return Err(TranscodeError::MissingDigest(path));
            };

            transcoder.add_file(digest, file.size, entry)?;
        }

        // Trailing blocks after the end-of-archive marker are part of the source as well.
        io::copy(archive.into_inner(), &mut io::sink())?;
    }

    if let Some(missing) = manifest.files.iter().find(|file| {
        file.has_content()
            && !file
                .digest
                .as_ref()
                .is_some_and(|digest| transcoder.table().contains(digest.as_bytes()))
    }) {
        return Err(match missing.digest {
            Some(_) => TranscodeError::MissingContent(missing.path.clone()),
            None => TranscodeError::MissingDigest(missing.path.clone()),
        });
    }

    let (_, input_len, digests) = reader.finalize();
    let source_digests = SourceDigests::new(input_len, digests);
    let (_, stats) = transcoder.finish(&options.verification, &source_digests)?;

    tracing::debug!(
        "transcoded {} files ({} deduplicated) into {} bytes",
        stats.files,
        stats.deduplicated,
        stats.container_len
    );

    Ok(TranscodeOutcome::Transcoded(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::read_container;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::io::Cursor;

    fn digest(content: &[u8]) -> ContentDigest {
        DigestAlgorithm::Sha256.digest_bytes(content)
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(4095)]
    fn test_invalid_alignment(#[case] alignment: u64) {
        assert_matches!(
            Transcoder::new(Vec::new(), alignment, 32),
            Err(TranscodeError::InvalidAlignment(a)) if a == alignment
        );
    }

    #[test]
    fn test_regions_are_aligned_and_deduplicated() {
        let mut transcoder = Transcoder::new(Vec::new(), 64, 32).unwrap();
        let a = transcoder
            .add_file(&digest(b"hello"), 5, &b"hello"[..])
            .unwrap();
        let b = transcoder
            .add_file(&digest(b"world!"), 6, &b"world!"[..])
            .unwrap();
        let c = transcoder
            .add_file(&digest(b"hello"), 5, &b"ignored"[..])
            .unwrap();
        assert_eq!((a, b, c), (0, 64, 0));
        assert_eq!(transcoder.table().len(), 2);

        let (bytes, stats) = transcoder
            .finish(&SignatureVerification::default(), &SourceDigests::default())
            .unwrap();
        assert_eq!(bytes.len() % 64, 0);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.content_bytes, 11);
        assert_eq!(stats.container_len, bytes.len() as u64);
        assert_eq!(&bytes[..5], b"hello");
        assert_eq!(&bytes[64..70], b"world!");

        let container = read_container(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(container.footer.verification_offset, 128);
        assert_eq!(container.table.get(digest(b"world!").as_bytes()), Some(64));
    }

    #[test]
    fn test_short_content_is_an_error() {
        let mut transcoder = Transcoder::new(Vec::new(), 64, 32).unwrap();
        assert_matches!(
            transcoder.add_file(&digest(b"abc"), 10, &b"abc"[..]),
            Err(TranscodeError::ShortRead {
                expected: 10,
                actual: 3
            })
        );
    }

    #[test]
    fn test_digest_length_mismatch() {
        let mut transcoder = Transcoder::new(Vec::new(), 64, 32).unwrap();
        let md5 = DigestAlgorithm::Md5.digest_bytes(b"abc");
        assert_matches!(
            transcoder.add_file(&md5, 3, &b"abc"[..]),
            Err(TranscodeError::DigestLengthMismatch {
                expected: 32,
                actual: 16
            })
        );
    }

    #[rstest]
    #[case("bash", &["kernel"], false)]
    #[case("kernel-core", &["kernel"], true)]
    #[case("glibc", &["", "libc"], true)]
    #[case("anything", &[""], false)]
    fn test_deny_list(#[case] name: &str, #[case] deny: &[&str], #[case] expected: bool) {
        let options = TranscodeOptions {
            deny_list: deny.iter().map(|s| s.to_string()).collect(),
            ..TranscodeOptions::default()
        };
        assert_eq!(options.is_denied(name), expected);
    }

    #[test]
    fn test_parse_deny_list() {
        assert_eq!(
            parse_deny_list(" kernel, ,glibc ").collect::<Vec<_>>(),
            vec!["kernel", "glibc"]
        );
    }
}
