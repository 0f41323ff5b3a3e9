//! Per-file metadata of a package.
//!
//! The installer never reads file metadata from the payload itself. Everything it needs to know
//! about a file (its kind, size, digest, inode, link count, ...) comes from the package's own
//! metadata, modelled here as a [`PackageManifest`].

use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest::{ContentDigest, DigestAlgorithm};

/// The kind of a file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// A regular file with content.
    Regular,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// Anything else, e.g. device nodes or fifos.
    Other,
}

/// Flags that modify how a file is installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFlags {
    /// The file is owned by the package but has no content in the payload.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ghost: bool,
}

/// Metadata of a single file of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// The path of the file relative to the installation root.
    pub path: PathBuf,

    /// The kind of the entry.
    pub kind: FileKind,

    /// Permission bits of the entry.
    pub mode: u32,

    /// The size of the content in bytes.
    #[serde(default)]
    pub size: u64,

    /// The digest of the content, only present for regular files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<ContentDigest>,

    /// A package-internal inode number. Files that share an inode are hard links of each other.
    pub inode: u64,

    /// The number of paths in the package that share this inode.
    #[serde(default = "default_nlink")]
    pub nlink: u32,

    /// Additional flags.
    #[serde(default)]
    pub flags: FileFlags,

    /// The modification time in seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,

    /// The target of a symbolic link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<PathBuf>,
}

fn default_nlink() -> u32 {
    1
}

impl FileEntry {
    /// Returns true if this is a regular file.
    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Returns true if the payload of the package carries content for this entry.
    pub fn has_content(&self) -> bool {
        self.is_regular() && !self.flags.ghost && self.size > 0
    }
}

/// The metadata of all files of a package, in the order in which they are installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// The name of the package.
    pub name: String,

    /// The algorithm used to compute the digests of the files.
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,

    /// All entries of the package.
    pub files: Vec<FileEntry>,
}

/// An error that can occur while building a manifest from an archive.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A path traversal attempt was detected in the archive.
    #[error(transparent)]
    PathTraversal(#[from] PathTraversal),

    /// A hard link refers to a path that was not seen before.
    #[error("hard link '{path}' refers to unknown entry '{target}'")]
    UnknownLinkTarget {
        /// The path of the hard link.
        path: PathBuf,
        /// The path the link refers to.
        target: PathBuf,
    },
}

impl PackageManifest {
    /// Reads a manifest from its JSON representation.
    pub fn from_reader(reader: impl Read) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    /// Reads a manifest from a JSON file.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let file = fs_err::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::from)
    }

    /// Looks up the entry for a path.
    pub fn find(&self, path: &Path) -> Option<&FileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }

    /// Builds the manifest of the files in a tar archive, computing the digest of every regular
    /// file with `algorithm`.
    ///
    /// Every entry gets its own inode number. Hard link entries share the inode, digest and size of
    /// the entry they refer to and the link count of all paths of an inode is updated accordingly.
    pub fn from_tar<R: Read>(
        name: impl Into<String>,
        mut archive: tar::Archive<R>,
        algorithm: DigestAlgorithm,
    ) -> Result<Self, ManifestError> {
        let mut files: Vec<FileEntry> = Vec::new();
        let mut index_by_path: HashMap<PathBuf, usize> = HashMap::new();
        let mut next_inode = 1;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header().clone();
            let entry_type = header.entry_type();
            let raw_path = entry.path()?.into_owned();
            let Some(path) = normalize_archive_path(&raw_path)? else {
                continue;
            };
            let mode = header.mode()? & 0o7777;
            let mtime = header.mtime().ok().map(|t| t as i64);

            let file = if entry_type.is_hard_link() {
                let target = header
                    .link_name()?
                    .and_then(|target| normalize_archive_path(&target).transpose())
                    .transpose()?
                    .unwrap_or_default();
                let Some(&target_index) = index_by_path.get(&target) else {
                    return Err(ManifestError::UnknownLinkTarget { path, target });
                };
                let target_inode = files[target_index].inode;
                let nlink = files[target_index].nlink + 1;
                for file in files.iter_mut().filter(|f| f.inode == target_inode) {
                    file.nlink = nlink;
                }
                FileEntry {
                    path: path.clone(),
                    mode,
                    mtime,
                    nlink,
                    ..files[target_index].clone()
                }
            } else {
                let (kind, size, digest, link_target) = if entry_type.is_file() {
                    let size = entry.size();
                    let digest = algorithm.digest_reader(&mut entry)?;
                    (FileKind::Regular, size, Some(digest), None)
                } else if entry_type.is_dir() {
                    (FileKind::Directory, 0, None, None)
                } else if entry_type.is_symlink() {
                    let target = header.link_name()?.map(|t| t.into_owned());
                    (FileKind::Symlink, 0, None, target)
                } else {
                    (FileKind::Other, 0, None, None)
                };
                let inode = next_inode;
                next_inode += 1;
                FileEntry {
                    path: path.clone(),
                    kind,
                    mode,
                    size,
                    digest,
                    inode,
                    nlink: 1,
                    flags: FileFlags::default(),
                    mtime,
                    link_target,
                }
            };

            index_by_path.insert(path, files.len());
            files.push(file);
        }

        Ok(Self {
            name: name.into(),
            digest_algorithm: algorithm,
            files,
        })
    }
}

/// An archive entry refers to a path outside of the destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path traversal attempt in archive: {}", .0.display())]
pub struct PathTraversal(pub PathBuf);

/// Normalizes a path from an archive: strips leading `./` and root components and rejects paths
/// that would escape the destination. Returns `None` for paths that refer to the root itself.
pub fn normalize_archive_path(path: &Path) -> Result<Option<PathBuf>, PathTraversal> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(PathTraversal(path.to_path_buf())),
        }
    }
    Ok((!normalized.as_os_str().is_empty()).then_some(normalized))
}
