#![deny(missing_docs)]

//! Block-aligned, content-addressed package payloads and zero-copy installation.
//!
//! # Architecture
//!
//! An extents container stores the content of every distinct file of a package uncompressed, each
//! region starting at a multiple of a file system block. A digest table at the end of the container
//! maps the digest of a file's content to the offset of its region, and a fixed size footer makes
//! it possible to find that table without scanning:
//! ```text
//! [payload region]* [signature verification] [digest table] [source digests] [padding] [footer]
//! ```
//! See [`format`] for the exact layout.
//!
//! Because the regions are block aligned, the installer can ask the file system to share the
//! storage of a region with the destination file instead of copying it (a range clone). When the
//! file system does not support that the content is copied instead, with identical results.
//!
//! # Components
//!
//! - [`transcode_tar`] / [`Transcoder`]: converts a package archive into a container
//! - [`read_container`]: detects a container and loads its digest table
//! - [`ExtentInstaller`] / [`PackageInstall`]: places the files of a single package
//! - [`install_package`]: installs a complete package, container or plain archive
//! - [`PackageManifest`]: the per-file metadata that accompanies a payload
//!
//! # Usage
//!
//! ```rust,no_run
//! use rattler_extents::{
//!     install_package, ExtentInstaller, InstallOptions, NoHooks, PackageManifest,
//! };
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manifest = PackageManifest::from_path(Path::new("package.json"))?;
//! let payload = std::fs::File::open("package.extents")?;
//! let stats = install_package(
//!     &ExtentInstaller::default(),
//!     payload,
//!     &manifest,
//!     Path::new("/tmp/root"),
//!     &InstallOptions::default(),
//!     &mut NoHooks,
//! )?;
//! println!("cloned {} files", stats.cloned_files);
//! # Ok(())
//! # }
//! ```

mod container;
mod digest;
pub mod format;
mod install;
mod manifest;
mod records;
mod table;
mod transcode;

pub use container::{
    read_container, read_signature_verification, read_source_digests, ContainerError,
    ExtentsContainer, MalformedContainer,
};
pub use digest::{ContentDigest, DigestAlgorithm, DigestingReader};
pub use format::{is_extents_container, Footer, EXTENTS_MAGIC, FOOTER_SIZE};
pub use install::{
    install_package, ExtentInstaller, FileAction, FileCloneRange, InstallError, InstallOptions,
    ManifestFiles, NoClone, NoHooks, PackageHooks, PackageInstall, PlaceFileError, Placement,
    PlacementMethod, PlacementStats, RangeClone, DEFAULT_BUFFER_SIZE,
};
pub use manifest::{
    normalize_archive_path, FileEntry, FileFlags, FileKind, ManifestError, PackageManifest,
    PathTraversal,
};
pub use records::{SignatureVerification, SourceDigests};
pub use table::{DigestTable, KeySizeMismatch, TableHeader};
pub use transcode::{
    parse_deny_list, transcode_tar, TranscodeError, TranscodeOptions, TranscodeOutcome,
    TranscodeStats, Transcoder, DENY_LIST_ENV,
};
