//! Installs packages whose payload may be an extents container.
//!
//! Installation of a package starts with [`ExtentInstaller::begin_package`], which detects the
//! payload format and loads the digest table. The returned [`PackageInstall`] is then consulted for
//! every file through [`PackageInstall::place_file`] and finally consumed by
//! [`PackageInstall::finish`]. [`install_package`] drives all of this for a complete package.

mod clone;
mod driver;
mod place;
mod reader;

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use clone::{FileCloneRange, NoClone, RangeClone};
pub use driver::{install_package, InstallError, InstallOptions, NoHooks, PackageHooks};
pub use place::{PlaceFileError, Placement, PlacementMethod};
pub use reader::ManifestFiles;

use crate::container::{read_container, ContainerError, ExtentsContainer};
use crate::format::page_size;
use crate::manifest::PackageManifest;
use crate::table::DigestTable;

/// The default size of the buffer used when content has to be copied.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// How a file is to be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// The file is created with its content.
    Create,

    /// The file is already present with the right content, only its metadata is updated.
    Touch,
}

/// Configuration shared by the installation of many packages.
#[derive(Debug, Clone)]
pub struct ExtentInstaller {
    alignment_unit: u64,
    buffer_size: usize,
    cloner: Arc<dyn RangeClone>,
}

impl Default for ExtentInstaller {
    fn default() -> Self {
        Self {
            alignment_unit: page_size(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            cloner: Arc::new(FileCloneRange),
        }
    }
}

impl ExtentInstaller {
    /// Sets the granularity clone requests are rounded up to. Defaults to the page size.
    #[must_use]
    pub fn with_alignment_unit(self, alignment_unit: u64) -> Self {
        Self {
            alignment_unit: alignment_unit.max(1),
            ..self
        }
    }

    /// Sets the size of the buffer used when content is copied instead of cloned.
    #[must_use]
    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            ..self
        }
    }

    /// Sets the primitive used to clone content from the payload.
    #[must_use]
    pub fn with_cloner(self, cloner: impl RangeClone + 'static) -> Self {
        Self {
            cloner: Arc::new(cloner),
            ..self
        }
    }

    /// The granularity clone requests are rounded up to.
    pub fn alignment_unit(&self) -> u64 {
        self.alignment_unit
    }

    /// Starts the installation of a package with the given payload.
    ///
    /// Determines whether the payload is an extents container and if so loads its digest table.
    /// A payload that is not a container is not an error, all files are then left to the ordinary
    /// installer. A container that is damaged is an error. The read position of `payload` is left
    /// unchanged.
    pub fn begin_package(&self, mut payload: File) -> Result<PackageInstall, ContainerError> {
        let container = read_container(&mut payload)?;
        match &container {
            Some(container) => tracing::debug!(
                "payload is an extents container with {} distinct file contents",
                container.table.len()
            ),
            None => tracing::debug!("payload is not an extents container"),
        }

        Ok(PackageInstall {
            payload,
            container,
            inode_index: HashMap::new(),
            alignment_unit: self.alignment_unit,
            buffer_size: self.buffer_size,
            cloner: self.cloner.clone(),
            stats: PlacementStats::default(),
            started: Instant::now(),
        })
    }
}

/// Counters collected while installing a single package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementStats {
    /// Files whose content was cloned from the container.
    pub cloned_files: u64,

    /// Bytes of content that were cloned.
    pub cloned_bytes: u64,

    /// Files whose content was copied because cloning failed.
    pub copied_files: u64,

    /// Bytes of content that were copied.
    pub copied_bytes: u64,

    /// Hard links created to earlier paths of the same inode.
    pub hard_links: u64,

    /// Empty files created.
    pub empty_files: u64,

    /// Time between the start and the end of the installation.
    pub elapsed: Duration,
}

impl PlacementStats {
    /// The number of files whose content was placed from the container.
    pub fn placed_files(&self) -> u64 {
        self.cloned_files + self.copied_files + self.hard_links + self.empty_files
    }
}

/// The state of the installation of a single package.
///
/// Lives from the start to the end of the installation of one package and must not be reused for
/// another package.
#[derive(Debug)]
pub struct PackageInstall {
    payload: File,
    container: Option<ExtentsContainer>,
    inode_index: HashMap<u64, PathBuf>,
    alignment_unit: u64,
    buffer_size: usize,
    cloner: Arc<dyn RangeClone>,
    stats: PlacementStats,
    started: Instant,
}

impl PackageInstall {
    /// Returns true if the payload is an extents container.
    pub fn is_extents_format(&self) -> bool {
        self.container.is_some()
    }

    /// The container of the package, if the payload is one.
    pub fn container(&self) -> Option<&ExtentsContainer> {
        self.container.as_ref()
    }

    /// The digest table of the container, if the payload is one.
    pub fn digest_table(&self) -> Option<&DigestTable> {
        self.container.as_ref().map(|container| &container.table)
    }

    /// The payload of the package.
    pub fn payload(&self) -> &File {
        &self.payload
    }

    /// Returns the entries of `manifest` in installation order if the payload is an extents
    /// container. Plain payloads have to be read as an archive instead.
    pub fn archive_reader<'m>(&self, manifest: &'m PackageManifest) -> Option<ManifestFiles<'m>> {
        self.is_extents_format().then(|| ManifestFiles::new(manifest))
    }

    /// Ends the installation of the package and returns what was done.
    pub fn finish(self) -> PlacementStats {
        let stats = PlacementStats {
            elapsed: self.started.elapsed(),
            ..self.stats
        };
        tracing::debug!(
            "placed {} files ({} cloned, {} copied, {} hard links, {} empty) in {:?}",
            stats.placed_files(),
            stats.cloned_files,
            stats.copied_files,
            stats.hard_links,
            stats.empty_files,
            stats.elapsed
        );
        stats
    }
}
