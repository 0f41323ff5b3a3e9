//! Installs a complete package into a target directory.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::instrument;

use super::{
    ExtentInstaller, FileAction, PackageInstall, PlaceFileError, Placement, PlacementMethod,
    PlacementStats,
};
use crate::container::ContainerError;
use crate::manifest::{FileEntry, FileKind, PackageManifest};

/// An error that can occur when calling [`install_package`].
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The payload could not be classified or its digest table could not be read.
    #[error("failed to read the package payload")]
    FailedToReadPayload(#[from] ContainerError),

    /// The content of a file could not be placed.
    #[error("failed to place '{}'", .0.display())]
    FailedToPlace(PathBuf, #[source] PlaceFileError),

    /// A directory could not be created.
    #[error("failed to create directory '{}'", .0.display())]
    FailedToCreateDirectory(PathBuf, #[source] std::io::Error),

    /// A symbolic link could not be created.
    #[error("failed to create symbolic link '{}'", .0.display())]
    FailedToCreateSymlink(PathBuf, #[source] std::io::Error),

    /// The permissions or the modification time of a path could not be updated.
    #[error("failed to update the metadata of '{}'", .0.display())]
    FailedToUpdateMetadata(PathBuf, #[source] std::io::Error),

    /// A file that already exists in the target directory could not be inspected or removed.
    #[error("failed to replace existing file '{}'", .0.display())]
    FailedToReplaceExisting(PathBuf, #[source] std::io::Error),

    /// The plain payload could not be extracted.
    #[error("failed to extract the package payload")]
    FailedToExtract(#[source] std::io::Error),
}

/// Additional options to pass to [`install_package`]. Using [`InstallOptions::default`] works in
/// most cases.
#[derive(Debug, Default, Clone)]
pub struct InstallOptions {
    /// Regular files that already exist in the target directory with different content are
    /// replaced. When this is not set such a file stops the installation.
    ///
    /// Files that exist with the right content are never rewritten, only their metadata is
    /// updated.
    pub replace_existing: bool,
}

/// Callbacks invoked around the installation of a package.
pub trait PackageHooks {
    /// Called once before any file of the package is placed.
    fn pre_install(&mut self, _manifest: &PackageManifest) {}

    /// Called once after all files of the package have been placed, or after the installation
    /// failed.
    fn post_install(
        &mut self,
        _manifest: &PackageManifest,
        _outcome: Result<&PlacementStats, &InstallError>,
    ) {
    }
}

/// [`PackageHooks`] that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl PackageHooks for NoHooks {}

/// Installs the package with the given `payload` and `manifest` into `target_dir`.
///
/// If the payload is an extents container the files are created by iterating the manifest and
/// the content of regular files is cloned or copied from the container. Otherwise the payload is
/// extracted as a plain tar archive. Permissions and modification times are applied in both cases.
#[instrument(skip_all, fields(package = %manifest.name, target_dir = %target_dir.display()))]
pub fn install_package(
    installer: &ExtentInstaller,
    payload: File,
    manifest: &PackageManifest,
    target_dir: &Path,
    options: &InstallOptions,
    hooks: &mut dyn PackageHooks,
) -> Result<PlacementStats, InstallError> {
    hooks.pre_install(manifest);
    let result = install_package_files(installer, payload, manifest, target_dir, options);
    hooks.post_install(manifest, result.as_ref());
    result
}

fn install_package_files(
    installer: &ExtentInstaller,
    payload: File,
    manifest: &PackageManifest,
    target_dir: &Path,
    options: &InstallOptions,
) -> Result<PlacementStats, InstallError> {
    fs::create_dir_all(target_dir)
        .map_err(|e| InstallError::FailedToCreateDirectory(target_dir.to_path_buf(), e))?;

    let mut package = installer.begin_package(payload)?;

    let Some(files) = package.archive_reader(manifest) else {
        tracing::debug!("extracting plain payload");
        extract_plain(&package, target_dir, options)?;
        return Ok(package.finish());
    };

    // Directories are finalized last so read-only directories do not prevent creating their
    // contents.
    let mut directories = Vec::new();
    for entry in files {
        let destination = target_dir.join(&entry.path);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| InstallError::FailedToCreateDirectory(parent.to_path_buf(), e))?;
        }

        match entry.kind {
            FileKind::Directory => {
                fs::create_dir_all(&destination)
                    .map_err(|e| InstallError::FailedToCreateDirectory(destination.clone(), e))?;
                directories.push(entry);
            }
            FileKind::Symlink => {
                create_symlink(entry, &destination, options)?;
            }
            FileKind::Regular => {
                if entry.flags.ghost {
                    continue;
                }
                install_regular_file(&mut package, manifest, entry, target_dir, options)?;
            }
            FileKind::Other => {
                tracing::debug!(
                    "skipping '{}', special files are not supported",
                    entry.path.display()
                );
            }
        }
    }

    for entry in directories.into_iter().rev() {
        apply_metadata(entry, &target_dir.join(&entry.path))?;
    }

    Ok(package.finish())
}

/// The ordinary installation path: the payload is a tar archive.
fn extract_plain(
    package: &PackageInstall,
    target_dir: &Path,
    options: &InstallOptions,
) -> Result<(), InstallError> {
    let mut archive = tar::Archive::new(package.payload());
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(options.replace_existing);
    archive
        .unpack(target_dir)
        .map_err(InstallError::FailedToExtract)
}

fn install_regular_file(
    package: &mut PackageInstall,
    manifest: &PackageManifest,
    entry: &FileEntry,
    target_dir: &Path,
    options: &InstallOptions,
) -> Result<(), InstallError> {
    let destination = target_dir.join(&entry.path);
    let action = existing_file_action(manifest, entry, &destination, options)?;

    let placement = package
        .place_file(entry, target_dir, action)
        .map_err(|e| InstallError::FailedToPlace(entry.path.clone(), e))?;

    match placement {
        // Hard links share the metadata of the path they link to.
        Placement::ContentsPlaced(PlacementMethod::HardLinked) => Ok(()),
        Placement::ContentsPlaced(_) | Placement::NotHandled => {
            apply_metadata(entry, &destination)
        }
    }
}

/// Determines whether `destination` has to be created or only needs its metadata updated. A file
/// with different content is removed first if `replace_existing` is set.
fn existing_file_action(
    manifest: &PackageManifest,
    entry: &FileEntry,
    destination: &Path,
    options: &InstallOptions,
) -> Result<FileAction, InstallError> {
    let metadata = match fs::symlink_metadata(destination) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileAction::Create),
        Err(e) => {
            return Err(InstallError::FailedToReplaceExisting(
                destination.to_path_buf(),
                e,
            ))
        }
    };

    if metadata.is_file() && metadata.len() == entry.size {
        let same_content = match &entry.digest {
            Some(digest) => {
                let mut file = fs::File::open(destination).map_err(|e| {
                    InstallError::FailedToReplaceExisting(destination.to_path_buf(), e)
                })?;
                let existing = manifest
                    .digest_algorithm
                    .digest_reader(&mut file)
                    .map_err(|e| {
                        InstallError::FailedToReplaceExisting(destination.to_path_buf(), e)
                    })?;
                &existing == digest
            }
            None => entry.size == 0,
        };
        if same_content {
            return Ok(FileAction::Touch);
        }
    }

    if options.replace_existing {
        tracing::debug!("replacing existing file '{}'", destination.display());
        fs::remove_file(destination)
            .map_err(|e| InstallError::FailedToReplaceExisting(destination.to_path_buf(), e))?;
    }
    Ok(FileAction::Create)
}

fn create_symlink(
    entry: &FileEntry,
    destination: &Path,
    options: &InstallOptions,
) -> Result<(), InstallError> {
    let target = entry.link_target.as_deref().unwrap_or(Path::new(""));
    if options.replace_existing && fs::symlink_metadata(destination).is_ok() {
        fs::remove_file(destination)
            .map_err(|e| InstallError::FailedToReplaceExisting(destination.to_path_buf(), e))?;
    }

    #[cfg(unix)]
    let result = fs_err::os::unix::fs::symlink(target, destination);
    #[cfg(windows)]
    let result = fs_err::os::windows::fs::symlink_file(target, destination);

    result.map_err(|e| InstallError::FailedToCreateSymlink(destination.to_path_buf(), e))?;

    if let Some(mtime) = entry.mtime {
        let file_time = filetime::FileTime::from_unix_time(mtime, 0);
        filetime::set_symlink_file_times(destination, file_time, file_time)
            .map_err(|e| InstallError::FailedToUpdateMetadata(destination.to_path_buf(), e))?;
    }
    Ok(())
}

/// Applies the permissions and modification time recorded in the manifest.
fn apply_metadata(entry: &FileEntry, destination: &Path) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(destination, std::fs::Permissions::from_mode(entry.mode))
            .map_err(|e| InstallError::FailedToUpdateMetadata(destination.to_path_buf(), e))?;
    }

    if let Some(mtime) = entry.mtime {
        let file_time = filetime::FileTime::from_unix_time(mtime, 0);
        filetime::set_file_times(destination, file_time, file_time)
            .map_err(|e| InstallError::FailedToUpdateMetadata(destination.to_path_buf(), e))?;
    }
    Ok(())
}
