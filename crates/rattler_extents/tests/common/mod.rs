#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rattler_extents::{
    install_package, transcode_tar, DigestAlgorithm, ExtentInstaller, InstallError,
    InstallOptions, NoHooks, PackageManifest, PlacementStats, RangeClone, TranscodeOptions,
    TranscodeOutcome,
};

pub const MTIME: u64 = 1_700_000_000;

/// An entry of a fixture archive.
pub enum Fixture<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8]),
    HardLink(&'a str, &'a str),
    Symlink(&'a str, &'a str),
}

pub fn build_tar(entries: &[Fixture<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(MTIME);
        match entry {
            Fixture::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, &[][..]).unwrap();
            }
            Fixture::File(path, content) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                builder.append_data(&mut header, path, *content).unwrap();
            }
            Fixture::HardLink(path, target) => {
                header.set_entry_type(tar::EntryType::Link);
                header.set_mode(0o644);
                header.set_size(0);
                builder.append_link(&mut header, path, target).unwrap();
            }
            Fixture::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, path, target).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

pub fn manifest_of(name: &str, tar_bytes: &[u8]) -> PackageManifest {
    PackageManifest::from_tar(
        name,
        tar::Archive::new(tar_bytes),
        DigestAlgorithm::Sha256,
    )
    .unwrap()
}

pub fn transcode(
    tar_bytes: &[u8],
    manifest: &PackageManifest,
    options: &TranscodeOptions,
) -> (Vec<u8>, TranscodeOutcome) {
    let mut output = Vec::new();
    let outcome = transcode_tar(tar_bytes, &mut output, manifest, options).unwrap();
    (output, outcome)
}

pub fn options_with_alignment(alignment: u64) -> TranscodeOptions {
    TranscodeOptions {
        alignment,
        ..TranscodeOptions::default()
    }
}

/// A [`RangeClone`] that always succeeds by copying the requested range, the way a copy-on-write
/// file system would expose it. The range stops at the end of the source. Every request is
/// recorded as `(src_offset, len)`.
#[derive(Debug, Default, Clone)]
pub struct CopyingClone {
    pub requests: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl RangeClone for CopyingClone {
    fn clone_range(
        &self,
        dest: &File,
        src: &File,
        src_offset: u64,
        len: u64,
        dest_offset: u64,
    ) -> io::Result<()> {
        self.requests.lock().unwrap().push((src_offset, len));
        let available = src.metadata()?.len().saturating_sub(src_offset);
        let mut buffer = vec![0u8; len.min(available) as usize];
        src.read_exact_at(&mut buffer, src_offset)?;
        dest.write_all_at(&buffer, dest_offset)
    }
}

/// Writes `bytes` to a file in `dir` and opens it for reading.
pub fn payload_file(dir: &Path, bytes: &[u8]) -> File {
    let path = dir.join("payload");
    let mut file = File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    drop(file);
    File::open(path).unwrap()
}

pub fn install(
    installer: &ExtentInstaller,
    payload: &[u8],
    manifest: &PackageManifest,
    target_dir: &Path,
) -> Result<PlacementStats, InstallError> {
    let scratch = tempfile::tempdir().unwrap();
    install_package(
        installer,
        payload_file(scratch.path(), payload),
        manifest,
        target_dir,
        &InstallOptions::default(),
        &mut NoHooks,
    )
}

/// Returns all paths below `root` with their content (`None` for directories and symlink targets
/// for symlinks), sorted by path.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    let mut result = Vec::new();
    collect(root, root, &mut result);
    result.sort();
    result
}

fn collect(root: &Path, dir: &Path, result: &mut Vec<(PathBuf, Option<Vec<u8>>)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap().to_path_buf();
        let file_type = entry.file_type().unwrap();
        if file_type.is_dir() {
            result.push((relative, None));
            collect(root, &path, result);
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).unwrap();
            result.push((relative, Some(target.to_string_lossy().as_bytes().to_vec())));
        } else {
            result.push((relative, Some(std::fs::read(&path).unwrap())));
        }
    }
}
