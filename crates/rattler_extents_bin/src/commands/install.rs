use std::path::PathBuf;

use anyhow::Context;
use rattler_extents::{
    install_package, ExtentInstaller, InstallOptions, NoClone, NoHooks, PackageManifest,
};

/// Install a package, container or plain tar archive, into a directory
#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The payload of the package
    payload: PathBuf,

    /// The manifest of the package
    #[clap(short, long)]
    manifest: PathBuf,

    /// The directory to install into
    #[clap(short, long)]
    target: PathBuf,

    /// Replace files that already exist with different content
    #[clap(long)]
    replace_existing: bool,

    /// Always copy content instead of cloning it
    #[clap(long)]
    no_clone: bool,

    /// The size of the buffer used when copying content
    #[clap(long)]
    buffer_size: Option<usize>,
}

pub fn install(opt: Opt) -> anyhow::Result<()> {
    let manifest = PackageManifest::from_path(&opt.manifest)
        .with_context(|| format!("failed to read manifest '{}'", opt.manifest.display()))?;

    let mut installer = ExtentInstaller::default();
    if opt.no_clone {
        installer = installer.with_cloner(NoClone);
    }
    if let Some(buffer_size) = opt.buffer_size {
        installer = installer.with_buffer_size(buffer_size);
    }

    let payload = std::fs::File::open(&opt.payload)
        .with_context(|| format!("failed to open '{}'", opt.payload.display()))?;
    let stats = install_package(
        &installer,
        payload,
        &manifest,
        &opt.target,
        &InstallOptions {
            replace_existing: opt.replace_existing,
        },
        &mut NoHooks,
    )
    .with_context(|| format!("failed to install '{}'", manifest.name))?;

    tracing::info!(
        "installed {} into {} in {:?} ({} cloned, {} copied, {} hard links, {} empty)",
        manifest.name,
        opt.target.display(),
        stats.elapsed,
        stats.cloned_files,
        stats.copied_files,
        stats.hard_links,
        stats.empty_files
    );

    Ok(())
}
