use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use rattler_extents::{DigestAlgorithm, PackageManifest};

/// Write the per-file metadata of a tar archive as JSON
#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The tar archive of the package
    archive: PathBuf,

    /// Where to write the manifest, defaults to stdout
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// The name of the package, defaults to the file name of the archive
    #[clap(short, long)]
    name: Option<String>,

    /// The algorithm used to compute the digest of every file
    #[clap(long, default_value_t = DigestAlgorithm::Sha256)]
    digest: DigestAlgorithm,
}

pub fn manifest(opt: Opt) -> anyhow::Result<()> {
    let name = opt.name.unwrap_or_else(|| {
        opt.archive
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let archive = fs_err::File::open(&opt.archive)?;
    let manifest =
        PackageManifest::from_tar(name, tar::Archive::new(BufReader::new(archive)), opt.digest)
            .with_context(|| format!("failed to read '{}'", opt.archive.display()))?;

    match opt.output {
        Some(path) => {
            let file = fs_err::File::create(&path)?;
            serde_json::to_writer_pretty(file, &manifest)?;
            tracing::info!(
                "wrote manifest of {} entries to {}",
                manifest.files.len(),
                path.display()
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&manifest)?),
    }

    Ok(())
}
