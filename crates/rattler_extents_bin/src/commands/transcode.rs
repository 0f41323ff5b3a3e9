use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use rattler_extents::{
    parse_deny_list, transcode_tar, DigestAlgorithm, PackageManifest, SignatureVerification,
    TranscodeOptions, TranscodeOutcome, DENY_LIST_ENV,
};

/// Convert a tar archive into an extents container
#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The tar archive of the package
    archive: PathBuf,

    /// The manifest of the package as written by the `manifest` command
    #[clap(short, long)]
    manifest: PathBuf,

    /// Where to write the container
    #[clap(short, long)]
    output: PathBuf,

    /// The alignment of the payload regions, defaults to the page size
    #[clap(long)]
    alignment: Option<u64>,

    /// Algorithms used to hash the whole archive
    #[clap(long = "source-digest", default_values_t = [DigestAlgorithm::Sha256])]
    source_digests: Vec<DigestAlgorithm>,

    /// Comma separated list, packages whose name contains any of the entries are copied unchanged
    #[clap(long, env = DENY_LIST_ENV)]
    deny_list: Option<String>,

    /// The number of failed signature checks to record in the container
    #[clap(long, default_value_t = 0)]
    verification_code: i32,

    /// The output of the signature verification to record in the container
    #[clap(long, default_value = "")]
    verification_message: String,
}

pub fn transcode(opt: Opt) -> anyhow::Result<()> {
    let manifest = PackageManifest::from_path(&opt.manifest)
        .with_context(|| format!("failed to read manifest '{}'", opt.manifest.display()))?;

    let mut options = TranscodeOptions {
        source_digests: opt.source_digests,
        deny_list: opt
            .deny_list
            .as_deref()
            .map(|list| parse_deny_list(list).collect())
            .unwrap_or_default(),
        verification: SignatureVerification {
            code: opt.verification_code,
            message: opt.verification_message,
        },
        ..TranscodeOptions::default()
    };
    if let Some(alignment) = opt.alignment {
        options.alignment = alignment;
    }

    let input = BufReader::new(fs_err::File::open(&opt.archive)?);
    let output = BufWriter::new(fs_err::File::create(&opt.output)?);
    let outcome = transcode_tar(input, output, &manifest, &options)
        .with_context(|| format!("failed to transcode '{}'", opt.archive.display()))?;

    match outcome {
        TranscodeOutcome::Transcoded(stats) => tracing::info!(
            "wrote {} ({} files, {} deduplicated, {} bytes)",
            opt.output.display(),
            stats.files,
            stats.deduplicated,
            stats.container_len
        ),
        TranscodeOutcome::PassedThrough { bytes } => tracing::info!(
            "copied {} bytes to {} without transcoding",
            bytes,
            opt.output.display()
        ),
    }

    Ok(())
}
