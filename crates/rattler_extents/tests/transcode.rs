mod common;

use std::io::Cursor;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use rattler_extents::{
    read_container, transcode_tar, DigestAlgorithm, PackageManifest, TranscodeError,
    TranscodeOutcome,
};
use rstest::rstest;

use common::{build_tar, manifest_of, options_with_alignment, transcode, Fixture};

fn package() -> Vec<u8> {
    build_tar(&[
        Fixture::Dir("lib"),
        Fixture::File("lib/one.so", &[1u8; 5000]),
        Fixture::File("lib/two.so", &[2u8; 100]),
        Fixture::File("lib/three.so", &[1u8; 5000]),
        Fixture::HardLink("lib/four.so", "lib/two.so"),
    ])
}

#[rstest]
#[case(512)]
#[case(4096)]
#[case(65536)]
fn test_container_layout(#[case] alignment: u64) {
    let tar = package();
    let manifest = manifest_of("layout", &tar);
    let (container, outcome) = transcode(&tar, &manifest, &options_with_alignment(alignment));

    assert_eq!(container.len() as u64 % alignment, 0);
    let stats = match outcome {
        TranscodeOutcome::Transcoded(stats) => stats,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(stats.container_len, container.len() as u64);
    assert_eq!(stats.content_bytes, 5100);

    let parsed = read_container(&mut Cursor::new(&container))
        .unwrap()
        .unwrap();
    assert_eq!(parsed.table.len(), 2);
    for (digest, offset) in parsed.table.iter_sorted() {
        assert_eq!(offset % alignment, 0, "region of {digest} is not aligned");
    }

    let one = manifest.find(Path::new("lib/one.so")).unwrap();
    let offset = parsed
        .table
        .get(one.digest.as_ref().unwrap().as_bytes())
        .unwrap() as usize;
    assert_eq!(&container[offset..offset + 5000], &[1u8; 5000][..]);
}

#[test]
fn test_output_is_deterministic() {
    let tar = package();
    let manifest = manifest_of("layout", &tar);
    let options = options_with_alignment(4096);
    let (first, _) = transcode(&tar, &manifest, &options);
    let (second, _) = transcode(&tar, &manifest, &options);
    assert_eq!(first, second);
}

#[test]
fn test_entry_missing_from_manifest() {
    let tar = package();
    let mut manifest = manifest_of("layout", &tar);
    manifest.files.retain(|f| f.path != Path::new("lib/two.so"));

    let err = transcode_tar(
        tar.as_slice(),
        Vec::new(),
        &manifest,
        &options_with_alignment(4096),
    )
    .unwrap_err();
    assert_matches!(err, TranscodeError::UnknownEntry(path) if path == PathBuf::from("lib/two.so"));
}

#[test]
fn test_manifest_size_must_match_archive() {
    let tar = package();
    let mut manifest = manifest_of("layout", &tar);
    for file in manifest.files.iter_mut() {
        if file.path == Path::new("lib/one.so") {
            file.size = 4000;
        }
    }

    let err = transcode_tar(
        tar.as_slice(),
        Vec::new(),
        &manifest,
        &options_with_alignment(4096),
    )
    .unwrap_err();
    assert_matches!(
        err,
        TranscodeError::SizeMismatch {
            expected: 4000,
            actual: 5000,
            ..
        }
    );
}

#[test]
fn test_manifest_without_digest() {
    let tar = package();
    let mut manifest = manifest_of("layout", &tar);
    for file in manifest.files.iter_mut() {
        file.digest = None;
    }

    let err = transcode_tar(
        tar.as_slice(),
        Vec::new(),
        &manifest,
        &options_with_alignment(4096),
    )
    .unwrap_err();
    assert_matches!(err, TranscodeError::MissingDigest(_));
}

#[test]
fn test_manifest_file_missing_from_archive() {
    let tar = package();
    let mut manifest = manifest_of("layout", &tar);
    let extra = manifest_of(
        "extra",
        &build_tar(&[Fixture::File("lib/five.so", b"not in the archive")]),
    );
    let mut missing = extra.files[0].clone();
    missing.inode = 100;
    manifest.files.push(missing);

    let err = transcode_tar(
        tar.as_slice(),
        Vec::new(),
        &manifest,
        &options_with_alignment(4096),
    )
    .unwrap_err();
    assert_matches!(err, TranscodeError::MissingContent(path) if path == Path::new("lib/five.so"));
}

#[test]
fn test_invalid_alignment_is_rejected() {
    let tar = package();
    let manifest = manifest_of("layout", &tar);
    let err = transcode_tar(
        tar.as_slice(),
        Vec::new(),
        &manifest,
        &options_with_alignment(3000),
    )
    .unwrap_err();
    assert_matches!(err, TranscodeError::InvalidAlignment(3000));
}

#[test]
fn test_manifest_digest_algorithm_selects_key_size() {
    let tar = package();
    let manifest = PackageManifest::from_tar(
        "sha512",
        tar::Archive::new(tar.as_slice()),
        DigestAlgorithm::Sha512,
    )
    .unwrap();
    let (container, _) = transcode(&tar, &manifest, &options_with_alignment(4096));
    let parsed = read_container(&mut Cursor::new(&container))
        .unwrap()
        .unwrap();
    assert_eq!(parsed.table.key_size(), 64);
}
