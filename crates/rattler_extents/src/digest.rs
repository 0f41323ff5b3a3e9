//! Content digests and the hashing helpers used by the transcoder.
//!
//! The container format does not fix a hash algorithm: the digest table records the length of its
//! keys and whatever digest the package metadata declares for a file is used as-is. A
//! [`ContentDigest`] is therefore just an owned run of bytes with a stable hash and ordering.
//!
//! [`DigestAlgorithm`] enumerates the algorithms this crate knows how to compute, both to build
//! package manifests and to fingerprint the complete input archive while it is being transcoded
//! (see [`DigestingReader`]).

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::io::Read;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::Blake2b;
use digest::DynDigest;
use md5::Md5;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Sha256, Sha512};

/// A type for a 32 bit length blake2b digest.
pub type Blake2b256 = Blake2b<U32>;

/// The digest of the content of a single file.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest(Box<[u8]>);

impl ContentDigest {
    /// Constructs a digest from its raw bytes.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes of the digest.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The length of the digest in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the digest has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Borrow<[u8]> for ContentDigest {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ContentDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ContentDigest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl From<&[u8]> for ContentDigest {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({self})")
    }
}

impl FromStr for ContentDigest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(Self::from)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The hash algorithms that can be used to compute file digests and source digests.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::EnumString,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum DigestAlgorithm {
    /// SHA-256
    #[default]
    #[strum(serialize = "SHA256")]
    #[serde(rename = "SHA256")]
    Sha256,

    /// SHA-512
    #[strum(serialize = "SHA512")]
    #[serde(rename = "SHA512")]
    Sha512,

    /// MD5, only useful to fingerprint legacy inputs.
    #[strum(serialize = "MD5")]
    #[serde(rename = "MD5")]
    Md5,

    /// BLAKE2b with a 256 bit output.
    #[strum(serialize = "BLAKE2B256")]
    #[serde(rename = "BLAKE2B256")]
    Blake2b256,
}

impl DigestAlgorithm {
    /// Returns a fresh hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Sha256 => Box::<Sha256>::default(),
            DigestAlgorithm::Sha512 => Box::<Sha512>::default(),
            DigestAlgorithm::Md5 => Box::<Md5>::default(),
            DigestAlgorithm::Blake2b256 => Box::<Blake2b256>::default(),
        }
    }

    /// The length of a digest produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 | DigestAlgorithm::Blake2b256 => 32,
            DigestAlgorithm::Sha512 => 64,
            DigestAlgorithm::Md5 => 16,
        }
    }

    /// Compute the digest of the specified bytes.
    pub fn digest_bytes(self, bytes: impl AsRef<[u8]>) -> ContentDigest {
        let mut hasher = self.hasher();
        hasher.update(bytes.as_ref());
        ContentDigest(hasher.finalize())
    }

    /// Compute the digest of everything that can be read from `reader`.
    pub fn digest_reader(self, reader: &mut impl Read) -> std::io::Result<ContentDigest> {
        let mut reader = DigestingReader::new(reader, [self]);
        std::io::copy(&mut reader, &mut std::io::sink())?;
        let (_, _, mut digests) = reader.finalize();
        Ok(digests.remove(0).1)
    }
}

/// A [`Read`] implementation that forwards reads to an inner reader while hashing every byte
/// that passes through with one or more algorithms. It also counts the number of bytes read.
///
/// Call [`DigestingReader::finalize`] to retrieve the original reader, the byte count and the
/// digests in the order the algorithms were given.
pub struct DigestingReader<R> {
    reader: R,
    bytes_read: u64,
    hashers: Vec<(DigestAlgorithm, Box<dyn DynDigest>)>,
}

impl<R> DigestingReader<R> {
    /// Constructs a new instance from a reader and the algorithms to compute.
    pub fn new(reader: R, algorithms: impl IntoIterator<Item = DigestAlgorithm>) -> Self {
        Self {
            reader,
            bytes_read: 0,
            hashers: algorithms
                .into_iter()
                .map(|algorithm| (algorithm, algorithm.hasher()))
                .collect(),
        }
    }

    /// The number of bytes that have been read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes this instance and returns the original reader, the total number of bytes read
    /// and the digest computed for every algorithm.
    pub fn finalize(self) -> (R, u64, Vec<(DigestAlgorithm, ContentDigest)>) {
        let digests = self
            .hashers
            .into_iter()
            .map(|(algorithm, hasher)| (algorithm, ContentDigest(hasher.finalize())))
            .collect();
        (self.reader, self.bytes_read, digests)
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        for (_, hasher) in &mut self.hashers {
            hasher.update(&buf[..bytes_read]);
        }
        self.bytes_read += bytes_read as u64;
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(
        DigestAlgorithm::Sha256,
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    #[case(
        DigestAlgorithm::Md5,
        "Hello, world!",
        "6cd3556deb0da54bca060b4c39479839"
    )]
    #[case(
        DigestAlgorithm::Sha256,
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    fn test_digest_bytes(
        #[case] algorithm: DigestAlgorithm,
        #[case] input: &str,
        #[case] expected: &str,
    ) {
        let digest = algorithm.digest_bytes(input);
        assert_eq!(digest.to_string(), expected);
        assert_eq!(digest.len(), algorithm.digest_len());
    }

    #[rstest]
    #[case(DigestAlgorithm::Sha256)]
    #[case(DigestAlgorithm::Sha512)]
    #[case(DigestAlgorithm::Md5)]
    #[case(DigestAlgorithm::Blake2b256)]
    fn test_digest_len_matches_output(#[case] algorithm: DigestAlgorithm) {
        assert_eq!(algorithm.digest_bytes(b"").len(), algorithm.digest_len());
    }

    #[test]
    fn test_digesting_reader_computes_all_algorithms() {
        let content = b"some archive bytes".repeat(1000);
        let mut reader = DigestingReader::new(
            Cursor::new(&content),
            [DigestAlgorithm::Sha256, DigestAlgorithm::Md5],
        );
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
        let (_, len, digests) = reader.finalize();

        assert_eq!(len, content.len() as u64);
        assert_eq!(
            digests,
            vec![
                (
                    DigestAlgorithm::Sha256,
                    DigestAlgorithm::Sha256.digest_bytes(&content)
                ),
                (
                    DigestAlgorithm::Md5,
                    DigestAlgorithm::Md5.digest_bytes(&content)
                ),
            ]
        );
    }

    #[rstest]
    #[case("sha256", DigestAlgorithm::Sha256)]
    #[case("SHA512", DigestAlgorithm::Sha512)]
    #[case("Md5", DigestAlgorithm::Md5)]
    #[case("blake2b256", DigestAlgorithm::Blake2b256)]
    fn test_parse_algorithm(#[case] input: &str, #[case] expected: DigestAlgorithm) {
        assert_eq!(input.parse::<DigestAlgorithm>().unwrap(), expected);
    }

    #[test]
    fn test_content_digest_hex_round_trip() {
        let digest = DigestAlgorithm::Sha256.digest_bytes(b"abc");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(
            json,
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
        let parsed: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, digest);
    }
}
