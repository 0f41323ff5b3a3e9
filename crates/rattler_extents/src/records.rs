//! Auxiliary records stored between the payload regions and the footer.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::digest::{ContentDigest, DigestAlgorithm};

/// Upper bound for strings and digests read from a record. Prevents huge allocations when
/// reading a corrupt container.
const MAX_RECORD_FIELD_LEN: u64 = 16 * 1024 * 1024;

/// The verdict of the signature verification that was performed on the package before it was
/// transcoded. The container only carries the verdict; it is produced by whoever transcodes the
/// package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureVerification {
    /// The number of failed checks, zero if everything verified.
    pub code: i32,

    /// Human readable output of the verification.
    pub message: String,
}

impl SignatureVerification {
    /// Returns true if verification did not report any failures.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Writes the record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.code)?;
        writer.write_u64::<LittleEndian>(self.message.len() as u64)?;
        writer.write_all(self.message.as_bytes())
    }

    /// Reads the record.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let code = reader.read_i32::<LittleEndian>()?;
        let len = reader.read_u64::<LittleEndian>()?;
        let message = read_field(reader, len)?;
        let message = String::from_utf8(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self { code, message })
    }

    /// The number of bytes [`SignatureVerification::write_to`] produces.
    pub fn encoded_len(&self) -> u64 {
        4 + 8 + self.message.len() as u64
    }
}

/// Digests of the complete input archive, computed while it was transcoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDigests {
    /// The number of bytes of the input archive.
    pub input_len: u64,

    /// The digest of the input for every requested algorithm. Algorithms are stored by name so a
    /// reader may encounter names it does not know.
    pub digests: Vec<(String, ContentDigest)>,
}

impl SourceDigests {
    /// Constructs the record from computed digests.
    pub fn new(input_len: u64, digests: Vec<(DigestAlgorithm, ContentDigest)>) -> Self {
        Self {
            input_len,
            digests: digests
                .into_iter()
                .map(|(algorithm, digest)| (algorithm.to_string(), digest))
                .collect(),
        }
    }

    /// Returns the digest computed with the given algorithm, if any.
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&ContentDigest> {
        let name = algorithm.to_string();
        self.digests
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
            .map(|(_, digest)| digest)
    }

    /// Writes the record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.input_len)?;
        writer.write_u32::<LittleEndian>(self.digests.len() as u32)?;
        for (name, digest) in &self.digests {
            writer.write_u32::<LittleEndian>(name.len() as u32)?;
            writer.write_u32::<LittleEndian>(digest.len() as u32)?;
            writer.write_all(name.as_bytes())?;
            writer.write_all(digest.as_bytes())?;
        }
        Ok(())
    }

    /// Reads the record.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let input_len = reader.read_u64::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;
        let mut digests = Vec::new();
        for _ in 0..count {
            let name_len = reader.read_u32::<LittleEndian>()?;
            let digest_len = reader.read_u32::<LittleEndian>()?;
            let name = String::from_utf8(read_field(reader, u64::from(name_len))?)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let digest = ContentDigest::from(read_field(reader, u64::from(digest_len))?);
            digests.push((name, digest));
        }
        Ok(Self { input_len, digests })
    }
}

fn read_field<R: Read>(reader: &mut R, len: u64) -> io::Result<Vec<u8>> {
    if len > MAX_RECORD_FIELD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record field of {len} bytes exceeds the maximum of {MAX_RECORD_FIELD_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
