//! Integrity: whole-file digest (MD5 by default for peer compatibility, SHA-256 optional), hex compare.

use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read increment used when hashing a file.
pub const FILE_DIGEST_READ_SIZE: usize = 2048;

/// Digest agreed with the peer. MD5 is what existing peers expect; it is not a security primitive here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

/// Incremental hasher over either algorithm.
pub enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hex digest of a byte slice.
pub fn hex_digest(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut h = Hasher::new(algorithm);
    h.update(data);
    h.finalize_hex()
}

/// Hex digest of everything `reader` yields, read in [`FILE_DIGEST_READ_SIZE`] increments.
pub fn reader_digest<R: Read>(algorithm: DigestAlgorithm, mut reader: R) -> io::Result<String> {
    let mut h = Hasher::new(algorithm);
    let mut buf = [0u8; FILE_DIGEST_READ_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        h.update(&buf[..n]);
    }
    Ok(h.finalize_hex())
}

/// Hex digest of a whole file.
pub fn file_digest(algorithm: DigestAlgorithm, path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    reader_digest(algorithm, file)
}

/// Compare a locally computed digest with the one reported by the peer, exactly as hex text.
pub fn digests_match(local: &str, remote: &str) -> bool {
    local.as_bytes() == remote.as_bytes()
}
