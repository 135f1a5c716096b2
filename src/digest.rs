//! Registry of supported digest algorithms
//!
//! The set of algorithms is closed: [`HashAlgorithm`] enumerates every digest
//! the archive can record, and a name is validated when it is parsed (command
//! line, manifest, chain), never when a digest is computed.
//!
//! All digests are rendered as lowercase hexadecimal. The xxHash family is
//! rendered big-endian so that the text matches the canonical `xxhsum` output.
//!
//! ```rust
//! use hashtrail::digest::HashAlgorithm;
//!
//! let digest = HashAlgorithm::Sha256.compute(b"A1\n");
//! assert_eq!(digest.len(), 64);
//! assert_eq!("xxh64".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Xxh64);
//! ```

use crate::error::{HashTrailError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh3::Xxh3;
use xxhash_rust::xxh64::Xxh64;

/// Read buffer used for streaming file hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (legacy interoperability only)
    Md5,
    /// SHA-1 (legacy interoperability only)
    Sha1,
    /// SHA-256
    Sha256,
    /// xxHash 64-bit, the default for media offloads
    Xxh64,
    /// xxHash3 64-bit
    Xxh3,
    /// xxHash3 128-bit
    Xxh128,
    /// BLAKE3 256-bit
    Blake3,
}

impl HashAlgorithm {
    /// Every supported algorithm, in registry order
    pub const ALL: [HashAlgorithm; 7] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Xxh64,
        HashAlgorithm::Xxh3,
        HashAlgorithm::Xxh128,
        HashAlgorithm::Blake3,
    ];

    /// Canonical lowercase name
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Xxh3 => "xxh3",
            HashAlgorithm::Xxh128 => "xxh128",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Start a streaming hasher for this algorithm
    pub fn hasher(self) -> StreamingHasher {
        let inner = match self {
            HashAlgorithm::Md5 => HasherState::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh64 => HasherState::Xxh64(Xxh64::new(0)),
            HashAlgorithm::Xxh3 => HasherState::Xxh3(Box::new(Xxh3::new())),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
            HashAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        StreamingHasher { inner }
    }

    /// Hash an in-memory buffer
    pub fn compute(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash everything a reader yields
    pub fn hash_reader<R: Read>(self, mut reader: R) -> Result<String> {
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize())
    }

    /// Hash a file's content
    pub fn hash_file(self, path: &Path) -> Result<String> {
        let file = File::open(path)?;
        self.hash_reader(file)
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Xxh64
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashTrailError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == lowered)
            .ok_or_else(|| HashTrailError::UnsupportedAlgorithm(s.to_string()))
    }
}

enum HasherState {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(Sha256),
    Xxh64(Xxh64),
    Xxh3(Box<Xxh3>),
    Xxh128(Box<Xxh3>),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hasher for any [`HashAlgorithm`]
pub struct StreamingHasher {
    inner: HasherState,
}

impl StreamingHasher {
    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Xxh64(h) => h.update(data),
            HasherState::Xxh3(h) | HasherState::Xxh128(h) => h.update(data),
            HasherState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finish and render the digest as lowercase hex
    pub fn finalize(self) -> String {
        match self.inner {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Xxh64(h) => format!("{:016x}", h.digest()),
            HasherState::Xxh3(h) => format!("{:016x}", h.digest()),
            HasherState::Xxh128(h) => format!("{:032x}", h.digest128()),
            HasherState::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

impl fmt::Debug for StreamingHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.inner {
            HasherState::Md5(_) => "md5",
            HasherState::Sha1(_) => "sha1",
            HasherState::Sha256(_) => "sha256",
            HasherState::Xxh64(_) => "xxh64",
            HasherState::Xxh3(_) => "xxh3",
            HasherState::Xxh128(_) => "xxh128",
            HasherState::Blake3(_) => "blake3",
        };
        f.debug_struct("StreamingHasher").field("algorithm", &name).finish()
    }
}

/// An `algorithm:digest` pair as written to the chain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DigestToken {
    /// Algorithm that produced the digest
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub digest: String,
}

impl DigestToken {
    /// Digest a buffer and wrap the result
    pub fn of(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.compute(data),
        }
    }

    /// Whether `data` still produces this digest
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm.compute(data) == self.digest
    }
}

impl fmt::Display for DigestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for DigestToken {
    type Err = HashTrailError;

    fn from_str(s: &str) -> Result<Self> {
        let (alg, digest) = s
            .split_once(':')
            .ok_or_else(|| HashTrailError::UnsupportedAlgorithm(s.to_string()))?;
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashTrailError::internal(format!("Invalid digest text: {}", s)));
        }
        Ok(Self {
            algorithm: alg.parse()?,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

impl Serialize for DigestToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DigestToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse::<DigestToken>().map_err(serde::de::Error::custom)
    }
}
