//! Checksum algorithm identification and running hashes.

use crate::{BagError, BagResult};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Checksum algorithms usable in bag manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

// Lookup keys are lowercase with '-' and '_' removed.
const ALGORITHM_NAMES: &[(&str, ChecksumAlgorithm)] = &[
    ("md5", ChecksumAlgorithm::Md5),
    ("sha1", ChecksumAlgorithm::Sha1),
    ("sha256", ChecksumAlgorithm::Sha256),
    ("sha384", ChecksumAlgorithm::Sha384),
    ("sha512", ChecksumAlgorithm::Sha512),
];

impl ChecksumAlgorithm {
    /// Resolve any accepted spelling of an algorithm name.
    ///
    /// Matching ignores case, `-` and `_`, so `SHA-512`, `sha512` and
    /// `Sha_512` all name the same algorithm.
    pub fn from_name(name: &str) -> BagResult<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        ALGORITHM_NAMES
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, alg)| *alg)
            .ok_or_else(|| BagError::Config(format!("unknown checksum algorithm: {name}")))
    }

    /// Name used in manifest file names (e.g. `sha512`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Conventional display name (e.g. `SHA-512`).
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Length of a hex-encoded digest.
    #[must_use]
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Payload manifest file name for this algorithm.
    #[must_use]
    pub fn manifest_file(&self) -> String {
        format!("{}{}.txt", crate::MANIFEST_PREFIX, self.as_str())
    }

    /// Tag manifest file name for this algorithm.
    #[must_use]
    pub fn tag_manifest_file(&self) -> String {
        format!("{}{}.txt", crate::TAG_MANIFEST_PREFIX, self.as_str())
    }

    /// Start a running hash.
    #[must_use]
    pub fn hasher(&self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Hex digest of an in-memory buffer.
    #[must_use]
    pub fn digest_hex(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// All supported algorithms.
    #[must_use]
    pub fn all() -> &'static [ChecksumAlgorithm] {
        &[
            Self::Md5,
            Self::Sha1,
            Self::Sha256,
            Self::Sha384,
            Self::Sha512,
        ]
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// A running hash for one algorithm.
#[derive(Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    /// Feed bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hash and return the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Non-empty set of checksum algorithms used by one bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSet {
    algorithms: BTreeSet<ChecksumAlgorithm>,
}

impl ChecksumSet {
    /// Build a set from algorithms; an empty input is a configuration error.
    pub fn new<I>(algorithms: I) -> BagResult<Self>
    where
        I: IntoIterator<Item = ChecksumAlgorithm>,
    {
        let algorithms: BTreeSet<_> = algorithms.into_iter().collect();
        if algorithms.is_empty() {
            return Err(BagError::Config(
                "at least one checksum algorithm is required".to_string(),
            ));
        }
        Ok(Self { algorithms })
    }

    /// Build a set from algorithm names; unknown names fail here.
    pub fn from_names<I, S>(names: I) -> BagResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let algorithms = names
            .into_iter()
            .map(|n| ChecksumAlgorithm::from_name(n.as_ref()))
            .collect::<BagResult<Vec<_>>>()?;
        Self::new(algorithms)
    }

    /// Single-algorithm set.
    #[must_use]
    pub fn single(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithms: BTreeSet::from([algorithm]),
        }
    }

    #[must_use]
    pub fn contains(&self, algorithm: ChecksumAlgorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }

    /// True when every algorithm of `other` is also in this set.
    #[must_use]
    pub fn is_superset(&self, other: &ChecksumSet) -> bool {
        self.algorithms.is_superset(&other.algorithms)
    }

    pub fn iter(&self) -> impl Iterator<Item = ChecksumAlgorithm> + '_ {
        self.algorithms.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// The first algorithm in canonical order.
    #[must_use]
    pub fn primary(&self) -> ChecksumAlgorithm {
        // Non-empty by construction.
        self.algorithms
            .iter()
            .next()
            .copied()
            .unwrap_or(ChecksumAlgorithm::Sha512)
    }
}

impl Default for ChecksumSet {
    fn default() -> Self {
        Self::single(ChecksumAlgorithm::Sha512)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use test_case::test_case;

    #[test_case("MD5", ChecksumAlgorithm::Md5)]
    #[test_case("md5", ChecksumAlgorithm::Md5)]
    #[test_case("SHA-1", ChecksumAlgorithm::Sha1)]
    #[test_case("sha1", ChecksumAlgorithm::Sha1)]
    #[test_case("SHA-256", ChecksumAlgorithm::Sha256)]
    #[test_case("Sha_384", ChecksumAlgorithm::Sha384)]
    #[test_case("SHA-512", ChecksumAlgorithm::Sha512)]
    #[test_case(" sha512 ", ChecksumAlgorithm::Sha512)]
    fn ChecksumAlgorithm___from_name___normalizes_spelling(name: &str, expected: ChecksumAlgorithm) {
        assert_eq!(ChecksumAlgorithm::from_name(name).unwrap(), expected);
    }

    #[test_case("whirlpool")]
    #[test_case("sha")]
    #[test_case("")]
    fn ChecksumAlgorithm___from_name___rejects_unknown(name: &str) {
        let err = ChecksumAlgorithm::from_name(name).unwrap_err();

        assert!(matches!(err, BagError::Config(_)));
    }

    #[test]
    fn ChecksumAlgorithm___manifest_file___uses_compact_name() {
        assert_eq!(
            ChecksumAlgorithm::Sha512.manifest_file(),
            "manifest-sha512.txt"
        );
        assert_eq!(
            ChecksumAlgorithm::Sha1.tag_manifest_file(),
            "tagmanifest-sha1.txt"
        );
    }

    #[test]
    fn ChecksumAlgorithm___digest_hex___matches_known_vectors() {
        assert_eq!(
            ChecksumAlgorithm::Md5.digest_hex(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            ChecksumAlgorithm::Sha256.digest_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn ChecksumAlgorithm___digest_hex___has_expected_length() {
        for alg in ChecksumAlgorithm::all() {
            assert_eq!(alg.digest_hex(b"abc").len(), alg.hex_len());
        }
    }

    #[test]
    fn ChecksumSet___new___rejects_empty() {
        let err = ChecksumSet::new(Vec::new()).unwrap_err();

        assert!(matches!(err, BagError::Config(_)));
    }

    #[test]
    fn ChecksumSet___from_names___dedups_spellings() {
        let set = ChecksumSet::from_names(["SHA-512", "sha512", "MD5"]).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.primary(), ChecksumAlgorithm::Md5);
    }

    #[test]
    fn ChecksumSet___from_names___fails_on_unknown_name() {
        let result = ChecksumSet::from_names(["SHA-512", "crc32"]);

        assert!(matches!(result, Err(BagError::Config(_))));
    }

    #[test]
    fn ChecksumSet___is_superset___compares_members() {
        let both = ChecksumSet::from_names(["md5", "sha256"]).unwrap();
        let md5 = ChecksumSet::single(ChecksumAlgorithm::Md5);

        assert!(both.is_superset(&md5));
        assert!(!md5.is_superset(&both));
    }
}
