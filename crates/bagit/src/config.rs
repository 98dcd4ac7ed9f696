//! Filler configuration types

use crate::BagResult;
use crate::algorithm::{ChecksumAlgorithm, ChecksumSet};
use crate::codec::{LineEnding, TagEncoding};
use crate::metadata::AutoMetadata;
use serde::{Deserialize, Serialize};

/// Settings a [`Filler`](crate::Filler) is created with.
///
/// Names are kept as written and only resolved by [`checksum_set`] and
/// [`encoding`], so a configuration can be loaded before it is validated.
///
/// [`checksum_set`]: FillerConfig::checksum_set
/// [`encoding`]: FillerConfig::encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillerConfig {
    /// Checksum algorithm names, e.g. `"SHA-512"` or `"md5"`
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,

    /// Character encoding of tag files
    #[serde(default = "default_tag_encoding")]
    pub tag_encoding: String,

    /// Line termination of generated text files
    #[serde(default)]
    pub line_ending: LineEnding,

    /// Metadata generated on finalize
    #[serde(default = "default_auto_metadata")]
    pub auto_metadata: Vec<AutoMetadata>,
}

fn default_algorithms() -> Vec<String> {
    vec![ChecksumAlgorithm::Sha512.display_name().to_string()]
}

fn default_tag_encoding() -> String {
    crate::DEFAULT_ENCODING.to_string()
}

fn default_auto_metadata() -> Vec<AutoMetadata> {
    AutoMetadata::all().to_vec()
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            algorithms: default_algorithms(),
            tag_encoding: default_tag_encoding(),
            line_ending: LineEnding::default(),
            auto_metadata: default_auto_metadata(),
        }
    }
}

impl FillerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from JSON bytes
    pub fn from_json(bytes: &[u8]) -> BagResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn with_algorithms<I>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = ChecksumAlgorithm>,
    {
        self.algorithms = algorithms
            .into_iter()
            .map(|a| a.display_name().to_string())
            .collect();
        self
    }

    pub fn with_checksum_set(self, algorithms: &ChecksumSet) -> Self {
        self.with_algorithms(algorithms.iter())
    }

    pub fn with_tag_encoding(mut self, encoding: TagEncoding) -> Self {
        self.tag_encoding = encoding.as_str().to_string();
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn with_auto_metadata<I>(mut self, selection: I) -> Self
    where
        I: IntoIterator<Item = AutoMetadata>,
    {
        self.auto_metadata = selection.into_iter().collect();
        self
    }

    /// Generate no metadata on finalize.
    pub fn no_auto_metadata(mut self) -> Self {
        self.auto_metadata.clear();
        self
    }

    /// Resolve the algorithm names; unknown or missing names fail here.
    pub fn checksum_set(&self) -> BagResult<ChecksumSet> {
        ChecksumSet::from_names(&self.algorithms)
    }

    /// Resolve the tag encoding name.
    pub fn encoding(&self) -> BagResult<TagEncoding> {
        TagEncoding::from_name(&self.tag_encoding)
    }
}


#[cfg(test)]
#[path = "config/config_parameterized_tests.rs"]
mod config_parameterized_tests;
