//! Metadata property names and the ordered property collection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved metadata property names of `bag-info.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataName {
    SourceOrganization,
    OrganizationAddress,
    ContactName,
    ContactPhone,
    ContactEmail,
    ExternalDescription,
    ExternalIdentifier,
    BaggingDate,
    BagSize,
    PayloadOxum,
    BagGroupIdentifier,
    BagCount,
    InternalSenderIdentifier,
    InternalSenderDescription,
    BagSoftwareAgent,
}

impl MetadataName {
    /// Property name as written in the file.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceOrganization => "Source-Organization",
            Self::OrganizationAddress => "Organization-Address",
            Self::ContactName => "Contact-Name",
            Self::ContactPhone => "Contact-Phone",
            Self::ContactEmail => "Contact-Email",
            Self::ExternalDescription => "External-Description",
            Self::ExternalIdentifier => "External-Identifier",
            Self::BaggingDate => "Bagging-Date",
            Self::BagSize => "Bag-Size",
            Self::PayloadOxum => "Payload-Oxum",
            Self::BagGroupIdentifier => "Bag-Group-Identifier",
            Self::BagCount => "Bag-Count",
            Self::InternalSenderIdentifier => "Internal-Sender-Identifier",
            Self::InternalSenderDescription => "Internal-Sender-Description",
            Self::BagSoftwareAgent => "Bag-Software-Agent",
        }
    }
}

impl fmt::Display for MetadataName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata the filler can generate on finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoMetadata {
    /// `Bagging-Date`: local date, `YYYY-MM-DD`.
    BaggingDate,
    /// `Bag-Size`: scaled total payload size.
    BagSize,
    /// `Payload-Oxum`: `<bytes>.<count>`.
    PayloadOxum,
    /// `Bag-Software-Agent`: this library and its version.
    SoftwareAgent,
}

impl AutoMetadata {
    /// The property this selection generates.
    #[must_use]
    pub fn name(&self) -> MetadataName {
        match self {
            Self::BaggingDate => MetadataName::BaggingDate,
            Self::BagSize => MetadataName::BagSize,
            Self::PayloadOxum => MetadataName::PayloadOxum,
            Self::SoftwareAgent => MetadataName::BagSoftwareAgent,
        }
    }

    #[must_use]
    pub fn all() -> &'static [AutoMetadata] {
        &[
            Self::BaggingDate,
            Self::BagSize,
            Self::PayloadOxum,
            Self::SoftwareAgent,
        ]
    }

    /// True if `name` is a property this library generates.
    #[must_use]
    pub fn is_generated(name: &str) -> bool {
        Self::all().iter().any(|a| a.name().as_str() == name)
    }
}

/// Ordered, multi-valued property collection parsed from one tag file.
///
/// Names keep the order of their first appearance; values keep file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// All values for `name`, in declaration order.
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// First value for `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Distinct names in order of first appearance.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (name, _) in &self.entries {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Every `(name, value)` pair in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn Properties___values___preserves_order_of_repeats() {
        let mut props = Properties::new();
        props.push("Contact-Name", "Ann");
        props.push("Source-Organization", "MIT");
        props.push("Contact-Name", "Bob");

        assert_eq!(props.values("Contact-Name"), vec!["Ann", "Bob"]);
        assert_eq!(props.names(), vec!["Contact-Name", "Source-Organization"]);
        assert!(props.values("Missing").is_empty());
    }

    #[test]
    fn AutoMetadata___is_generated___covers_generated_names_only() {
        assert!(AutoMetadata::is_generated("Payload-Oxum"));
        assert!(AutoMetadata::is_generated("Bag-Software-Agent"));
        assert!(!AutoMetadata::is_generated("Contact-Name"));
    }

    #[test]
    fn AutoMetadata___deserializes_kebab_case() {
        let parsed: Vec<AutoMetadata> =
            serde_json::from_str(r#"["bagging-date", "payload-oxum"]"#).unwrap();

        assert_eq!(
            parsed,
            vec![AutoMetadata::BaggingDate, AutoMetadata::PayloadOxum]
        );
    }
}
