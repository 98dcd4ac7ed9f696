//! Write-once, checksum-verified BagIt packaging
//!
//! This crate builds, loads, validates and copies BagIt bags: directories
//! (or archives of them) bundling payload files with checksum manifests
//! and descriptive metadata.
//!
//! # Bag Structure
//!
//! ```text
//! my-bag/
//! ├── bagit.txt                  # declaration: version and tag encoding
//! ├── bag-info.txt               # metadata properties
//! ├── manifest-sha512.txt        # payload checksums, one file per algorithm
//! ├── tagmanifest-sha512.txt     # checksums of every other tag file
//! ├── fetch.txt                  # optional: payload held by reference
//! └── data/                      # payload root
//!     └── report.pdf
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bagit::{ArchiveFormat, Filler, Loader, MetadataName};
//!
//! // Build a bag
//! let mut filler = Filler::new("/tmp/my-bag")?;
//! filler.payload("report.pdf", "reports/report.pdf")?;
//! filler.metadata_reserved(MetadataName::ContactName, "Ann Archivist")?;
//! let package = filler.to_package(ArchiveFormat::Zip, false)?;
//!
//! // Load and verify it
//! let bag = Loader::open(&package)?.load()?;
//! assert!(bag.is_valid()?);
//! # Ok::<(), bagit::BagError>(())
//! ```

mod error;

pub mod adapter;
pub mod algorithm;
pub mod archive;
pub mod bag;
pub mod codec;
pub mod config;
pub mod digest;
pub mod filler;
pub mod loader;
pub mod metadata;

pub use adapter::Adapter;
pub use algorithm::{ChecksumAlgorithm, ChecksumSet};
pub use archive::ArchiveFormat;
pub use bag::{Bag, CompletenessStatus, ValidationStatus};
pub use codec::{FetchEntry, LineEnding, TagEncoding};
pub use config::FillerConfig;
pub use error::BagError;
pub use filler::{BagStream, Filler, PackageStream};
pub use loader::Loader;
pub use metadata::{AutoMetadata, MetadataName, Properties};

/// Result type for bag operations.
pub type BagResult<T> = Result<T, BagError>;

/// BagIt version this library produces.
pub const BAGIT_VERSION: &str = "1.0";

/// Version of this library.
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Declaration file name.
pub const DECLARATION_FILE: &str = "bagit.txt";

/// Standard metadata file name.
pub const METADATA_FILE: &str = "bag-info.txt";

/// Fetch list file name.
pub const FETCH_FILE: &str = "fetch.txt";

/// Payload root directory name.
pub const PAYLOAD_DIR: &str = "data";

/// Prefix of every payload path in a manifest.
pub const PAYLOAD_PREFIX: &str = "data/";

/// Payload manifest file name prefix.
pub const MANIFEST_PREFIX: &str = "manifest-";

/// Tag manifest file name prefix.
pub const TAG_MANIFEST_PREFIX: &str = "tagmanifest-";

/// Default tag file character encoding.
pub const DEFAULT_ENCODING: &str = "UTF-8";
