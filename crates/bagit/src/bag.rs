//! Read-only view over a bag directory.
//!
//! A [`Bag`] answers two questions about the tree under its base directory:
//! is it complete (every declared file present and counted), and is it
//! valid (every recomputed digest matches its manifest). Structural
//! problems are reported as status codes so callers can probe a bag
//! without error-driven control flow.

use crate::algorithm::{ChecksumAlgorithm, ChecksumSet};
use crate::archive::safe_components;
use crate::codec::{self, FetchEntry, LineEnding, TagEncoding};
use crate::digest::{Digests, digest_stream};
use crate::metadata::{MetadataName, Properties};
use crate::{
    BAGIT_VERSION, BagError, BagResult, DECLARATION_FILE, FETCH_FILE, LIB_VERSION, MANIFEST_PREFIX,
    METADATA_FILE, PAYLOAD_DIR, PAYLOAD_PREFIX, TAG_MANIFEST_PREFIX,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Outcome of the completeness checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletenessStatus {
    Complete,
    /// `fetch.txt` is present: some payload is held by reference.
    FetchPending,
    MissingDeclaration,
    MalformedDeclaration,
    /// The declared tag file encoding is not supported.
    UnsupportedEncoding,
    MissingPayloadRoot,
    /// No payload manifest for a recognized algorithm.
    MissingManifest,
    MalformedManifest,
    /// Payload files on disk and manifest entries differ in number.
    PayloadCountMismatch,
    MissingPayloadFile,
    /// Tag files on disk and tag manifest entries differ in number.
    TagCountMismatch,
    MissingTagFile,
}

impl CompletenessStatus {
    /// Stable integer code: zero for success, negative otherwise.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::FetchPending => -1,
            Self::MissingDeclaration => -2,
            Self::MalformedDeclaration => -3,
            Self::UnsupportedEncoding => -4,
            Self::MissingPayloadRoot => -5,
            Self::MissingManifest => -6,
            Self::MalformedManifest => -7,
            Self::PayloadCountMismatch => -8,
            Self::MissingPayloadFile => -9,
            Self::TagCountMismatch => -10,
            Self::MissingTagFile => -11,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for CompletenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Complete => "complete",
            Self::FetchPending => "payload pending fetch",
            Self::MissingDeclaration => "missing bagit.txt",
            Self::MalformedDeclaration => "malformed bagit.txt",
            Self::UnsupportedEncoding => "unsupported tag file encoding",
            Self::MissingPayloadRoot => "missing payload directory",
            Self::MissingManifest => "missing payload manifest",
            Self::MalformedManifest => "malformed manifest",
            Self::PayloadCountMismatch => "payload count differs from manifest",
            Self::MissingPayloadFile => "manifested payload file missing",
            Self::TagCountMismatch => "tag file count differs from tag manifest",
            Self::MissingTagFile => "manifested tag file missing",
        };
        write!(f, "{text} ({})", self.code())
    }
}

/// Outcome of full digest verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    Valid,
    /// Validation never ran because the bag is incomplete.
    Incomplete(CompletenessStatus),
    PayloadMismatch,
    TagMismatch,
}

impl ValidationStatus {
    /// Stable integer code; incomplete bags report their completeness code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Valid => 0,
            Self::Incomplete(status) => status.code(),
            Self::PayloadMismatch => -12,
            Self::TagMismatch => -13,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid (0)"),
            Self::Incomplete(status) => write!(f, "incomplete: {status}"),
            Self::PayloadMismatch => write!(f, "payload checksum mismatch ({})", self.code()),
            Self::TagMismatch => write!(f, "tag file checksum mismatch ({})", self.code()),
        }
    }
}

/// Parsed `bagit.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Declaration {
    version: String,
    encoding: String,
    line_ending: LineEnding,
}

fn read_declaration(base: &Path) -> BagResult<Option<Declaration>> {
    let path = base.join(DECLARATION_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let text = TagEncoding::Utf8.decode(&fs::read(&path)?, DECLARATION_FILE)?;
    let props = codec::parse_properties(&text, DECLARATION_FILE)?;
    let field = |name: &str| {
        props
            .first(name)
            .map(str::to_string)
            .ok_or_else(|| BagError::malformed(DECLARATION_FILE, format!("missing {name}")))
    };
    Ok(Some(Declaration {
        version: field("BagIt-Version")?,
        encoding: field("Tag-File-Character-Encoding")?,
        line_ending: LineEnding::detect(&text),
    }))
}

/// Join a bag-relative path onto `base`, refusing anything that escapes it.
pub(crate) fn checked_join(base: &Path, rel_path: &str) -> BagResult<PathBuf> {
    let parts = safe_components(Path::new(rel_path))?;
    if parts.is_empty() {
        return Err(BagError::InvalidPath(rel_path.to_string()));
    }
    let mut path = base.to_path_buf();
    for part in parts {
        path.push(part);
    }
    Ok(path)
}

/// Regular files under `dir`, recursively.
pub(crate) fn count_files(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

/// Manifest files with a given prefix, keyed by algorithm.
///
/// Files naming an unknown algorithm are skipped.
pub(crate) fn manifest_files(
    base: &Path,
    prefix: &str,
) -> io::Result<BTreeMap<ChecksumAlgorithm, String>> {
    let mut found = BTreeMap::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(alg_name) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".txt"))
        else {
            continue;
        };
        match ChecksumAlgorithm::from_name(alg_name) {
            Ok(alg) => {
                found.insert(alg, name);
            }
            Err(_) => tracing::warn!("Ignoring manifest for unknown algorithm: {}", name),
        }
    }
    Ok(found)
}

/// A bag directory, open or sealed.
///
/// A sealed bag refuses to disclose filesystem paths; its content stays
/// readable through the stream accessors.
#[derive(Debug)]
pub struct Bag {
    base: PathBuf,
    sealed: bool,
    declaration: Option<Declaration>,
    encoding: TagEncoding,
    properties: Mutex<HashMap<String, Arc<OnceCell<Properties>>>>,
    /// Keeps a temporary extraction directory alive as long as the bag.
    _scratch: Option<TempDir>,
    #[cfg(test)]
    parses: std::sync::atomic::AtomicUsize,
}

impl Bag {
    pub(crate) fn new(base: PathBuf, sealed: bool, scratch: Option<TempDir>) -> Self {
        let declaration = match read_declaration(&base) {
            Ok(declaration) => declaration,
            Err(e) => {
                tracing::warn!("Unreadable declaration in {}: {}", base.display(), e);
                None
            }
        };
        let encoding = declaration
            .as_ref()
            .and_then(|d| TagEncoding::from_name(&d.encoding).ok())
            .unwrap_or_default();
        Self {
            base,
            sealed,
            declaration,
            encoding,
            properties: Mutex::new(HashMap::new()),
            _scratch: scratch,
            #[cfg(test)]
            parses: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// BagIt version this library produces.
    #[must_use]
    pub fn bagit_version() -> &'static str {
        BAGIT_VERSION
    }

    #[must_use]
    pub fn lib_version() -> &'static str {
        LIB_VERSION
    }

    /// Bag name: the base directory's file name.
    #[must_use]
    pub fn name(&self) -> String {
        self.base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn base_dir(&self) -> BagResult<&Path> {
        if self.sealed {
            return Err(BagError::Access(self.name()));
        }
        Ok(&self.base)
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Version declared in `bagit.txt`.
    #[must_use]
    pub fn declared_version(&self) -> Option<&str> {
        self.declaration.as_ref().map(|d| d.version.as_str())
    }

    /// Declared tag file encoding, UTF-8 when undeclared or unsupported.
    #[must_use]
    pub fn tag_encoding(&self) -> TagEncoding {
        self.encoding
    }

    /// Line ending used by `bagit.txt`.
    #[must_use]
    pub fn line_ending(&self) -> LineEnding {
        self.declaration
            .as_ref()
            .map_or(LineEnding::System, |d| d.line_ending)
    }

    /// Algorithms with a payload manifest in this bag.
    pub fn checksum_algorithms(&self) -> BagResult<ChecksumSet> {
        ChecksumSet::new(manifest_files(&self.base, MANIFEST_PREFIX)?.into_keys())
    }

    // ========================================================================
    // Completeness and validity
    // ========================================================================

    /// Run the completeness checks and report the first failure.
    ///
    /// Only underlying I/O faults are errors.
    pub fn completeness_status(&self) -> BagResult<CompletenessStatus> {
        if self.base.join(FETCH_FILE).exists() {
            return Ok(CompletenessStatus::FetchPending);
        }
        let declaration = match read_declaration(&self.base) {
            Ok(Some(declaration)) => declaration,
            Ok(None) => return Ok(CompletenessStatus::MissingDeclaration),
            Err(BagError::Malformed { .. }) => return Ok(CompletenessStatus::MalformedDeclaration),
            Err(e) => return Err(e),
        };
        let Ok(encoding) = TagEncoding::from_name(&declaration.encoding) else {
            return Ok(CompletenessStatus::UnsupportedEncoding);
        };
        let payload_root = self.base.join(PAYLOAD_DIR);
        if !payload_root.is_dir() {
            return Ok(CompletenessStatus::MissingPayloadRoot);
        }

        let manifests = manifest_files(&self.base, MANIFEST_PREFIX)?;
        if manifests.is_empty() {
            return Ok(CompletenessStatus::MissingManifest);
        }
        let payload_count = count_files(&payload_root)?;
        for file in manifests.values() {
            let entries = match self.read_manifest(file, encoding) {
                Ok(entries) => entries,
                Err(BagError::Malformed { .. }) => return Ok(CompletenessStatus::MalformedManifest),
                Err(e) => return Err(e),
            };
            if entries.len() != payload_count {
                tracing::debug!(
                    "{} lists {} files, payload has {}",
                    file,
                    entries.len(),
                    payload_count
                );
                return Ok(CompletenessStatus::PayloadCountMismatch);
            }
            if !entries.keys().all(|p| self.is_payload_file(p)) {
                return Ok(CompletenessStatus::MissingPayloadFile);
            }
        }

        let tag_manifests = manifest_files(&self.base, TAG_MANIFEST_PREFIX)?;
        if tag_manifests.is_empty() {
            return Ok(CompletenessStatus::Complete);
        }
        let tag_count = self.count_tag_files()?;
        for file in tag_manifests.values() {
            let entries = match self.read_manifest(file, encoding) {
                Ok(entries) => entries,
                Err(BagError::Malformed { .. }) => return Ok(CompletenessStatus::MalformedManifest),
                Err(e) => return Err(e),
            };
            if entries.len() != tag_count {
                return Ok(CompletenessStatus::TagCountMismatch);
            }
            let all_present = entries
                .keys()
                .all(|p| checked_join(&self.base, p).is_ok_and(|path| path.is_file()));
            if !all_present {
                return Ok(CompletenessStatus::MissingTagFile);
            }
        }
        Ok(CompletenessStatus::Complete)
    }

    pub fn is_complete(&self) -> BagResult<bool> {
        Ok(self.completeness_status()?.is_complete())
    }

    /// Recompute every digest of a complete bag and compare to its manifests.
    pub fn validation_status(&self) -> BagResult<ValidationStatus> {
        let completeness = self.completeness_status()?;
        if !completeness.is_complete() {
            return Ok(ValidationStatus::Incomplete(completeness));
        }
        if !self.digests_match(MANIFEST_PREFIX)? {
            return Ok(ValidationStatus::PayloadMismatch);
        }
        if !self.digests_match(TAG_MANIFEST_PREFIX)? {
            return Ok(ValidationStatus::TagMismatch);
        }
        Ok(ValidationStatus::Valid)
    }

    pub fn is_valid(&self) -> BagResult<bool> {
        Ok(self.validation_status()?.is_valid())
    }

    fn is_payload_file(&self, rel_path: &str) -> bool {
        rel_path.starts_with(PAYLOAD_PREFIX)
            && checked_join(&self.base, rel_path).is_ok_and(|path| path.is_file())
    }

    /// Top-level tag files, recursing into directories other than the
    /// payload root; tag manifests themselves are not counted.
    fn count_tag_files(&self) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.base)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TAG_MANIFEST_PREFIX) || name == PAYLOAD_DIR {
                continue;
            }
            if entry.file_type()?.is_dir() {
                count += count_files(&entry.path())?;
            } else {
                count += 1;
            }
        }
        Ok(count)
    }

    /// One multi-hash pass per listed file over every algorithm listing it.
    fn digests_match(&self, prefix: &str) -> BagResult<bool> {
        let mut expected: BTreeMap<String, Digests> = BTreeMap::new();
        for (alg, file) in manifest_files(&self.base, prefix)? {
            for (path, digest) in self.read_manifest(&file, self.encoding)? {
                expected.entry(path).or_default().insert(alg, digest);
            }
        }
        for (path, digests) in &expected {
            let algorithms = ChecksumSet::new(digests.keys().copied())?;
            let file = File::open(checked_join(&self.base, path)?)?;
            let (actual, _) = digest_stream(BufReader::new(file), &algorithms)?;
            if actual != *digests {
                tracing::debug!("Checksum mismatch for {}", path);
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Content access
    // ========================================================================

    /// Path of a payload file, relative to the payload root.
    pub fn payload_file(&self, rel_path: &str) -> BagResult<Option<PathBuf>> {
        if self.sealed {
            return Err(BagError::Access(rel_path.to_string()));
        }
        let path = checked_join(&self.base.join(PAYLOAD_DIR), rel_path)?;
        Ok(path.is_file().then_some(path))
    }

    /// Open a payload file, relative to the payload root.
    pub fn payload_stream(&self, rel_path: &str) -> BagResult<Option<File>> {
        let path = checked_join(&self.base.join(PAYLOAD_DIR), rel_path)?;
        open_existing(&path)
    }

    /// Path of a tag file, relative to the bag root.
    pub fn tag_file(&self, rel_path: &str) -> BagResult<Option<PathBuf>> {
        if self.sealed {
            return Err(BagError::Access(rel_path.to_string()));
        }
        let path = checked_join(&self.base, rel_path)?;
        Ok(path.is_file().then_some(path))
    }

    /// Open a tag file, relative to the bag root.
    pub fn tag_stream(&self, rel_path: &str) -> BagResult<Option<File>> {
        open_existing(&checked_join(&self.base, rel_path)?)
    }

    /// Unresolved fetch entries keyed by payload path.
    pub fn payload_refs(&self) -> BagResult<BTreeMap<String, FetchEntry>> {
        match self.read_tag_text(FETCH_FILE, self.encoding)? {
            Some(text) => codec::parse_fetch(&text, FETCH_FILE),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Payload manifest for any accepted spelling of an algorithm name.
    pub fn payload_manifest(&self, algorithm: &str) -> BagResult<BTreeMap<String, String>> {
        let alg = ChecksumAlgorithm::from_name(algorithm)?;
        self.manifest(&alg.manifest_file())
    }

    /// Tag manifest for any accepted spelling of an algorithm name.
    pub fn tag_manifest(&self, algorithm: &str) -> BagResult<BTreeMap<String, String>> {
        let alg = ChecksumAlgorithm::from_name(algorithm)?;
        self.manifest(&alg.tag_manifest_file())
    }

    /// Parse any manifest-format tag file; missing files are empty.
    pub fn manifest(&self, rel_path: &str) -> BagResult<BTreeMap<String, String>> {
        self.read_manifest(rel_path, self.encoding)
    }

    fn read_manifest(
        &self,
        rel_path: &str,
        encoding: TagEncoding,
    ) -> BagResult<BTreeMap<String, String>> {
        match self.read_tag_text(rel_path, encoding)? {
            Some(text) => codec::parse_manifest(&text, rel_path),
            None => Ok(BTreeMap::new()),
        }
    }

    fn read_tag_text(&self, rel_path: &str, encoding: TagEncoding) -> BagResult<Option<String>> {
        let path = checked_join(&self.base, rel_path)?;
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(encoding.decode(&fs::read(&path)?, rel_path)?))
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Values of a `bag-info.txt` property, in declaration order.
    pub fn metadata(&self, name: &str) -> BagResult<Vec<String>> {
        self.property(METADATA_FILE, name)
    }

    pub fn metadata_reserved(&self, name: MetadataName) -> BagResult<Vec<String>> {
        self.metadata(name.as_str())
    }

    /// Property names of `bag-info.txt` in order of first appearance.
    pub fn metadata_names(&self) -> BagResult<Vec<String>> {
        self.property_names(METADATA_FILE)
    }

    /// Values of a property in any property-format tag file.
    pub fn property(&self, rel_path: &str, name: &str) -> BagResult<Vec<String>> {
        self.with_properties(rel_path, |props| props.values(name))
    }

    pub fn property_names(&self, rel_path: &str) -> BagResult<Vec<String>> {
        self.with_properties(rel_path, Properties::names)
    }

    /// Run `f` over the cached properties of a tag file, parsing it once.
    fn with_properties<T>(&self, rel_path: &str, f: impl FnOnce(&Properties) -> T) -> BagResult<T> {
        let cell = {
            let mut cache = self.properties.lock();
            Arc::clone(cache.entry(rel_path.to_string()).or_default())
        };
        let props = cell.get_or_try_init(|| self.parse_properties(rel_path))?;
        Ok(f(props))
    }

    fn parse_properties(&self, rel_path: &str) -> BagResult<Properties> {
        #[cfg(test)]
        self.parses
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.read_tag_text(rel_path, self.encoding)? {
            Some(text) => codec::parse_properties(&text, rel_path),
            None => Ok(Properties::new()),
        }
    }
}

fn open_existing(path: &Path) -> BagResult<Option<File>> {
    match File::open(path) {
        Ok(file) if path.is_file() => Ok(Some(file)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "bag/bag_tests.rs"]
mod bag_tests;
