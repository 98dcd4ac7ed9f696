//! Bag construction.
//!
//! A [`Filler`] accumulates payload, tag files and metadata into a bag
//! directory, then finalizes it exactly once and emits it as a directory,
//! an archive file or an archive stream.
//!
//! Every file is written through a [`DigestWriter`] whose digests commit to
//! a manifest ledger when it closes. Finalize closes the writers in
//! dependency order so the tag manifest, closed last, covers the payload
//! manifests and the declaration.

use crate::algorithm::{ChecksumAlgorithm, ChecksumSet};
use crate::archive::{self, ArchiveFormat, safe_components};
use crate::bag::checked_join;
use crate::codec::{
    FetchEntry, LineEnding, TagEncoding, TextWriter, check_property, format_fetch_line,
};
use crate::config::FillerConfig;
use crate::digest::{
    DigestWriter, Digests, LedgerKind, ManifestLedger, SharedLedger, create_new, digest_stream,
};
use crate::metadata::{AutoMetadata, MetadataName};
use crate::{
    BAGIT_VERSION, BagError, BagResult, DECLARATION_FILE, FETCH_FILE, LIB_VERSION, MANIFEST_PREFIX,
    METADATA_FILE, PAYLOAD_DIR, PAYLOAD_PREFIX, TAG_MANIFEST_PREFIX,
};
use chrono::Local;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const SIZE_UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];

/// Human-readable size in powers of 1000, truncated.
#[must_use]
pub fn scaled_size(bytes: u64) -> String {
    let mut size = bytes;
    let mut unit = 0;
    while size >= 1000 && unit < SIZE_UNITS.len() - 1 {
        size /= 1000;
        unit += 1;
    }
    format!("{size} {}", SIZE_UNITS[unit])
}

fn packaged_error() -> BagError {
    BagError::Io(io::Error::other("bag already packaged"))
}

type FileDigest = DigestWriter<BufWriter<File>>;
type PropertyWriter = TextWriter<FileDigest>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finalized,
    Packaged,
}

/// Output stream for one payload or tag file.
///
/// Its manifest lines commit when it is closed, so manifest order follows
/// close order. Closing is idempotent and dropping closes. Streams still
/// open at finalize are closed by the filler.
pub struct BagStream {
    inner: Arc<Mutex<FileDigest>>,
    rel_path: String,
}

impl BagStream {
    /// Bag-relative path of the file being written.
    #[must_use]
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn close(&self) -> io::Result<()> {
        self.inner.lock().close().map(|_| ())
    }
}

impl Write for BagStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl Drop for BagStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close bag stream {}: {}", self.rel_path, e);
        }
    }
}

/// Readable package emitted by [`Filler::to_stream`].
///
/// For a transient bag the package file is deleted when the stream is
/// closed or dropped.
pub struct PackageStream {
    file: Option<File>,
    path: PathBuf,
    delete_on_close: bool,
}

impl PackageStream {
    /// Location of the package file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&mut self) -> io::Result<()> {
        if self.file.take().is_none() {
            return Ok(());
        }
        if self.delete_on_close {
            match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => tracing::debug!("Removed transient package {}", self.path.display()),
            }
        }
        Ok(())
    }
}

impl Read for PackageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "package stream closed")),
        }
    }
}

impl Drop for PackageStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close package {}: {}", self.path.display(), e);
        }
    }
}

/// Builder for one bag.
///
/// # Example
///
/// ```no_run
/// use bagit::{Filler, MetadataName};
/// use std::io::Write;
///
/// let mut filler = Filler::new("/tmp/report-bag")?;
/// filler
///     .payload("report.pdf", "/home/ann/report.pdf")?
///     .metadata_reserved(MetadataName::ExternalIdentifier, "rpt-2024-001")?;
///
/// let mut notes = filler.payload_stream("notes.txt")?;
/// notes.write_all(b"generated on the fly")?;
/// notes.close()?;
///
/// let dir = filler.to_directory()?;
/// # Ok::<(), bagit::BagError>(())
/// ```
pub struct Filler {
    base: PathBuf,
    /// Set for transient bags built in a temporary directory.
    scratch: Option<TempDir>,
    transient: bool,
    algorithms: ChecksumSet,
    encoding: TagEncoding,
    line_ending: LineEnding,
    auto_metadata: BTreeSet<AutoMetadata>,
    payload_ledger: SharedLedger,
    tag_ledger: SharedLedger,
    writers: BTreeMap<String, PropertyWriter>,
    streams: Vec<Arc<Mutex<FileDigest>>>,
    refs: BTreeSet<String>,
    state: State,
}

impl std::fmt::Debug for Filler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filler")
            .field("base", &self.base)
            .field("transient", &self.transient)
            .field("algorithms", &self.algorithms)
            .field("encoding", &self.encoding)
            .field("line_ending", &self.line_ending)
            .field("auto_metadata", &self.auto_metadata)
            .field("refs", &self.refs)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Filler {
    /// Start a bag at `base` with the default configuration.
    pub fn new(base: impl AsRef<Path>) -> BagResult<Self> {
        Self::with_config(base, &FillerConfig::default())
    }

    pub fn with_config(base: impl AsRef<Path>, config: &FillerConfig) -> BagResult<Self> {
        Self::create(base.as_ref().to_path_buf(), None, config)
    }

    /// Start a bag in a fresh temporary directory.
    ///
    /// Packages emitted as streams from a transient bag delete themselves
    /// when the stream is closed.
    pub fn transient() -> BagResult<Self> {
        Self::transient_with_config(&FillerConfig::default())
    }

    pub fn transient_with_config(config: &FillerConfig) -> BagResult<Self> {
        let scratch = tempfile::Builder::new().prefix("bag").tempdir()?;
        Self::create(scratch.path().to_path_buf(), Some(scratch), config)
    }

    fn create(base: PathBuf, scratch: Option<TempDir>, config: &FillerConfig) -> BagResult<Self> {
        let algorithms = config.checksum_set()?;
        let encoding = config.encoding()?;
        let line_ending = config.line_ending;
        fs::create_dir_all(base.join(PAYLOAD_DIR))?;

        let tag_ledger = ManifestLedger::create(
            &base,
            LedgerKind::Tag,
            &algorithms,
            encoding,
            line_ending,
            None,
        )?;
        let payload_ledger = ManifestLedger::create(
            &base,
            LedgerKind::Payload,
            &algorithms,
            encoding,
            line_ending,
            Some(Arc::clone(&tag_ledger)),
        )?;
        tracing::debug!(
            "Started bag at {} with {} algorithm(s)",
            base.display(),
            algorithms.len()
        );

        Ok(Self {
            base,
            transient: scratch.is_some(),
            scratch,
            algorithms,
            encoding,
            line_ending,
            auto_metadata: config.auto_metadata.iter().copied().collect(),
            payload_ledger,
            tag_ledger,
            writers: BTreeMap::new(),
            streams: Vec::new(),
            refs: BTreeSet::new(),
            state: State::Open,
        })
    }

    /// Bag name: the base directory's file name.
    #[must_use]
    pub fn name(&self) -> String {
        self.base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    #[must_use]
    pub fn algorithms(&self) -> &ChecksumSet {
        &self.algorithms
    }

    /// Choose the metadata generated on finalize.
    pub fn auto_metadata<I>(&mut self, selection: I) -> &mut Self
    where
        I: IntoIterator<Item = AutoMetadata>,
    {
        self.auto_metadata = selection.into_iter().collect();
        self
    }

    /// Generate no metadata on finalize.
    pub fn no_auto_metadata(&mut self) -> &mut Self {
        self.auto_metadata.clear();
        self
    }

    /// Payload manifest lines committed so far for `algorithm`.
    #[must_use]
    pub fn manifest(&self, algorithm: ChecksumAlgorithm) -> Vec<String> {
        self.payload_ledger.lock().lines(algorithm)
    }

    // ========================================================================
    // Paths
    // ========================================================================

    fn ensure_open(&self, rel_path: &str) -> BagResult<()> {
        match self.state {
            State::Open => Ok(()),
            State::Finalized | State::Packaged => Err(BagError::Finalized(rel_path.to_string())),
        }
    }

    /// Normalized `/`-separated form of a relative path.
    fn normalize(rel_path: &str) -> BagResult<String> {
        let parts = safe_components(Path::new(rel_path))?;
        if parts.is_empty() {
            return Err(BagError::InvalidPath(rel_path.to_string()));
        }
        Ok(parts.join("/"))
    }

    /// Manifest path and filesystem target of a payload path.
    fn payload_target(&self, rel_path: &str) -> BagResult<(String, PathBuf)> {
        self.ensure_open(rel_path)?;
        let manifest_path = format!("{PAYLOAD_PREFIX}{}", Self::normalize(rel_path)?);
        if self.refs.contains(&manifest_path) {
            return Err(BagError::Conflict(manifest_path));
        }
        let target = checked_join(&self.base, &manifest_path)?;
        Ok((manifest_path, target))
    }

    /// Normalized tag path; the payload root and generated files are off limits.
    fn tag_path(&self, rel_path: &str, allow_property_files: bool) -> BagResult<String> {
        self.ensure_open(rel_path)?;
        let path = Self::normalize(rel_path)?;
        if path == PAYLOAD_DIR || path.starts_with(PAYLOAD_PREFIX) {
            return Err(BagError::InvalidPath(format!(
                "tag file {path} may not be placed in the payload directory"
            )));
        }
        let generated = path == DECLARATION_FILE
            || path.starts_with(MANIFEST_PREFIX)
            || path.starts_with(TAG_MANIFEST_PREFIX);
        let managed = path == METADATA_FILE || path == FETCH_FILE;
        if generated || (managed && !allow_property_files) {
            return Err(BagError::Conflict(path));
        }
        Ok(path)
    }

    fn open_target(target: &Path, rel_path: &str) -> BagResult<File> {
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        create_new(target, rel_path)
    }

    /// Copy `reader` to a new file, committing its digests to `ledger`.
    fn copy_in<R: Read>(
        &self,
        target: &Path,
        rel_path: String,
        mut reader: R,
        ledger: &SharedLedger,
    ) -> BagResult<u64> {
        let file = Self::open_target(target, &rel_path)?;
        let mut writer = DigestWriter::new(
            BufWriter::new(file),
            rel_path,
            &self.algorithms,
            Some(Arc::clone(ledger)),
        );
        let copied = match io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(e) => {
                writer.abort();
                return Err(e.into());
            }
        };
        writer.close()?;
        tracing::debug!("Added {} ({} bytes)", writer.rel_path(), copied);
        Ok(copied)
    }

    fn open_stream(&mut self, target: &Path, rel_path: String, ledger: SharedLedger) -> BagResult<BagStream> {
        let file = Self::open_target(target, &rel_path)?;
        let writer = DigestWriter::new(BufWriter::new(file), rel_path.clone(), &self.algorithms, Some(ledger));
        let inner = Arc::new(Mutex::new(writer));
        self.streams.push(Arc::clone(&inner));
        Ok(BagStream { inner, rel_path })
    }

    // ========================================================================
    // Payload
    // ========================================================================

    /// Copy a file into the payload at `rel_path`, keeping its modification time.
    pub fn payload(&mut self, rel_path: &str, file: impl AsRef<Path>) -> BagResult<&mut Self> {
        let source = file.as_ref();
        let (manifest_path, target) = self.payload_target(rel_path)?;
        let reader = BufReader::new(File::open(source)?);
        let ledger = Arc::clone(&self.payload_ledger);
        self.copy_in(&target, manifest_path, reader, &ledger)?;

        let modified = fs::metadata(source)?.modified()?;
        File::options()
            .write(true)
            .open(&target)?
            .set_modified(modified)?;
        Ok(self)
    }

    /// Copy a file into the payload under its own file name.
    pub fn payload_file(&mut self, file: impl AsRef<Path>) -> BagResult<&mut Self> {
        let source = file.as_ref();
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BagError::InvalidPath(source.display().to_string()))?
            .to_string();
        self.payload(&name, source)
    }

    /// Copy a stream into the payload at `rel_path`.
    pub fn payload_from<R: Read>(&mut self, rel_path: &str, reader: R) -> BagResult<&mut Self> {
        let (manifest_path, target) = self.payload_target(rel_path)?;
        let ledger = Arc::clone(&self.payload_ledger);
        self.copy_in(&target, manifest_path, reader, &ledger)?;
        Ok(self)
    }

    /// Open a payload file for writing.
    pub fn payload_stream(&mut self, rel_path: &str) -> BagResult<BagStream> {
        let (manifest_path, target) = self.payload_target(rel_path)?;
        let ledger = Arc::clone(&self.payload_ledger);
        self.open_stream(&target, manifest_path, ledger)
    }

    /// Record a payload held by reference, hashing the caller's bytes.
    ///
    /// The bytes are digested and counted but not stored.
    pub fn payload_ref<R: Read>(&mut self, rel_path: &str, reader: R, uri: &str) -> BagResult<&mut Self> {
        let (digests, size) = digest_stream(reader, &self.algorithms)?;
        self.record_ref(rel_path, Some(size), uri, digests)
    }

    /// Record a payload held by reference with a declared size.
    pub fn payload_ref_with_size<R: Read>(
        &mut self,
        rel_path: &str,
        size: u64,
        reader: R,
        uri: &str,
    ) -> BagResult<&mut Self> {
        let (digests, _) = digest_stream(reader, &self.algorithms)?;
        self.record_ref(rel_path, Some(size), uri, digests)
    }

    /// Record a payload held by reference, trusting the caller's checksums.
    ///
    /// A checksum is required for every configured algorithm; extra ones
    /// are ignored.
    pub fn payload_ref_unsafe(
        &mut self,
        rel_path: &str,
        size: Option<u64>,
        uri: &str,
        checksums: &BTreeMap<ChecksumAlgorithm, String>,
    ) -> BagResult<&mut Self> {
        let mut digests = Digests::new();
        for alg in self.algorithms.iter() {
            let checksum = checksums.get(&alg).ok_or_else(|| {
                BagError::Config(format!("no {alg} checksum supplied for {rel_path}"))
            })?;
            digests.insert(alg, checksum.to_ascii_lowercase());
        }
        self.record_ref(rel_path, size, uri, digests)
    }

    fn record_ref(
        &mut self,
        rel_path: &str,
        size: Option<u64>,
        uri: &str,
        digests: Digests,
    ) -> BagResult<&mut Self> {
        let (manifest_path, target) = self.payload_target(rel_path)?;
        if target.exists() {
            return Err(BagError::Conflict(manifest_path));
        }
        url::Url::parse(uri).map_err(|e| BagError::InvalidUri(format!("{uri}: {e}")))?;

        let entry = FetchEntry {
            uri: uri.to_string(),
            size,
        };
        self.writer(FETCH_FILE)?
            .write_line(&format_fetch_line(&manifest_path, &entry))?;
        self.payload_ledger
            .lock()
            .record(&manifest_path, &digests, size.unwrap_or(0))?;
        tracing::debug!("Recorded reference {} -> {}", manifest_path, uri);
        self.refs.insert(manifest_path);
        Ok(self)
    }

    // ========================================================================
    // Tag files and metadata
    // ========================================================================

    /// Copy a file in as a tag file at `rel_path`.
    pub fn tag(&mut self, rel_path: &str, file: impl AsRef<Path>) -> BagResult<&mut Self> {
        let reader = BufReader::new(File::open(file.as_ref())?);
        self.tag_from(rel_path, reader)
    }

    pub fn tag_from<R: Read>(&mut self, rel_path: &str, reader: R) -> BagResult<&mut Self> {
        let path = self.tag_path(rel_path, false)?;
        let target = checked_join(&self.base, &path)?;
        let ledger = Arc::clone(&self.tag_ledger);
        self.copy_in(&target, path, reader, &ledger)?;
        Ok(self)
    }

    /// Open a tag file for writing.
    pub fn tag_stream(&mut self, rel_path: &str) -> BagResult<BagStream> {
        let path = self.tag_path(rel_path, false)?;
        let target = checked_join(&self.base, &path)?;
        let ledger = Arc::clone(&self.tag_ledger);
        self.open_stream(&target, path, ledger)
    }

    /// Append a `bag-info.txt` property.
    pub fn metadata(&mut self, name: &str, value: &str) -> BagResult<&mut Self> {
        self.property(METADATA_FILE, name, value)
    }

    pub fn metadata_reserved(&mut self, name: MetadataName, value: &str) -> BagResult<&mut Self> {
        self.metadata(name.as_str(), value)
    }

    /// Append a property to any property-format tag file.
    ///
    /// Names and values with line breaks or edge whitespace, and names
    /// holding `:`, are refused with `InvalidProperty`.
    pub fn property(&mut self, rel_path: &str, name: &str, value: &str) -> BagResult<&mut Self> {
        let path = self.tag_path(rel_path, true)?;
        if path == FETCH_FILE {
            return Err(BagError::Conflict(path));
        }
        check_property(name, value)?;
        self.writer(&path)?.write_property(name, value)?;
        Ok(self)
    }

    /// Named text writer, opened on first use.
    fn writer(&mut self, rel_path: &str) -> BagResult<&mut PropertyWriter> {
        use std::collections::btree_map::Entry;

        match self.writers.entry(rel_path.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let target = checked_join(&self.base, rel_path)?;
                let file = Self::open_target(&target, rel_path)?;
                let digest = DigestWriter::new(
                    BufWriter::new(file),
                    rel_path,
                    &self.algorithms,
                    Some(Arc::clone(&self.tag_ledger)),
                );
                Ok(entry.insert(TextWriter::new(digest, self.encoding, self.line_ending)))
            }
        }
    }

    // ========================================================================
    // Finalize and output
    // ========================================================================

    /// Close every writer in dependency order. Later calls do nothing.
    pub fn finalize(&mut self) -> BagResult<()> {
        match self.state {
            State::Open => {}
            State::Finalized => return Ok(()),
            State::Packaged => return Err(packaged_error()),
        }

        for stream in self.streams.drain(..) {
            stream.lock().close()?;
        }
        self.write_auto_metadata()?;
        for (_, mut writer) in std::mem::take(&mut self.writers) {
            writer.get_mut().close()?;
        }
        self.payload_ledger.lock().close()?;
        self.write_declaration()?;
        self.tag_ledger.lock().close()?;

        self.state = State::Finalized;
        let (bytes, count) = {
            let ledger = self.payload_ledger.lock();
            (ledger.bytes(), ledger.entries())
        };
        tracing::info!(
            "Finalized bag {} ({} payload files, {})",
            self.name(),
            count,
            scaled_size(bytes)
        );
        Ok(())
    }

    fn write_auto_metadata(&mut self) -> BagResult<()> {
        let (bytes, count) = {
            let ledger = self.payload_ledger.lock();
            (ledger.bytes(), ledger.entries())
        };
        for auto in self.auto_metadata.clone() {
            let value = match auto {
                AutoMetadata::BaggingDate => Local::now().format("%Y-%m-%d").to_string(),
                AutoMetadata::BagSize => scaled_size(bytes),
                AutoMetadata::PayloadOxum => format!("{bytes}.{count}"),
                AutoMetadata::SoftwareAgent => {
                    format!("{} v{}", env!("CARGO_PKG_NAME"), LIB_VERSION)
                }
            };
            self.writer(METADATA_FILE)?
                .write_property(auto.name().as_str(), &value)?;
        }
        Ok(())
    }

    /// `bagit.txt` is always UTF-8 and reports to the tag ledger.
    fn write_declaration(&mut self) -> BagResult<()> {
        let file = create_new(&self.base.join(DECLARATION_FILE), DECLARATION_FILE)?;
        let digest = DigestWriter::new(
            BufWriter::new(file),
            DECLARATION_FILE,
            &self.algorithms,
            Some(Arc::clone(&self.tag_ledger)),
        );
        let mut declaration = TextWriter::new(digest, TagEncoding::Utf8, self.line_ending);
        declaration.write_line(&format!("BagIt-Version: {BAGIT_VERSION}"))?;
        declaration.write_line(&format!("Tag-File-Character-Encoding: {}", self.encoding))?;
        declaration.get_mut().close()?;
        Ok(())
    }

    /// Finalize and leave the bag in place as a directory.
    pub fn to_directory(&mut self) -> BagResult<PathBuf> {
        self.finalize()?;
        if let Some(scratch) = self.scratch.take() {
            // The caller now owns the directory.
            let _ = scratch.keep();
        }
        Ok(self.base.clone())
    }

    /// Finalize, write a package next to the bag directory and remove the
    /// directory.
    pub fn to_package(&mut self, format: ArchiveFormat, strip_timestamps: bool) -> BagResult<PathBuf> {
        self.finalize()?;
        let name = self.name();
        let parent = self
            .base
            .parent()
            .ok_or_else(|| BagError::InvalidPath(self.base.display().to_string()))?;
        let package = parent.join(format!("{name}.{}", format.extension()));
        let file = create_new(&package, &package.display().to_string())?;

        let mut out = archive::write_archive(
            &self.base,
            &name,
            BufWriter::new(file),
            format,
            strip_timestamps,
        )?;
        out.flush()?;
        fs::remove_dir_all(&self.base)?;
        self.scratch = None;
        self.state = State::Packaged;
        tracing::info!("Packaged bag {} as {}", name, package.display());
        Ok(package)
    }

    /// Finalize and package, returning the package as a readable stream.
    pub fn to_stream(&mut self, format: ArchiveFormat, strip_timestamps: bool) -> BagResult<PackageStream> {
        let path = self.to_package(format, strip_timestamps)?;
        let file = File::open(&path)?;
        Ok(PackageStream {
            file: Some(file),
            path,
            delete_on_close: self.transient,
        })
    }
}
