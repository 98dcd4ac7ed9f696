//! Bag loading.
//!
//! The [`Loader`] turns a directory, an archive file or an archive stream
//! into a bag directory and hands out a [`Bag`] over it. It performs no
//! verification; ask the bag for its completeness and validation status.

use crate::algorithm::ChecksumSet;
use crate::archive::{self, ArchiveFormat};
use crate::bag::{Bag, checked_join, manifest_files};
use crate::codec::{FetchEntry, TextWriter, format_fetch_line, format_manifest_line};
use crate::digest::{DigestWriter, Digests, create_new, digest_stream};
use crate::{
    BagError, BagResult, FETCH_FILE, MANIFEST_PREFIX, PAYLOAD_PREFIX, TAG_MANIFEST_PREFIX,
};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Loader for bags.
///
/// # Example
///
/// ```no_run
/// use bagit::Loader;
///
/// // Inflates my-bag.zip next to itself and deletes the archive
/// let bag = Loader::open("/tmp/my-bag.zip")?.load()?;
/// println!("{}: {}", bag.name(), bag.validation_status()?);
/// # Ok::<(), bagit::BagError>(())
/// ```
#[derive(Debug)]
pub struct Loader {
    dir: PathBuf,
    /// Temporary extraction directory for stream sources.
    scratch: Option<TempDir>,
}

impl Loader {
    /// Open a bag directory or archive file.
    ///
    /// An archive is inflated into a sibling directory named after it with
    /// the suffix stripped, and the archive file is deleted. If that
    /// directory already exists the result is a `Conflict` and the archive
    /// is kept.
    pub fn open<P: AsRef<Path>>(path: P) -> BagResult<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Self::at(path.to_path_buf()));
        }
        let parent = path
            .parent()
            .ok_or_else(|| BagError::InvalidPath(path.display().to_string()))?;
        let dir = Self::inflate(path, parent)?;
        fs::remove_file(path)?;
        tracing::debug!("Removed archive {}", path.display());
        Ok(Self::at(dir))
    }

    /// Open a bag archive, inflating it under `parent` and keeping the archive.
    ///
    /// A directory is used in place.
    pub fn open_into<P: AsRef<Path>, Q: AsRef<Path>>(path: P, parent: Q) -> BagResult<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(Self::at(path.to_path_buf()));
        }
        Ok(Self::at(Self::inflate(path, parent.as_ref())?))
    }

    /// Inflate an archive stream into a temporary directory.
    ///
    /// The bag directory takes the name of the archive's top-level entry
    /// and lives as long as the loader or the bag loaded from it.
    pub fn from_reader<R: Read>(reader: R, format: ArchiveFormat) -> BagResult<Self> {
        let scratch = tempfile::Builder::new().prefix("bag").tempdir()?;
        let dir = archive::extract(reader, format, scratch.path(), None)?;
        Ok(Self {
            dir,
            scratch: Some(scratch),
        })
    }

    /// Inflate an archive stream under `parent`.
    pub fn from_reader_into<P: AsRef<Path>, R: Read>(
        parent: P,
        reader: R,
        format: ArchiveFormat,
    ) -> BagResult<Self> {
        let dir = archive::extract(reader, format, parent.as_ref(), None)?;
        Ok(Self::at(dir))
    }

    fn at(dir: PathBuf) -> Self {
        Self { dir, scratch: None }
    }

    fn inflate(path: &Path, parent: &Path) -> BagResult<PathBuf> {
        let (format, stem) = archive::detect(path)?;
        let reader = BufReader::new(File::open(path)?);
        archive::extract(reader, format, parent, Some(&stem))
    }

    /// Directory holding the bag.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the bag with filesystem access.
    pub fn load(self) -> BagResult<Bag> {
        self.into_bag(false)
    }

    /// Load the bag without filesystem access; content stays readable
    /// through streams.
    pub fn seal(self) -> BagResult<Bag> {
        self.into_bag(true)
    }

    fn into_bag(self, sealed: bool) -> BagResult<Bag> {
        if !self.dir.is_dir() {
            return Err(BagError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no bag directory at {}", self.dir.display()),
            )));
        }
        let bag = Bag::new(self.dir, sealed, self.scratch);
        tracing::info!(
            "Loaded bag {}{}",
            bag.name(),
            if sealed { " (sealed)" } else { "" }
        );
        Ok(bag)
    }

    // ========================================================================
    // Holes
    // ========================================================================

    /// Unresolved fetch entries keyed by bag-relative payload path.
    pub fn payload_refs(&self) -> BagResult<BTreeMap<String, FetchEntry>> {
        self.peek().payload_refs()
    }

    /// Materialize a fetch entry from the caller's bytes.
    ///
    /// `rel_path` is the bag-relative path listed by [`Self::payload_refs`].
    /// The bytes must match every payload manifest entry for the path; on
    /// mismatch the partial file is removed. The entry then leaves
    /// `fetch.txt` and the tag manifests follow the change.
    pub fn resolve_ref<R: Read>(&mut self, rel_path: &str, mut reader: R) -> BagResult<()> {
        let bag = self.peek();
        let mut refs = bag.payload_refs()?;
        if refs.remove(rel_path).is_none() {
            return Err(BagError::UnknownReference(rel_path.to_string()));
        }
        if !rel_path.starts_with(PAYLOAD_PREFIX) {
            return Err(BagError::InvalidPath(rel_path.to_string()));
        }
        let target = checked_join(&self.dir, rel_path)?;
        if target.exists() {
            return Err(BagError::Conflict(rel_path.to_string()));
        }

        let mut expected = Digests::new();
        for (alg, file) in manifest_files(&self.dir, MANIFEST_PREFIX)? {
            if let Some(checksum) = bag.manifest(&file)?.remove(rel_path) {
                expected.insert(alg, checksum);
            }
        }
        if expected.is_empty() {
            return Err(BagError::malformed(
                rel_path,
                "no payload manifest lists this reference",
            ));
        }

        let algorithms = ChecksumSet::new(expected.keys().copied())?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = create_new(&target, rel_path)?;
        let mut writer = DigestWriter::new(BufWriter::new(file), rel_path, &algorithms, None);
        let copied = match io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(e) => {
                writer.abort();
                drop(writer);
                fs::remove_file(&target)?;
                return Err(e.into());
            }
        };
        let actual = writer.close()?.unwrap_or_default();
        drop(writer);

        for (alg, checksum) in &expected {
            let computed = actual.get(alg).cloned().unwrap_or_default();
            if !computed.eq_ignore_ascii_case(checksum) {
                fs::remove_file(&target)?;
                return Err(BagError::ChecksumMismatch {
                    path: rel_path.to_string(),
                    expected: checksum.clone(),
                    actual: computed,
                });
            }
        }
        tracing::debug!("Resolved {} ({} bytes)", rel_path, copied);

        self.rewrite_fetch(&bag, &refs)?;
        self.rewrite_tag_manifests(&bag, refs.is_empty())
    }

    /// Unverified view of the directory for reading tag files.
    fn peek(&self) -> Bag {
        Bag::new(self.dir.clone(), false, None)
    }

    fn rewrite_fetch(&self, bag: &Bag, refs: &BTreeMap<String, FetchEntry>) -> BagResult<()> {
        let path = self.dir.join(FETCH_FILE);
        if refs.is_empty() {
            fs::remove_file(&path)?;
            tracing::debug!("All references resolved; removed {}", FETCH_FILE);
            return Ok(());
        }
        let mut text = TextWriter::new(
            BufWriter::new(File::create(&path)?),
            bag.tag_encoding(),
            bag.line_ending(),
        );
        for (rel_path, entry) in refs {
            text.write_line(&format_fetch_line(rel_path, entry))?;
        }
        text.get_mut().flush()?;
        Ok(())
    }

    fn rewrite_tag_manifests(&self, bag: &Bag, fetch_removed: bool) -> BagResult<()> {
        let tag_manifests = manifest_files(&self.dir, TAG_MANIFEST_PREFIX)?;
        if tag_manifests.is_empty() {
            return Ok(());
        }
        let fetch_digests = if fetch_removed {
            Digests::new()
        } else {
            let algorithms = ChecksumSet::new(tag_manifests.keys().copied())?;
            let file = File::open(self.dir.join(FETCH_FILE))?;
            digest_stream(BufReader::new(file), &algorithms)?.0
        };

        for (alg, file) in tag_manifests {
            let mut entries = bag.manifest(&file)?;
            match fetch_digests.get(&alg) {
                Some(checksum) => entries.insert(FETCH_FILE.to_string(), checksum.clone()),
                None => entries.remove(FETCH_FILE),
            };
            let mut text = TextWriter::new(
                BufWriter::new(File::create(self.dir.join(&file))?),
                bag.tag_encoding(),
                bag.line_ending(),
            );
            for (rel_path, checksum) in &entries {
                text.write_line(&format_manifest_line(checksum, rel_path))?;
            }
            text.get_mut().flush()?;
            tracing::debug!("Rewrote {}", file);
        }
        Ok(())
    }
}
