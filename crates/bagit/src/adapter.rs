//! Copying an existing bag into a new [`Filler`].
//!
//! The copy starts from the source's tag encoding, line ending and
//! checksum algorithms. Generated files are not copied; the new filler
//! writes its own on finalize. The returned filler is still open, so the
//! caller can add to the copy before emitting it.

use crate::algorithm::{ChecksumAlgorithm, ChecksumSet};
use crate::bag::Bag;
use crate::config::FillerConfig;
use crate::filler::Filler;
use crate::metadata::AutoMetadata;
use crate::{
    BagError, BagResult, DECLARATION_FILE, FETCH_FILE, MANIFEST_PREFIX, METADATA_FILE,
    PAYLOAD_PREFIX, TAG_MANIFEST_PREFIX,
};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Bag-to-filler copier.
///
/// # Example
///
/// ```no_run
/// use bagit::{Adapter, ChecksumAlgorithm, ChecksumSet, Loader};
///
/// let bag = Loader::open("/tmp/old-bag")?.load()?;
/// let sha256 = ChecksumSet::single(ChecksumAlgorithm::Sha256);
/// let mut filler = Adapter::copy_rekeyed("/tmp/new-bag", &bag, &sha256)?;
/// filler.metadata("Internal-Sender-Description", "re-keyed copy")?;
/// filler.to_directory()?;
/// # Ok::<(), bagit::BagError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Adapter;

impl Adapter {
    /// Copy `bag` into a transient filler.
    pub fn copy(bag: &Bag) -> BagResult<Filler> {
        let config = Self::config(bag, &bag.checksum_algorithms()?);
        let filler = Filler::transient_with_config(&config)?;
        Self::fill(bag, filler)
    }

    /// Copy `bag` into a filler at `base`.
    pub fn copy_to(base: impl AsRef<Path>, bag: &Bag) -> BagResult<Filler> {
        let algorithms = bag.checksum_algorithms()?;
        Self::copy_rekeyed(base, bag, &algorithms)
    }

    /// Copy `bag` into a filler at `base` using `algorithms`.
    ///
    /// Fetch entries carry no content to rehash, so re-keying a bag with
    /// unresolved holes to an algorithm it lacks is refused before anything
    /// is written.
    pub fn copy_rekeyed(
        base: impl AsRef<Path>,
        bag: &Bag,
        algorithms: &ChecksumSet,
    ) -> BagResult<Filler> {
        let source = bag.checksum_algorithms()?;
        if !bag.payload_refs()?.is_empty() && !source.is_superset(algorithms) {
            return Err(BagError::Config(format!(
                "cannot re-key {} with unresolved references to algorithms it does not carry",
                bag.name()
            )));
        }
        let filler = Filler::with_config(base, &Self::config(bag, algorithms))?;
        Self::fill(bag, filler)
    }

    fn config(bag: &Bag, algorithms: &ChecksumSet) -> FillerConfig {
        FillerConfig::new()
            .with_checksum_set(algorithms)
            .with_tag_encoding(bag.tag_encoding())
            .with_line_ending(bag.line_ending())
    }

    fn fill(bag: &Bag, mut filler: Filler) -> BagResult<Filler> {
        let source = bag.checksum_algorithms()?;
        let primary = source.primary();
        let refs = bag.payload_refs()?;

        let mut payloads = 0;
        for path in bag.payload_manifest(primary.as_str())?.into_keys() {
            if refs.contains_key(&path) {
                continue;
            }
            let rel_path = path.strip_prefix(PAYLOAD_PREFIX).unwrap_or(&path);
            Self::copy_payload(bag, &mut filler, rel_path)?;
            payloads += 1;
        }

        let mut tags = 0;
        for path in bag.tag_manifest(primary.as_str())?.into_keys() {
            if is_generated(&path) {
                continue;
            }
            Self::copy_tag(bag, &mut filler, &path)?;
            tags += 1;
        }

        let mut manifests: BTreeMap<ChecksumAlgorithm, BTreeMap<String, String>> = BTreeMap::new();
        for alg in filler.algorithms().iter() {
            manifests.insert(alg, bag.payload_manifest(alg.as_str())?);
        }
        for (path, entry) in &refs {
            let checksums: BTreeMap<ChecksumAlgorithm, String> = manifests
                .iter()
                .filter_map(|(alg, manifest)| manifest.get(path).map(|c| (*alg, c.clone())))
                .collect();
            let rel_path = path.strip_prefix(PAYLOAD_PREFIX).unwrap_or(path);
            filler.payload_ref_unsafe(rel_path, entry.size, &entry.uri, &checksums)?;
        }

        for name in bag.metadata_names()? {
            if AutoMetadata::is_generated(&name) {
                continue;
            }
            for value in bag.metadata(&name)? {
                filler.metadata(&name, &value)?;
            }
        }

        tracing::info!(
            "Copied bag {} ({} payload files, {} references, {} tag files)",
            bag.name(),
            payloads,
            refs.len(),
            tags
        );
        Ok(filler)
    }

    fn copy_payload(bag: &Bag, filler: &mut Filler, rel_path: &str) -> BagResult<()> {
        if !bag.is_sealed() {
            let path = bag.payload_file(rel_path)?.ok_or_else(|| missing(rel_path))?;
            filler.payload(rel_path, path)?;
            return Ok(());
        }
        let reader = bag.payload_stream(rel_path)?.ok_or_else(|| missing(rel_path))?;
        filler.payload_from(rel_path, io::BufReader::new(reader))?;
        Ok(())
    }

    fn copy_tag(bag: &Bag, filler: &mut Filler, rel_path: &str) -> BagResult<()> {
        if !bag.is_sealed() {
            let path = bag.tag_file(rel_path)?.ok_or_else(|| missing(rel_path))?;
            filler.tag(rel_path, path)?;
            return Ok(());
        }
        let reader = bag.tag_stream(rel_path)?.ok_or_else(|| missing(rel_path))?;
        filler.tag_from(rel_path, io::BufReader::new(reader))?;
        Ok(())
    }
}

/// Files every filler writes for itself.
fn is_generated(rel_path: &str) -> bool {
    rel_path == DECLARATION_FILE
        || rel_path == METADATA_FILE
        || rel_path == FETCH_FILE
        || rel_path.starts_with(MANIFEST_PREFIX)
        || rel_path.starts_with(TAG_MANIFEST_PREFIX)
}

fn missing(rel_path: &str) -> BagError {
    BagError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{rel_path} is listed but absent"),
    ))
}
