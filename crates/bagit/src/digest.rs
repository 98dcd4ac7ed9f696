//! Multi-algorithm digest streams.
//!
//! A [`DigestWriter`] forwards bytes to its sink unchanged while feeding one
//! running hash per algorithm. Closing it commits a `<digest> <path>` line
//! for each algorithm to a tail [`ManifestLedger`]. Ledgers are themselves
//! built from digest writers, so a payload manifest reports its own digests
//! to the tag manifest when it is closed.

use crate::algorithm::{ChecksumAlgorithm, ChecksumSet, Hasher};
use crate::codec::{LineEnding, TagEncoding, TextWriter, format_manifest_line};
use crate::{BagError, BagResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Hex digests keyed by algorithm.
pub type Digests = BTreeMap<ChecksumAlgorithm, String>;

/// A ledger shared between the writers that commit to it.
pub type SharedLedger = Arc<Mutex<ManifestLedger>>;

/// One running hash per algorithm.
#[derive(Clone)]
pub struct MultiHasher {
    hashers: Vec<(ChecksumAlgorithm, Hasher)>,
}

impl MultiHasher {
    #[must_use]
    pub fn new(algorithms: &ChecksumSet) -> Self {
        Self {
            hashers: algorithms.iter().map(|a| (a, a.hasher())).collect(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
    }

    #[must_use]
    pub fn finalize(self) -> Digests {
        self.hashers
            .into_iter()
            .map(|(alg, hasher)| (alg, hasher.finalize_hex()))
            .collect()
    }
}

fn closed_stream() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream already closed")
}

/// Write-side digest decorator.
pub struct DigestWriter<W: Write> {
    inner: Option<W>,
    hasher: Option<MultiHasher>,
    rel_path: String,
    tail: Option<SharedLedger>,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wrap `inner`; `rel_path` is the bag-relative path committed on close.
    pub fn new(
        inner: W,
        rel_path: impl Into<String>,
        algorithms: &ChecksumSet,
        tail: Option<SharedLedger>,
    ) -> Self {
        Self {
            inner: Some(inner),
            hasher: Some(MultiHasher::new(algorithms)),
            rel_path: rel_path.into(),
            tail,
            written: 0,
        }
    }

    #[must_use]
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush and release the sink, then commit digests to the tail ledger.
    ///
    /// Returns the digests on the first call and `None` afterwards.
    pub fn close(&mut self) -> io::Result<Option<Digests>> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(None);
        };
        inner.flush()?;
        drop(inner);

        let digests = self
            .hasher
            .take()
            .map(MultiHasher::finalize)
            .unwrap_or_default();
        if let Some(tail) = &self.tail {
            tail.lock().record(&self.rel_path, &digests, self.written)?;
        }
        Ok(Some(digests))
    }

    /// Release the sink without committing anything to the tail ledger.
    ///
    /// Used when a copy fails part way; later `close` calls do nothing.
    pub fn abort(&mut self) {
        self.tail = None;
        self.hasher = None;
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = inner.flush() {
                tracing::debug!("Discarding unflushed bytes of {}: {}", self.rel_path, e);
            }
        }
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(closed_stream)?;
        let n = inner.write(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for DigestWriter<W> {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to close digest stream for {}: {}", self.rel_path, e);
            }
        }
    }
}

/// Read-side digest decorator.
///
/// Digests are only meaningful once the whole stream has been consumed.
pub struct DigestReader<R: Read> {
    inner: R,
    hasher: MultiHasher,
    read: u64,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R, algorithms: &ChecksumSet) -> Self {
        Self {
            inner,
            hasher: MultiHasher::new(algorithms),
            read: 0,
        }
    }

    /// Digests and byte count of everything read so far.
    #[must_use]
    pub fn finish(self) -> (Digests, u64) {
        (self.hasher.finalize(), self.read)
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

/// Drain a reader, returning its digests and length.
pub fn digest_stream<R: Read>(reader: R, algorithms: &ChecksumSet) -> io::Result<(Digests, u64)> {
    let mut reader = DigestReader::new(reader, algorithms);
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish())
}

/// Which family of manifest files a ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Payload,
    Tag,
}

type ManifestText = TextWriter<DigestWriter<BufWriter<File>>>;

/// Tail manifest: one manifest file per algorithm.
///
/// Tallies committed entries and bytes, which for the payload ledger are
/// the bag's payload count and size.
pub struct ManifestLedger {
    writers: Vec<(ChecksumAlgorithm, ManifestText)>,
    entries: u64,
    bytes: u64,
}

impl ManifestLedger {
    /// Create the manifest files under `base`.
    ///
    /// The files are themselves digested and report to `tail` on close.
    pub fn create(
        base: &Path,
        kind: LedgerKind,
        algorithms: &ChecksumSet,
        encoding: TagEncoding,
        line_ending: LineEnding,
        tail: Option<SharedLedger>,
    ) -> BagResult<SharedLedger> {
        let mut writers = Vec::with_capacity(algorithms.len());
        for alg in algorithms.iter() {
            let name = match kind {
                LedgerKind::Payload => alg.manifest_file(),
                LedgerKind::Tag => alg.tag_manifest_file(),
            };
            let file = create_new(&base.join(&name), &name)?;
            let digest = DigestWriter::new(BufWriter::new(file), name, algorithms, tail.clone());
            writers.push((alg, TextWriter::new(digest, encoding, line_ending).recording()));
        }
        Ok(Arc::new(Mutex::new(Self {
            writers,
            entries: 0,
            bytes: 0,
        })))
    }

    /// Append one line per algorithm for `rel_path`.
    pub fn record(&mut self, rel_path: &str, digests: &Digests, bytes: u64) -> io::Result<()> {
        for (alg, writer) in &mut self.writers {
            let checksum = digests.get(alg).ok_or_else(|| {
                io::Error::other(format!("no {alg} checksum for {rel_path}"))
            })?;
            writer.write_line(&format_manifest_line(checksum, rel_path))?;
        }
        self.entries += 1;
        self.bytes += bytes;
        Ok(())
    }

    /// Close every manifest file, committing each to the tail ledger.
    pub fn close(&mut self) -> io::Result<()> {
        for (_, writer) in &mut self.writers {
            writer.get_mut().close()?;
        }
        Ok(())
    }

    /// Lines committed so far for `algorithm`.
    #[must_use]
    pub fn lines(&self, algorithm: ChecksumAlgorithm) -> Vec<String> {
        self.writers
            .iter()
            .find(|(alg, _)| *alg == algorithm)
            .map(|(_, w)| w.lines().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Create a file that must not already exist.
pub(crate) fn create_new(path: &Path, rel_path: &str) -> BagResult<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => BagError::Conflict(rel_path.to_string()),
            _ => BagError::Io(e),
        })
}
