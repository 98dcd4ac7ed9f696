//! Archive transport: zip and gzip-compressed tar.
//!
//! Bags travel as a single top-level directory entry named for the bag.
//! Writing walks the bag tree depth-first in name order; reading extracts
//! under a parent directory, renaming the top-level entry when asked and
//! rejecting entries that would land outside it.

use crate::{BagError, BagResult};
use chrono::{Datelike, Local, TimeZone, Timelike};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{EntryType, Header};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ZIP_MAGIC: [&[u8]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Supported archive serializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Deflate-compressed zip.
    Zip,
    /// Gzip-compressed tar.
    Tgz,
}

impl ArchiveFormat {
    /// File extension written for packages, without the dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tgz => "tgz",
        }
    }

    /// Recognized file-name suffixes, longest first.
    #[must_use]
    pub fn suffixes(&self) -> &'static [&'static str] {
        match self {
            Self::Zip => &[".zip"],
            Self::Tgz => &[".tar.gz", ".tgz"],
        }
    }

    fn matches_magic(&self, header: &[u8]) -> bool {
        match self {
            Self::Zip => ZIP_MAGIC.iter().any(|m| header.starts_with(m)),
            Self::Tgz => header.starts_with(GZIP_MAGIC),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tgz" | "tar.gz" => Ok(Self::Tgz),
            _ => Err(BagError::Config(format!("unsupported archive format: {s}"))),
        }
    }
}

/// Split a file name into its archive format and stem.
///
/// Only a recognized suffix is stripped; `bag.tar.gz` yields `bag`, while
/// `bag.tar.bz2` is not an archive.
#[must_use]
pub fn split_suffix(file_name: &str) -> Option<(ArchiveFormat, &str)> {
    let lower = file_name.to_ascii_lowercase();
    for format in [ArchiveFormat::Zip, ArchiveFormat::Tgz] {
        for suffix in format.suffixes() {
            if lower.ends_with(suffix) && lower.len() > suffix.len() {
                return Some((format, &file_name[..file_name.len() - suffix.len()]));
            }
        }
    }
    None
}

/// Classify an archive file by suffix and magic bytes.
///
/// Returns the format and the name the extracted bag directory takes.
pub fn detect(path: &Path) -> BagResult<(ArchiveFormat, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BagError::InvalidPath(path.display().to_string()))?;
    let (format, stem) = split_suffix(file_name)
        .ok_or_else(|| BagError::Config(format!("unrecognized archive suffix: {file_name}")))?;

    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    let n = read_up_to(&mut file, &mut header)?;
    if !format.matches_magic(&header[..n]) {
        return Err(BagError::Config(format!(
            "{file_name} does not look like a {format} archive"
        )));
    }
    Ok((format, stem.to_string()))
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

// ============================================================================
// Writing
// ============================================================================

struct TreeEntry {
    /// Archive path, `/`-separated, rooted at the bag name.
    name: String,
    path: PathBuf,
    is_dir: bool,
    modified: Option<SystemTime>,
}

/// Depth-first listing in name order, directories before their children.
fn walk(dir: &Path, prefix: &str, out: &mut Vec<TreeEntry>) -> io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let file_name = child.file_name().to_string_lossy().into_owned();
        let name = format!("{prefix}/{file_name}");
        let metadata = child.metadata()?;
        let entry = TreeEntry {
            name: name.clone(),
            path: child.path(),
            is_dir: metadata.is_dir(),
            modified: metadata.modified().ok(),
        };
        out.push(entry);
        if metadata.is_dir() {
            walk(&child.path(), &name, out)?;
        }
    }
    Ok(())
}

fn tree(dir: &Path, root_name: &str) -> io::Result<Vec<TreeEntry>> {
    let mut entries = vec![TreeEntry {
        name: root_name.to_string(),
        path: dir.to_path_buf(),
        is_dir: true,
        modified: fs::metadata(dir)?.modified().ok(),
    }];
    walk(dir, root_name, &mut entries)?;
    Ok(entries)
}

/// Serialize the directory `dir` as one top-level entry named `root_name`.
///
/// With `strip_timestamps`, every entry carries the format's epoch so the
/// same tree always yields the same bytes.
pub fn write_archive<W: Write + Seek>(
    dir: &Path,
    root_name: &str,
    out: W,
    format: ArchiveFormat,
    strip_timestamps: bool,
) -> BagResult<W> {
    let entries = tree(dir, root_name)?;
    tracing::debug!(
        "Writing {} archive of {} with {} entries",
        format,
        dir.display(),
        entries.len()
    );
    match format {
        ArchiveFormat::Zip => write_zip(&entries, out, strip_timestamps),
        ArchiveFormat::Tgz => write_tgz(&entries, out, strip_timestamps),
    }
}

fn zip_time(modified: Option<SystemTime>, strip: bool) -> zip::DateTime {
    if strip {
        return zip::DateTime::default();
    }
    modified
        .and_then(|t| {
            let local = chrono::DateTime::<Local>::from(t);
            let year = u16::try_from(local.year()).ok()?;
            zip::DateTime::from_date_and_time(
                year,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn write_zip<W: Write + Seek>(entries: &[TreeEntry], out: W, strip: bool) -> BagResult<W> {
    let mut zip = ZipWriter::new(out);
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        let options = base.last_modified_time(zip_time(entry.modified, strip));
        if entry.is_dir {
            zip.add_directory(format!("{}/", entry.name), options)?;
        } else {
            zip.start_file(entry.name.as_str(), options)?;
            io::copy(&mut File::open(&entry.path)?, &mut zip)?;
        }
    }
    Ok(zip.finish()?)
}

fn unix_seconds(modified: Option<SystemTime>, strip: bool) -> u64 {
    if strip {
        return 0;
    }
    modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

fn write_tgz<W: Write>(entries: &[TreeEntry], out: W, strip: bool) -> BagResult<W> {
    let encoder: GzEncoder<W> = if strip {
        GzBuilder::new().mtime(0).write(out, Compression::default())
    } else {
        GzEncoder::new(out, Compression::default())
    };
    let mut tar = tar::Builder::new(encoder);

    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_mtime(unix_seconds(entry.modified, strip));
        if entry.is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            tar.append_data(&mut header, format!("{}/", entry.name), io::empty())?;
        } else {
            let file = File::open(&entry.path)?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(file.metadata()?.len());
            tar.append_data(&mut header, &entry.name, file)?;
        }
    }
    Ok(tar.into_inner()?.finish()?)
}

// ============================================================================
// Reading
// ============================================================================

/// Normalize an entry path, rejecting anything that could escape.
pub(crate) fn safe_components(path: &Path) -> BagResult<Vec<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(BagError::InvalidPath(path.display().to_string())),
        }
    }
    Ok(parts)
}

/// Tracks the single top-level directory entries are extracted into.
///
/// That directory must not exist before the first entry is written.
struct Extraction<'a> {
    parent: &'a Path,
    rename: Option<&'a str>,
    root: Option<String>,
}

impl Extraction<'_> {
    /// Destination of an entry, with its top-level component replaced.
    fn target(&mut self, entry_path: &Path, is_dir: bool) -> BagResult<Option<PathBuf>> {
        let parts = safe_components(entry_path)?;
        let Some((first, rest)) = parts.split_first() else {
            return Ok(None);
        };
        if rest.is_empty() && !is_dir {
            return Err(BagError::InvalidPath(format!(
                "{} is outside the bag directory",
                entry_path.display()
            )));
        }
        match &self.root {
            Some(root) if root != first => {
                return Err(BagError::InvalidPath(format!(
                    "{} is outside the bag directory {root}",
                    entry_path.display()
                )));
            }
            Some(_) => {}
            None => {
                let name = self.rename.unwrap_or(first);
                if self.parent.join(name).exists() {
                    return Err(BagError::Conflict(name.to_string()));
                }
                self.root = Some(first.clone());
            }
        }

        let mut target = self.parent.join(self.rename.unwrap_or(first));
        for part in rest {
            target.push(part);
        }
        Ok(Some(target))
    }

    fn finish(self) -> BagResult<PathBuf> {
        let root = self
            .rename
            .map(str::to_string)
            .or(self.root)
            .ok_or_else(|| BagError::InvalidPath("archive has no entries".to_string()))?;
        let dir = self.parent.join(root);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn write_entry<R: Read>(target: &Path, mut reader: R, modified: Option<SystemTime>) -> BagResult<()> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = File::create(target)?;
    io::copy(&mut reader, &mut file)?;
    if let Some(time) = modified {
        file.set_modified(time)?;
    }
    Ok(())
}

/// Extract an archive stream under `parent`.
///
/// When `rename` is given the top-level entry takes that name. Returns the
/// extracted bag directory, which must not already exist.
pub fn extract<R: Read>(
    reader: R,
    format: ArchiveFormat,
    parent: &Path,
    rename: Option<&str>,
) -> BagResult<PathBuf> {
    fs::create_dir_all(parent)?;
    let mut extraction = Extraction {
        parent,
        rename,
        root: None,
    };
    match format {
        ArchiveFormat::Zip => {
            // Zip needs random access; spool streams to an anonymous file.
            let mut spool = tempfile::tempfile()?;
            let mut reader = reader;
            io::copy(&mut reader, &mut spool)?;
            spool.seek(SeekFrom::Start(0))?;
            extract_zip(spool, &mut extraction)?;
        }
        ArchiveFormat::Tgz => extract_tgz(reader, &mut extraction)?,
    }
    let dir = extraction.finish()?;
    tracing::debug!("Extracted {} archive into {}", format, dir.display());
    Ok(dir)
}

fn zip_modified(time: Option<zip::DateTime>) -> Option<SystemTime> {
    let time = time?;
    let naive = chrono::NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

fn extract_zip<R: Read + Seek>(reader: R, extraction: &mut Extraction<'_>) -> BagResult<()> {
    let mut archive = ZipArchive::new(reader)?;
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let entry_path = file
            .enclosed_name()
            .ok_or_else(|| BagError::InvalidPath(file.name().to_string()))?;
        let is_dir = file.is_dir();
        let Some(target) = extraction.target(&entry_path, is_dir)? else {
            continue;
        };
        if is_dir {
            fs::create_dir_all(&target)?;
        } else {
            let modified = zip_modified(file.last_modified());
            write_entry(&target, file, modified)?;
        }
    }
    Ok(())
}

fn extract_tgz<R: Read>(reader: R, extraction: &mut Extraction<'_>) -> BagResult<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    for entry in archive.entries()? {
        let entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let entry_type = entry.header().entry_type();
        let is_dir = entry_type.is_dir();
        if !is_dir && !entry_type.is_file() {
            tracing::warn!("Skipping non-regular archive entry {}", entry_path.display());
            continue;
        }
        let Some(target) = extraction.target(&entry_path, is_dir)? else {
            continue;
        };
        if is_dir {
            fs::create_dir_all(&target)?;
        } else {
            let modified = entry
                .header()
                .mtime()
                .ok()
                .map(|secs| UNIX_EPOCH + std::time::Duration::from_secs(secs));
            write_entry(&target, entry, modified)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "archive/archive_tests.rs"]
mod archive_tests;
