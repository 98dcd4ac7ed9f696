//! Line codecs for manifests, fetch lists and property files.
//!
//! Every tag file is text in the bag's declared encoding. This module turns
//! that text into maps and back, and provides [`TextWriter`], which applies
//! the encoding, byte-order-mark and line-ending rules to each written line.

use crate::metadata::Properties;
use crate::{BagError, BagResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// Width at which property lines are folded.
pub const FOLD_WIDTH: usize = 80;

/// Line termination rule for generated text files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineEnding {
    /// Host convention.
    #[default]
    System,
    /// The opposite of the host convention.
    CounterSystem,
    /// `\n`.
    Unix,
    /// `\r\n`.
    Windows,
}

impl LineEnding {
    #[must_use]
    pub fn separator(&self) -> &'static str {
        let system_is_windows = cfg!(windows);
        match self {
            Self::Unix => "\n",
            Self::Windows => "\r\n",
            Self::System if system_is_windows => "\r\n",
            Self::System => "\n",
            Self::CounterSystem if system_is_windows => "\n",
            Self::CounterSystem => "\r\n",
        }
    }

    /// Concrete rule used by existing text.
    #[must_use]
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Character encodings accepted for tag files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagEncoding {
    #[default]
    Utf8,
    /// Big-endian with a leading byte-order mark.
    Utf16,
    Utf16Be,
    Utf16Le,
}

impl TagEncoding {
    /// Resolve a declared encoding name (case-insensitive).
    pub fn from_name(name: &str) -> BagResult<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "UTF-16" | "UTF16" => Ok(Self::Utf16),
            "UTF-16BE" | "UTF16BE" => Ok(Self::Utf16Be),
            "UTF-16LE" | "UTF16LE" => Ok(Self::Utf16Le),
            _ => Err(BagError::Config(format!("unsupported tag encoding: {name}"))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf16Le => "UTF-16LE",
        }
    }

    /// Encode text; `first` marks the first write into a file, the only
    /// write that carries a byte-order mark.
    #[must_use]
    pub fn encode(&self, text: &str, first: bool) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16 => {
                let mut out = Vec::with_capacity(text.len() * 2 + 2);
                if first {
                    out.extend_from_slice(&[0xFE, 0xFF]);
                }
                out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                out
            }
            Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }

    /// Decode a whole file, dropping a leading byte-order mark.
    pub fn decode(&self, bytes: &[u8], file: &str) -> BagResult<String> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| BagError::malformed(file, format!("invalid UTF-8: {e}")))
            }
            Self::Utf16 => {
                if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
                    decode_utf16(rest, false, file)
                } else {
                    let rest = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
                    decode_utf16(rest, true, file)
                }
            }
            Self::Utf16Be => {
                let rest = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
                decode_utf16(rest, true, file)
            }
            Self::Utf16Le => {
                let rest = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
                decode_utf16(rest, false, file)
            }
        }
    }
}

impl fmt::Display for TagEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool, file: &str) -> BagResult<String> {
    if bytes.len() % 2 != 0 {
        return Err(BagError::malformed(file, "odd byte count for UTF-16"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|e| BagError::malformed(file, format!("invalid UTF-16: {e}")))
}

/// Percent-encode the characters a manifest path may not carry literally.
#[must_use]
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode percent escapes and drop a leading `./`.
///
/// Invalid escapes are kept literally.
#[must_use]
pub fn decode_path(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    if !path.contains('%') {
        return path.to_string();
    }

    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = escaped {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| path.to_string())
}

/// Format one manifest line.
#[must_use]
pub fn format_manifest_line(checksum: &str, path: &str) -> String {
    format!("{checksum} {}", encode_path(path))
}

/// Split a line into its first token and the remainder.
fn split_token(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    let (head, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    if head.is_empty() || rest.is_empty() {
        None
    } else {
        Some((head, rest))
    }
}

/// Parse manifest text into path → lowercase hex digest.
pub fn parse_manifest(text: &str, file: &str) -> BagResult<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (checksum, path) = split_token(line).ok_or_else(|| {
            BagError::malformed(file, format!("line {} is not '<checksum> <path>'", idx + 1))
        })?;
        entries.insert(decode_path(path), checksum.to_ascii_lowercase());
    }
    Ok(entries)
}

/// A payload held by reference instead of inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEntry {
    /// Absolute source URI.
    pub uri: String,
    /// Declared size in bytes, if known.
    pub size: Option<u64>,
}

/// Format one `fetch.txt` line.
#[must_use]
pub fn format_fetch_line(path: &str, entry: &FetchEntry) -> String {
    let size = entry
        .size
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    format!("{} {size} {}", entry.uri, encode_path(path))
}

/// Parse `fetch.txt` text into path → entry.
pub fn parse_fetch(text: &str, file: &str) -> BagResult<BTreeMap<String, FetchEntry>> {
    let mut entries = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bad = || BagError::malformed(file, format!("line {} is not '<uri> <size> <path>'", idx + 1));
        let (uri, rest) = split_token(line).ok_or_else(bad)?;
        let (size, path) = split_token(rest).ok_or_else(bad)?;
        let size = if size == "-" {
            None
        } else {
            Some(size.parse::<u64>().map_err(|_| {
                BagError::malformed(file, format!("line {} has invalid size '{size}'", idx + 1))
            })?)
        };
        entries.insert(
            decode_path(path),
            FetchEntry {
                uri: uri.to_string(),
                size,
            },
        );
    }
    Ok(entries)
}

/// Fold `Name: value` into lines of at most [`FOLD_WIDTH`] characters.
///
/// Continuation lines start with one space. The first line always holds
/// the whole `Name:` prefix so it can be recognized on read.
#[must_use]
pub fn fold_property(name: &str, value: &str) -> Vec<String> {
    let text = format!("{name}: {value}");
    let chars: Vec<char> = text.chars().collect();
    let first_width = FOLD_WIDTH.max(name.chars().count() + 2);

    let mut lines = Vec::new();
    let first_end = first_width.min(chars.len());
    lines.push(chars[..first_end].iter().collect::<String>());
    for chunk in chars[first_end..].chunks(FOLD_WIDTH) {
        let mut line = String::with_capacity(chunk.len() + 1);
        line.push(' ');
        line.extend(chunk);
        lines.push(line);
    }
    lines
}

/// Check that a property survives a write and read unchanged.
///
/// Names must be non-empty and free of `:` and line breaks. Neither side
/// may carry line breaks or leading or trailing whitespace.
pub fn check_property(name: &str, value: &str) -> BagResult<()> {
    let has_break = |s: &str| s.contains(['\r', '\n']);
    let padded = |s: &str| s.trim() != s;
    let reason = if name.is_empty() {
        "empty name"
    } else if name.contains(':') {
        "name contains ':'"
    } else if has_break(name) || has_break(value) {
        "line break"
    } else if padded(name) || padded(value) {
        "leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(BagError::InvalidProperty(format!("{name:?}: {reason}")))
}

/// Parse continuation-style property text.
pub fn parse_properties(text: &str, file: &str) -> BagResult<Properties> {
    let mut props = Properties::new();
    let mut current: Option<(String, String)> = None;

    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() || (current.is_none() && line.trim().is_empty()) {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current.as_mut().ok_or_else(|| {
                BagError::malformed(file, format!("line {} continues nothing", idx + 1))
            })?;
            value.push_str(&line[1..]);
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            BagError::malformed(file, format!("line {} is not 'Name: value'", idx + 1))
        })?;
        if let Some((n, v)) = current.take() {
            props.push(n, v.trim());
        }
        current = Some((name.trim().to_string(), value.to_string()));
    }
    if let Some((n, v)) = current {
        props.push(n, v.trim());
    }
    Ok(props)
}

/// Line and property writer over a byte sink.
///
/// Applies the tag encoding (byte-order mark on the first write only) and
/// the line-ending rule. Optionally keeps a copy of each written line.
pub struct TextWriter<W: Write> {
    out: W,
    encoding: TagEncoding,
    separator: &'static str,
    started: bool,
    recorded: Option<Vec<String>>,
}

impl<W: Write> TextWriter<W> {
    pub fn new(out: W, encoding: TagEncoding, line_ending: LineEnding) -> Self {
        Self {
            out,
            encoding,
            separator: line_ending.separator(),
            started: false,
            recorded: None,
        }
    }

    /// Keep written lines for later inspection.
    #[must_use]
    pub fn recording(mut self) -> Self {
        self.recorded = Some(Vec::new());
        self
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let text = format!("{line}{}", self.separator);
        let bytes = self.encoding.encode(&text, !self.started);
        self.started = true;
        self.out.write_all(&bytes)?;
        if let Some(lines) = self.recorded.as_mut() {
            lines.push(line.to_string());
        }
        Ok(())
    }

    pub fn write_property(&mut self, name: &str, value: &str) -> io::Result<()> {
        for line in fold_property(name, value) {
            self.write_line(&line)?;
        }
        Ok(())
    }

    /// Lines written so far; empty unless recording.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        self.recorded.as_deref().unwrap_or(&[])
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }
}
