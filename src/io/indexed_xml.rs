//! Indexed XML accessor (C6): scans an mzXML or mzData file once to build
//! a `scan_number -> byte range` index, then serves random-access lookups
//! by slicing the raw bytes and feeding a synthetic document to a fresh
//! one-shot instance of the matching sequential parser (C5).

use std::fs;
use std::io::Cursor;
use std::path::Path;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::error::{ReaderError, XmlParseError};
use crate::io::mzdata_xml::MzDataReader;
use crate::io::mzxml::MzXmlReader;
use crate::io::offset_index::ScanIndex;
use crate::progress::AbortFlag;
use crate::spectrum::Spectrum;
use crate::text_reader::decode_whole;

/// Which XML dialect an accessor instance is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlFormat {
    MzXml,
    MzData,
}

impl XmlFormat {
    fn start_tag(&self) -> &'static str {
        match self {
            XmlFormat::MzXml => "scan",
            XmlFormat::MzData => "spectrum",
        }
    }

    /// mzData's `<spectrum>` matching is case-insensitive per spec.md
    /// §4.5; mzXML's `<scan>` is not.
    fn case_insensitive(&self) -> bool {
        matches!(self, XmlFormat::MzData)
    }
}

lazy_static! {
    static ref NUM_ATTR_RE: Regex = Regex::new(r#"(?i)\bnum\s*=\s*"(\d+)""#).unwrap();
    static ref ID_ATTR_RE: Regex = Regex::new(r#"(?i)\bid\s*=\s*"(\d+)""#).unwrap();
    static ref INDEX_OFFSET_RE: Regex =
        Regex::new(r"(?s)<indexOffset[^>]*>\s*(\d+)\s*</indexOffset>").unwrap();
    static ref OFFSET_ENTRY_RE: Regex =
        Regex::new(r#"(?s)<offset\s+id="(\d+)"[^>]*>\s*(\d+)\s*</offset>"#).unwrap();
}

fn extract_scan_number(tag_text: &str, format: XmlFormat) -> Option<i64> {
    let re = match format {
        XmlFormat::MzXml => &NUM_ATTR_RE,
        XmlFormat::MzData => &ID_ATTR_RE,
    };
    re.captures(tag_text)
        .and_then(|c| c[1].parse().ok())
}

/// One element occurrence found while scanning: the open stack entry.
struct OpenTag {
    scan_number: i64,
    start: u64,
}

/// Scan `text` (already decoded, BOM stripped) for every start/end of
/// `tag`, quote- and comment-aware, returning `(scan_number, start, end)`
/// triples in document order. `start`/`end` are byte offsets in the
/// *original* file, computed from the decoded string's byte index scaled
/// by `char_size` — exact for the ASCII tag syntax this matcher looks at.
fn scan_document(
    text: &str,
    char_size: u64,
    bom_len: u64,
    format: XmlFormat,
) -> (Vec<(i64, u64, u64)>, u64, u64) {
    let bytes = text.as_bytes();
    let tag = format.start_tag();
    let tag_bytes = tag.as_bytes();
    let mut entries = Vec::new();
    let mut stack: Vec<OpenTag> = Vec::new();
    let mut first_start = None;
    let mut last_end = 0u64;

    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"<!--") {
            if let Some(rel) = find_from(bytes, i + 4, b"-->") {
                i = rel + 3;
                continue;
            }
            break;
        }
        if bytes[i..].starts_with(b"<![CDATA[") {
            if let Some(rel) = find_from(bytes, i + 9, b"]]>") {
                i = rel + 3;
                continue;
            }
            break;
        }
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        let is_close = bytes.get(i + 1) == Some(&b'/');
        let name_start = if is_close { i + 2 } else { i + 1 };
        let matches_name = name_matches(bytes, name_start, tag_bytes, format.case_insensitive());

        if !matches_name {
            i += 1;
            continue;
        }

        let Some((tag_end, self_closing)) = scan_tag_end(bytes, i) else {
            break;
        };

        let abs_offset = |decoded_idx: usize| bom_len + decoded_idx as u64 * char_size;

        if is_close {
            if let Some(open) = stack.pop() {
                let end = abs_offset(tag_end);
                entries.push((open.scan_number, open.start, end));
                last_end = end;
            }
        } else {
            let tag_text = std::str::from_utf8(&bytes[i..=tag_end]).unwrap_or("");
            let scan_number = extract_scan_number(tag_text, format).unwrap_or(0);
            let start = abs_offset(i);
            if first_start.is_none() {
                first_start = Some(start);
            }
            if self_closing {
                entries.push((scan_number, start, abs_offset(tag_end)));
                last_end = abs_offset(tag_end);
            } else {
                stack.push(OpenTag { scan_number, start });
            }
        }
        i = tag_end + 1;
    }

    (entries, first_start.unwrap_or(0), last_end)
}

fn find_from(bytes: &[u8], start: usize, needle: &[u8]) -> Option<usize> {
    if start >= bytes.len() {
        return None;
    }
    bytes[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| start + p)
}

fn name_matches(bytes: &[u8], start: usize, name: &[u8], case_insensitive: bool) -> bool {
    if start + name.len() > bytes.len() {
        return false;
    }
    let candidate = &bytes[start..start + name.len()];
    let names_equal = if case_insensitive {
        candidate.eq_ignore_ascii_case(name)
    } else {
        candidate == name
    };
    if !names_equal {
        return false;
    }
    // Must be followed by whitespace, `>`, or `/` — not a longer name
    // that merely starts with the same prefix (e.g. `scanType`).
    matches!(bytes.get(start + name.len()), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'>') | Some(b'/'))
}

/// Scan forward from a tag's opening `<` for its closing (unquoted) `>`,
/// returning its index and whether the tag is self-closing.
fn scan_tag_end(bytes: &[u8], start: usize) -> Option<(usize, bool)> {
    let mut quote: Option<u8> = None;
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            quote = Some(b);
        } else if b == b'>' {
            let self_closing = i > 0 && bytes[i - 1] == b'/';
            return Some((i, self_closing));
        }
        i += 1;
    }
    None
}

/// Indexed random-access reader over an mzXML or mzData file.
pub struct IndexedXmlAccessor {
    format: XmlFormat,
    raw: Vec<u8>,
    index: ScanIndex,
    header: Vec<u8>,
    footer: Vec<u8>,
    pub skip_binary_data: bool,
    pub abort: AbortFlag,
}

impl IndexedXmlAccessor {
    pub fn open<P: AsRef<Path>>(path: P, format: XmlFormat) -> Result<Self, ReaderError> {
        let raw = fs::read(path)?;
        let mut accessor = Self {
            format,
            raw,
            index: ScanIndex::new(),
            header: Vec::new(),
            footer: Vec::new(),
            skip_binary_data: false,
            abort: AbortFlag::new(),
        };
        if !accessor.try_embedded_index() {
            accessor.build_index();
        }
        Ok(accessor)
    }

    /// Full forward scan for start/end offsets and the header/footer
    /// prolog text, per spec.md §4.5.
    fn build_index(&mut self) {
        self.index.clear();
        let (encoding, bom_len, text) = decode_whole(&self.raw);
        let char_size = encoding.char_size();
        let (entries, first_start, last_end) = scan_document(&text, char_size, bom_len, self.format);

        for (scan_number, start, end) in &entries {
            self.index.store(*scan_number, *scan_number, *start, *end);
        }

        self.header = self.raw.get(..first_start as usize).unwrap_or(&[]).to_vec();
        let footer_start = (last_end as usize + 1).min(self.raw.len());
        self.footer = self.raw.get(footer_start..).unwrap_or(&[]).to_vec();
    }

    /// mzXML's optional trailing `<index>`/`<indexOffset>` shortcut.
    /// Returns `true` if a usable embedded index was loaded.
    fn try_embedded_index(&mut self) -> bool {
        if self.format != XmlFormat::MzXml {
            return false;
        }
        let (_, _, text) = decode_whole(&self.raw);
        let Some(caps) = INDEX_OFFSET_RE.captures(&text) else {
            return false;
        };
        let Ok(offset) = caps[1].parse::<usize>() else {
            return false;
        };
        if offset >= text.len() {
            return false;
        }
        let section = &text[offset..];

        let mut entries = Vec::new();
        for caps in OFFSET_ENTRY_RE.captures_iter(section) {
            let (Ok(scan_number), Ok(start)) = (caps[1].parse::<i64>(), caps[2].parse::<u64>())
            else {
                continue;
            };
            entries.push((scan_number, start));
        }
        if entries.is_empty() {
            return false;
        }

        if !self.spot_check_offsets(&entries) {
            warn!("embedded mzXML index failed spot-check, falling back to a full scan");
            return false;
        }

        self.index.clear();
        for (scan_number, start) in &entries {
            let end = self.find_end_offset(*start);
            self.index.store(*scan_number, *scan_number, *start, end);
        }
        let first_start = entries.first().map(|(_, s)| *s).unwrap_or(0);
        self.header = self.raw.get(..first_start as usize).unwrap_or(&[]).to_vec();
        let last_end = self.index.get_by_index(self.index.len().saturating_sub(1))
            .map(|e| e.byte_offset_end)
            .unwrap_or(0);
        let footer_start = (last_end as usize + 1).min(self.raw.len());
        self.footer = self.raw.get(footer_start..).unwrap_or(&[]).to_vec();
        true
    }

    fn spot_check_offsets(&self, entries: &[(i64, u64)]) -> bool {
        let tag = self.format.start_tag();
        let expected = format!("<{tag}");
        entries
            .iter()
            .take(2)
            .all(|(_, start)| {
                let start = *start as usize;
                self.raw
                    .get(start..(start + expected.len()).min(self.raw.len()))
                    .map(|s| s.eq_ignore_ascii_case(expected.as_bytes()))
                    .unwrap_or(false)
            })
    }

    /// Scan forward from a known start offset to find the matching
    /// element's closing `>`, used when an embedded index only supplies
    /// start offsets.
    fn find_end_offset(&self, start: u64) -> u64 {
        let (_, _, text) = decode_whole(&self.raw[start as usize..]);
        let tag = self.format.start_tag();
        let (entries, _, _) = scan_document(&text, 1, start, self.format);
        entries.first().map(|(_, _, end)| *end).unwrap_or_else(|| {
            warn!("could not locate closing tag for <{tag}> starting at {start}");
            start
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get_scan_number_list(&self) -> Vec<i64> {
        self.index.scan_numbers().collect()
    }

    fn synthetic_document(&self, start: u64, end: u64) -> Vec<u8> {
        let mut doc = Vec::with_capacity(self.header.len() + self.footer.len() + (end - start) as usize + 1);
        doc.extend_from_slice(&self.header);
        doc.extend_from_slice(&self.raw[start as usize..=end as usize]);
        doc.extend_from_slice(&self.footer);
        doc
    }

    fn parse_fragment(&self, start: u64, end: u64) -> Result<Option<Spectrum>, XmlParseError> {
        let doc = self.synthetic_document(start, end);
        let doc_text = String::from_utf8_lossy(&doc).into_owned();
        match self.format {
            XmlFormat::MzXml => {
                let mut reader = MzXmlReader::new(Cursor::new(doc)).with_source_text(doc_text);
                reader.skip_binary_data = self.skip_binary_data;
                reader.read_next_spectrum()
            }
            XmlFormat::MzData => {
                let mut reader = MzDataReader::new(Cursor::new(doc)).with_source_text(doc_text);
                reader.skip_binary_data = self.skip_binary_data;
                reader.read_next_spectrum()
            }
        }
    }

    pub fn get_spectrum_by_scan_number(&self, scan_number: i64) -> Result<Spectrum, ReaderError> {
        let entry = self
            .index
            .get_by_scan_number(scan_number)
            .ok_or(ReaderError::InvalidScanNumber(scan_number))?;
        self.parse_fragment(entry.byte_offset_start, entry.byte_offset_end)?
            .ok_or(ReaderError::InvalidScanNumber(scan_number))
    }

    pub fn get_spectrum_by_index(&self, index: usize) -> Result<Spectrum, ReaderError> {
        let entry = self
            .index
            .get_by_index(index)
            .ok_or(ReaderError::InvalidSpectrumIndex(index))?;
        self.parse_fragment(entry.byte_offset_start, entry.byte_offset_end)?
            .ok_or(ReaderError::InvalidSpectrumIndex(index))
    }

    pub fn get_source_xml_by_scan_number(&self, scan_number: i64) -> Result<String, ReaderError> {
        let entry = self
            .index
            .get_by_scan_number(scan_number)
            .ok_or(ReaderError::InvalidScanNumber(scan_number))?;
        Ok(String::from_utf8_lossy(
            &self.raw[entry.byte_offset_start as usize..=entry.byte_offset_end as usize],
        )
        .into_owned())
    }
}
