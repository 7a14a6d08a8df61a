//! Binary text reader (C2): an encoding-aware, bidirectional line iterator
//! over a seekable byte source, exposing exact byte offsets per line.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::TextReaderError;

/// Any seekable byte source of known length: the capability bound that
/// replaces the original's duck-typed file-vs-string-stream polymorphism.
pub trait SeekRead: Read + Seek {}
impl<T: Read + Seek> SeekRead for T {}

/// The four character encodings this reader auto-detects. Both UTF-16
/// variants are kept distinct rather than conflated, per spec.md §9's
/// instruction to treat the original's duplicated labels as distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Size in bytes of one character unit: 1 for ASCII/UTF-8 (as a byte
    /// stream; true multi-byte UTF-8 sequences are scanned byte-wise),
    /// 2 for UTF-16.
    pub(crate) fn char_size(&self) -> u64 {
        match self {
            TextEncoding::Ascii | TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => 2,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii | TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            TextEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// Detect encoding from a byte-order mark / leading bytes. Returns the
/// encoding and the length of the BOM to skip (0 if none / ASCII).
fn detect_encoding(head: &[u8]) -> (TextEncoding, u64) {
    if head.len() >= 2 && head[0] == 0xFF && head[1] == 0xFE {
        (TextEncoding::Utf16Le, 2)
    } else if head.len() >= 2 && head[0] == 0xFE && head[1] == 0xFF {
        (TextEncoding::Utf16Be, 2)
    } else if head.len() >= 3 && head[0] == 0xEF && head[1] == 0xBB && head[2] == 0xBF {
        (TextEncoding::Utf8, 3)
    } else {
        (TextEncoding::Ascii, 0)
    }
}

/// Detect encoding and decode an entire in-memory buffer, the same way
/// [`BinaryTextReader`] decodes on open. Used by callers (the indexed XML
/// accessor) that need a single string view of a small file already held
/// in memory rather than a line-at-a-time cursor. Returns the detected
/// encoding, the BOM length skipped, and the decoded body.
pub(crate) fn decode_whole(bytes: &[u8]) -> (TextEncoding, u64, String) {
    let (encoding, bom_len) = detect_encoding(&bytes[..bytes.len().min(3)]);
    let body = &bytes[bom_len as usize..];
    (encoding, bom_len, encoding.decode(body))
}

/// Which terminator a line ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    Crlf,
    Cr,
    Lf,
    None,
}

impl LineTerminator {
    fn byte_len(&self, char_size: u64) -> u64 {
        match self {
            LineTerminator::Crlf => 2 * char_size,
            LineTerminator::Cr | LineTerminator::Lf => char_size,
            LineTerminator::None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A window of raw bytes read around the current cursor, re-primed on
/// every direction switch and every large seek.
struct Chunk {
    /// Absolute byte offset of `bytes[0]` in the source.
    base: u64,
    bytes: Vec<u8>,
}

/// Default size of the scan window used to locate line boundaries.
const CHUNK_SIZE: u64 = 64 * 1024;

/// A bidirectional, encoding-aware line reader over a seekable byte
/// source. See spec.md §4.2 for the full contract.
pub struct BinaryTextReader<R: SeekRead> {
    handle: R,
    file_len: u64,
    encoding: TextEncoding,
    bom_len: u64,
    direction: Direction,
    /// Byte offset where the *next* line read should begin its search,
    /// in the current direction.
    cursor: u64,
    pub current_line_byte_offset_start: u64,
    pub current_line_byte_offset_end: u64,
    pub current_line_terminator: LineTerminator,
    pub line_number: i64,
    chunk: Option<Chunk>,
}

impl BinaryTextReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TextReaderError> {
        let file = File::open(path).map_err(|e| TextReaderError::Io { offset: 0, source: e })?;
        Self::new(file)
    }
}

impl<R: SeekRead> BinaryTextReader<R> {
    pub fn new(mut handle: R) -> Result<Self, TextReaderError> {
        let file_len = handle
            .seek(SeekFrom::End(0))
            .map_err(|e| TextReaderError::Io { offset: 0, source: e })?;
        handle
            .seek(SeekFrom::Start(0))
            .map_err(|e| TextReaderError::Io { offset: 0, source: e })?;

        let mut head = [0u8; 3];
        let n = handle
            .read(&mut head)
            .map_err(|e| TextReaderError::Io { offset: 0, source: e })?;
        let (encoding, bom_len) = detect_encoding(&head[..n]);
        handle
            .seek(SeekFrom::Start(bom_len))
            .map_err(|e| TextReaderError::Io { offset: 0, source: e })?;

        Ok(Self {
            handle,
            file_len,
            encoding,
            bom_len,
            direction: Direction::Forward,
            cursor: bom_len,
            current_line_byte_offset_start: bom_len,
            current_line_byte_offset_end: bom_len,
            current_line_terminator: LineTerminator::None,
            line_number: 0,
            chunk: None,
        })
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    fn io_err(&self, offset: u64, source: io::Error) -> TextReaderError {
        TextReaderError::Io { offset, source }
    }

    /// Ensure a chunk of bytes covering `around` is loaded, refilling
    /// from the source if the cursor has wandered outside it.
    fn ensure_chunk(&mut self, around: u64) -> Result<(), TextReaderError> {
        let needs_refill = match &self.chunk {
            Some(c) => around < c.base || around > c.base + c.bytes.len() as u64,
            None => true,
        };
        if !needs_refill {
            return Ok(());
        }
        let base = around.saturating_sub(CHUNK_SIZE / 2).max(self.bom_len);
        self.handle
            .seek(SeekFrom::Start(base))
            .map_err(|e| self.io_err(base, e))?;
        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let mut total = 0usize;
        loop {
            let n = self
                .handle
                .read(&mut buf[total..])
                .map_err(|e| self.io_err(base + total as u64, e))?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        self.chunk = Some(Chunk { base, bytes: buf });
        Ok(())
    }

    /// Byte at absolute offset `pos`, loading a new chunk if necessary.
    fn byte_at(&mut self, pos: u64) -> Result<Option<u8>, TextReaderError> {
        if pos >= self.file_len {
            return Ok(None);
        }
        self.ensure_chunk(pos)?;
        if let Some(b) = self.chunk_byte(pos) {
            return Ok(Some(b));
        }
        // Fell outside the window (e.g. EOF edge); refill exactly here.
        self.chunk = None;
        self.ensure_chunk(pos)?;
        Ok(self.chunk_byte(pos))
    }

    /// Byte at `pos` if it falls within the currently loaded chunk.
    fn chunk_byte(&self, pos: u64) -> Option<u8> {
        let chunk = self.chunk.as_ref()?;
        if pos < chunk.base || pos - chunk.base >= chunk.bytes.len() as u64 {
            return None;
        }
        Some(chunk.bytes[(pos - chunk.base) as usize])
    }

    fn char_size(&self) -> u64 {
        self.encoding.char_size()
    }

    /// True if the character-sized unit starting at `pos` is a CR.
    fn is_cr(&mut self, pos: u64) -> Result<bool, TextReaderError> {
        self.is_unit(pos, b'\r')
    }

    fn is_lf(&mut self, pos: u64) -> Result<bool, TextReaderError> {
        self.is_unit(pos, b'\n')
    }

    fn is_unit(&mut self, pos: u64, ascii: u8) -> Result<bool, TextReaderError> {
        let cs = self.char_size();
        match self.encoding {
            TextEncoding::Ascii | TextEncoding::Utf8 => Ok(self.byte_at(pos)? == Some(ascii)),
            TextEncoding::Utf16Le => {
                Ok(self.byte_at(pos)? == Some(ascii) && self.byte_at(pos + 1)? == Some(0))
            }
            TextEncoding::Utf16Be => {
                Ok(self.byte_at(pos)? == Some(0) && self.byte_at(pos + 1)? == Some(ascii))
            }
        }
        .map(|v| {
            let _ = cs;
            v
        })
    }

    /// Reposition so the next line read (in the current direction) begins
    /// at or after `offset`; if `offset` falls inside a line, align to
    /// the start of the next line in the chosen direction.
    pub fn move_to_byte_offset(&mut self, offset: u64) -> Result<(), TextReaderError> {
        let offset = offset.max(self.bom_len).min(self.file_len);
        self.cursor = self.align_to_line_start(offset)?;
        Ok(())
    }

    /// If `offset` already sits at the start of a line, return it unchanged;
    /// otherwise scan forward for the next line terminator and return the
    /// byte offset just past it (the start of the *next* line), or
    /// `file_len` if none remains.
    fn align_to_line_start(&mut self, offset: u64) -> Result<u64, TextReaderError> {
        if offset <= self.bom_len {
            return Ok(self.bom_len);
        }
        let cs = self.char_size();

        // A preceding LF always fully terminates a line (bare LF or the
        // tail of CRLF). A preceding bare CR does too, but only if we
        // aren't sitting on the LF half of a CRLF pair, which isn't a
        // fully consumed terminator yet.
        let prev = offset - cs;
        if self.is_lf(prev)? {
            return Ok(offset);
        }
        if self.is_cr(prev)? && !self.is_lf(offset)? {
            return Ok(offset);
        }

        let mut pos = offset;
        while pos < self.file_len {
            if self.is_cr(pos)? {
                let mut next = pos + cs;
                if next < self.file_len && self.is_lf(next)? {
                    next += cs;
                }
                return Ok(next);
            }
            if self.is_lf(pos)? {
                return Ok(pos + cs);
            }
            pos += cs;
        }
        Ok(self.file_len)
    }

    pub fn move_to_beginning(&mut self) {
        self.cursor = self.bom_len;
        self.current_line_byte_offset_start = self.bom_len;
        self.current_line_byte_offset_end = self.bom_len;
        self.line_number = 0;
        self.chunk = None;
    }

    pub fn move_to_end(&mut self) {
        self.cursor = self.file_len;
        self.current_line_byte_offset_start = self.file_len;
        self.current_line_byte_offset_end = self.file_len;
        self.chunk = None;
    }

    /// Switch reading direction. Re-primes the cursor so the next line
    /// returned is the logical neighbor of the last line returned.
    pub fn set_direction(&mut self, direction: Direction) {
        if self.direction == direction {
            return;
        }
        match direction {
            Direction::Forward => {
                // Continue forward from just after the last line read.
                self.cursor = self.current_line_byte_offset_end + self.char_size();
            }
            Direction::Backward => {
                // Continue backward from just before the last line read.
                self.cursor = self.current_line_byte_offset_start;
            }
        }
        self.direction = direction;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Read the next line in the forward direction.
    pub fn read_line(&mut self) -> Result<Option<String>, TextReaderError> {
        if self.direction != Direction::Forward {
            self.set_direction(Direction::Forward);
        }
        self.read_line_forward()
    }

    /// Read the next line in the backward direction.
    pub fn read_line_backward(&mut self) -> Result<Option<String>, TextReaderError> {
        if self.direction != Direction::Backward {
            self.set_direction(Direction::Backward);
        }
        self.read_line_backward_impl()
    }

    fn read_line_forward(&mut self) -> Result<Option<String>, TextReaderError> {
        let cs = self.char_size();
        let start = self.cursor;
        if start >= self.file_len {
            return Ok(None);
        }
        let mut pos = start;
        let (content_end, terminator, next_cursor) = loop {
            if pos >= self.file_len {
                break (self.file_len, LineTerminator::None, self.file_len);
            } else if self.is_cr(pos)? {
                if self.is_lf(pos + cs)? {
                    break (pos, LineTerminator::Crlf, pos + 2 * cs);
                } else {
                    break (pos, LineTerminator::Cr, pos + cs);
                }
            } else if self.is_lf(pos)? {
                break (pos, LineTerminator::Lf, pos + cs);
            }
            pos += cs;
        };

        let text = self.decode_range(start, content_end)?;
        self.current_line_byte_offset_start = start;
        self.current_line_byte_offset_end = next_cursor.saturating_sub(1).max(start);
        self.current_line_terminator = terminator;
        self.line_number += 1;
        self.cursor = next_cursor;
        Ok(Some(text))
    }

    fn read_line_backward_impl(&mut self) -> Result<Option<String>, TextReaderError> {
        let cs = self.char_size();
        let end_bound = self.cursor;
        if end_bound <= self.bom_len {
            return Ok(None);
        }

        // Determine this line's terminator from the unit(s) immediately
        // before end_bound, then walk further back to find the start of
        // the line's content (just after the previous terminator, or
        // file start).
        let (mut terminator, mut content_end) = (LineTerminator::None, end_bound);
        if end_bound >= self.bom_len + cs {
            let one_before = end_bound - cs;
            if self.is_lf(one_before)? {
                if end_bound >= self.bom_len + 2 * cs && self.is_cr(end_bound - 2 * cs)? {
                    terminator = LineTerminator::Crlf;
                    content_end = end_bound - 2 * cs;
                } else {
                    terminator = LineTerminator::Lf;
                    content_end = end_bound - cs;
                }
            } else if self.is_cr(one_before)? {
                terminator = LineTerminator::Cr;
                content_end = end_bound - cs;
            }
        }

        let mut pos = content_end;
        while pos > self.bom_len {
            let prev = pos - cs;
            if self.is_lf(prev)? || self.is_cr(prev)? {
                break;
            }
            pos = prev;
        }
        let content_start = pos;

        let text = self.decode_range(content_start, content_end)?;
        let term_len = terminator.byte_len(cs);
        self.current_line_byte_offset_start = content_start;
        self.current_line_byte_offset_end = if term_len > 0 {
            content_end + term_len - 1
        } else {
            content_end.saturating_sub(1).max(content_start)
        };
        self.current_line_terminator = terminator;
        self.line_number -= 1;
        self.cursor = content_start;
        Ok(Some(text))
    }

    /// Expose this reader's detected byte-order-mark length, so that
    /// callers operating directly on the raw bytes (like the indexed XML
    /// accessor) can skip it the same way.
    pub fn bom_len(&self) -> u64 {
        self.bom_len
    }

    fn decode_range(&mut self, start: u64, end_excl: u64) -> Result<String, TextReaderError> {
        if end_excl <= start {
            return Ok(String::new());
        }
        let len = (end_excl - start) as usize;
        let mut buf = vec![0u8; len];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.byte_at(start + i as u64)?.unwrap_or(0);
        }
        Ok(self.encoding.decode(&buf))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &[u8]) -> BinaryTextReader<Cursor<Vec<u8>>> {
        BinaryTextReader::new(Cursor::new(text.to_vec())).unwrap()
    }

    #[test]
    fn test_encoding_detection() {
        assert_eq!(reader_for(b"plain ascii").encoding(), TextEncoding::Ascii);
        assert_eq!(
            reader_for(&[0xEF, 0xBB, 0xBF, b'h', b'i']).encoding(),
            TextEncoding::Utf8
        );
        assert_eq!(
            reader_for(&[0xFF, 0xFE, b'h', 0, b'i', 0]).encoding(),
            TextEncoding::Utf16Le
        );
        assert_eq!(
            reader_for(&[0xFE, 0xFF, 0, b'h', 0, b'i']).encoding(),
            TextEncoding::Utf16Be
        );
    }

    #[test]
    fn test_forward_read_lf_lines() {
        let mut r = reader_for(b"alpha\nbeta\ngamma");
        assert_eq!(r.read_line().unwrap().as_deref(), Some("alpha"));
        assert_eq!(r.current_line_byte_offset_start, 0);
        assert_eq!(r.current_line_byte_offset_end, 5);
        assert_eq!(r.line_number, 1);

        assert_eq!(r.read_line().unwrap().as_deref(), Some("beta"));
        assert_eq!(r.line_number, 2);

        assert_eq!(r.read_line().unwrap().as_deref(), Some("gamma"));
        assert_eq!(r.line_number, 3);
        assert_eq!(r.current_line_terminator, LineTerminator::None);

        assert_eq!(r.read_line().unwrap(), None);
    }

    #[test]
    fn test_mixed_terminators() {
        let mut r = reader_for(b"one\r\ntwo\rthree\nfour");
        assert_eq!(r.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(r.current_line_terminator, LineTerminator::Crlf);
        assert_eq!(r.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(r.current_line_terminator, LineTerminator::Cr);
        assert_eq!(r.read_line().unwrap().as_deref(), Some("three"));
        assert_eq!(r.current_line_terminator, LineTerminator::Lf);
        assert_eq!(r.read_line().unwrap().as_deref(), Some("four"));
        assert_eq!(r.current_line_terminator, LineTerminator::None);
    }

    #[test]
    fn test_line_offset_integrity() {
        let data = b"alpha\nbeta\r\ngamma\rdelta".to_vec();
        let file_size = data.len() as u64;
        let mut r = reader_for(&data);
        let mut total = 0u64;
        let mut reconstructed = Vec::new();
        while let Some(line) = r.read_line().unwrap() {
            let covered = r.current_line_byte_offset_end - r.current_line_byte_offset_start + 1;
            total += covered;
            reconstructed.extend_from_slice(line.as_bytes());
            match r.current_line_terminator {
                LineTerminator::Crlf => reconstructed.extend_from_slice(b"\r\n"),
                LineTerminator::Cr => reconstructed.push(b'\r'),
                LineTerminator::Lf => reconstructed.push(b'\n'),
                LineTerminator::None => {}
            }
        }
        assert_eq!(total, file_size);
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn test_direction_reversibility() {
        let mut r = reader_for(b"alpha\nbeta\ngamma\ndelta");
        r.read_line().unwrap(); // alpha, line 1
        r.read_line().unwrap(); // beta, line 2
        let third = r.read_line().unwrap(); // gamma, line 3
        assert_eq!(third.as_deref(), Some("gamma"));
        assert_eq!(r.line_number, 3);

        r.set_direction(Direction::Backward);
        let back = r.read_line_backward().unwrap();
        assert_eq!(back.as_deref(), Some("beta"));
        assert_eq!(r.line_number, 2);

        r.set_direction(Direction::Forward);
        let fwd_again = r.read_line().unwrap();
        assert_eq!(fwd_again.as_deref(), Some("gamma"));
        assert_eq!(r.line_number, 3);
    }

    #[test]
    fn test_move_to_byte_offset_aligns_to_next_line() {
        let mut r = reader_for(b"alpha\nbeta\ngamma\n");
        // Offset 7 is inside "beta" (starts at 6); the next full line
        // starts at "gamma" (byte 11).
        r.move_to_byte_offset(7).unwrap();
        let line = r.read_line().unwrap();
        assert_eq!(line.as_deref(), Some("gamma"));
    }

    #[test]
    fn test_utf16_le_round_trip() {
        let mut bytes = vec![0xFF, 0xFE];
        for ch in "hi\nbye".encode_utf16() {
            bytes.extend(ch.to_le_bytes());
        }
        let mut r = reader_for(&bytes);
        assert_eq!(r.read_line().unwrap().as_deref(), Some("hi"));
        assert_eq!(r.read_line().unwrap().as_deref(), Some("bye"));
    }
}
