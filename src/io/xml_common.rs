//! Shared SAX-style plumbing for the mzXML and mzData sequential parsers
//! (C5): a parent-element stack, attribute decoding, and the
//! `skip_next_reader_advance` bookkeeping described in spec.md §4.3.

use std::collections::HashMap;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::XmlParseError;

/// A strongly typed parent-element stack: `(name, depth)` pairs, as
/// spec.md §9 calls for in place of the original's `object`-typed stack.
#[derive(Debug, Default)]
pub struct ParentStack {
    frames: Vec<(String, usize)>,
}

impl ParentStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// On a start element: if the top of the stack is already at this
    /// depth, pop it first (compensates for pull readers that collapse
    /// self-closing elements into a single event), then push.
    pub fn push(&mut self, name: &str, depth: usize) {
        if let Some(&(_, top_depth)) = self.frames.last() {
            if top_depth == depth {
                self.frames.pop();
            }
        }
        self.frames.push((name.to_string(), depth));
    }

    /// On an end element: pop frames at or below the closing depth.
    pub fn pop_to(&mut self, depth: usize) {
        while let Some(&(_, top_depth)) = self.frames.last() {
            if top_depth >= depth {
                self.frames.pop();
            } else {
                break;
            }
        }
    }

    pub fn top(&self) -> Option<(&str, usize)> {
        self.frames.last().map(|(n, d)| (n.as_str(), *d))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.frames.iter().any(|(n, _)| n == name)
    }
}

/// Decode a start element's attributes into a plain map; unescaping
/// failures degrade to the raw bytes rather than aborting the parse,
/// matching spec.md's "errors are isolated per-spectrum" policy.
pub fn attributes(start: &BytesStart) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        map.insert(key, value);
    }
    map
}

pub fn local_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Flags letting a subclass pre-consume an element (e.g. to peek at a
/// nested child) while still having the reader re-observe it as the
/// next iteration's event, per spec.md §4.3.
#[derive(Debug, Default)]
pub struct AdvanceControl {
    pub skip_next_reader_advance: bool,
    pub skipped_start_element_advance: bool,
}

/// Position context for error reporting: quick-xml exposes a byte
/// offset, not line/column, so callers that want precise coordinates
/// recompute them from the offset and the original text on demand.
pub fn line_column_at(text: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in text.char_indices() {
        if i >= byte_offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Read the next meaningful event from `reader`, normalizing
/// `Event::Empty` into a synthetic start+end pair is left to callers
/// since they need to interleave the depth bookkeeping; this just wraps
/// quick-xml's error type into ours with position context.
///
/// Streaming parsers reading from an arbitrary `BufRead` don't retain the
/// source as one contiguous string, so they pass `None` and get back the
/// raw byte offset as the column with `line` left at 0. Parsers reading a
/// document already held fully in memory (the indexed XML accessor's
/// one-shot re-parse) pass `Some(source_text)` and get a real line/column.
pub fn next_event<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    source_text: Option<&str>,
) -> Result<Event<'static>, XmlParseError> {
    reader
        .read_event_into(buf)
        .map(|ev| ev.into_owned())
        .map_err(|e| {
            let offset = reader.buffer_position() as usize;
            let (line, column) = match source_text {
                Some(text) => line_column_at(text, offset),
                None => (0, offset),
            };
            XmlParseError::MalformedXml {
                line,
                column,
                message: e.to_string(),
            }
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parent_stack_collapses_same_depth() {
        let mut stack = ParentStack::new();
        stack.push("msRun", 0);
        stack.push("scan", 1);
        // A self-closing <peaks/> at depth 2 then a sibling <scan> also
        // at depth 1 should replace, not nest under, the first scan.
        stack.push("peaks", 2);
        stack.pop_to(2);
        stack.push("scan", 1);
        assert_eq!(stack.top(), Some(("scan", 1)));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_nested_scans_tracked_by_depth() {
        let mut stack = ParentStack::new();
        stack.push("msRun", 0);
        stack.push("scan", 1);
        stack.push("scan", 2);
        assert!(stack.contains("scan"));
        assert_eq!(stack.depth(), 3);
        stack.pop_to(2);
        assert_eq!(stack.top(), Some(("scan", 1)));
    }

    #[test]
    fn test_line_column_at() {
        let text = "abc\ndef\nghi";
        assert_eq!(line_column_at(text, 0), (1, 1));
        assert_eq!(line_column_at(text, 4), (2, 1));
        assert_eq!(line_column_at(text, 9), (3, 2));
    }
}
