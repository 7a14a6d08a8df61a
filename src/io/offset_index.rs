//! Index storage for the indexed XML accessor (C6).
//!
//! Grounded on the teacher's `io/offset_index.rs` `OffsetIndex`, but with
//! explicit first-write-wins semantics on duplicate keys: spec.md
//! requires that every entry survive in the backing vector while only
//! the *first* one for a given scan number is reachable by key lookup.

use indexmap::IndexMap;

/// One entry in the index: a scan's identity and its byte range in the
/// source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub scan_number: i64,
    pub spectrum_id: i64,
    pub byte_offset_start: u64,
    pub byte_offset_end: u64,
}

/// An insertion-ordered list of [`IndexEntry`] plus a `scan_number ->
/// list index` lookup map with first-write-wins semantics on collision.
#[derive(Debug, Clone, Default)]
pub struct ScanIndex {
    entries: Vec<IndexEntry>,
    by_scan_number: IndexMap<i64, usize>,
}

const INITIAL_CAPACITY: usize = 1000;

impl ScanIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            by_scan_number: IndexMap::new(),
        }
    }

    /// Record a new entry. If `scan_number` is already present, this
    /// entry is still appended to the backing vector (reachable by
    /// ordinal index) but the map keeps pointing at the first one.
    pub fn store(&mut self, scan_number: i64, spectrum_id: i64, start: u64, end: u64) {
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve(self.entries.capacity().max(1));
        }
        let position = self.entries.len();
        self.entries.push(IndexEntry {
            scan_number,
            spectrum_id,
            byte_offset_start: start,
            byte_offset_end: end,
        });
        self.by_scan_number.entry(scan_number).or_insert(position);
    }

    /// Update the end offset of the most recently stored entry, called
    /// once the matching end tag has been located.
    pub fn set_last_end_offset(&mut self, end: u64) {
        if let Some(entry) = self.entries.last_mut() {
            entry.byte_offset_end = end;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_by_scan_number(&self, scan_number: i64) -> Option<&IndexEntry> {
        self.by_scan_number
            .get(&scan_number)
            .and_then(|&idx| self.entries.get(idx))
    }

    pub fn get_by_index(&self, index: usize) -> Option<&IndexEntry> {
        self.entries.get(index)
    }

    pub fn scan_numbers(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|e| e.scan_number)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_scan_number.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_first_write_wins_on_collision() {
        let mut idx = ScanIndex::new();
        idx.store(5, 5, 10, 20);
        idx.store(5, 5, 30, 40);

        assert_eq!(idx.len(), 2);
        let found = idx.get_by_scan_number(5).unwrap();
        assert_eq!(found.byte_offset_start, 10);

        let second = idx.get_by_index(1).unwrap();
        assert_eq!(second.byte_offset_start, 30);
    }

    #[test]
    fn test_ordinal_access_matches_insertion_order() {
        let mut idx = ScanIndex::new();
        idx.store(1, 1, 0, 10);
        idx.store(2, 2, 11, 20);
        idx.store(3, 3, 21, 30);

        let scans: Vec<i64> = idx.scan_numbers().collect();
        assert_eq!(scans, vec![1, 2, 3]);
        assert_eq!(idx.get_by_index(2).unwrap().scan_number, 3);
    }

    #[test]
    fn test_set_last_end_offset() {
        let mut idx = ScanIndex::new();
        idx.store(1, 1, 0, 0);
        idx.set_last_end_offset(99);
        assert_eq!(idx.get_by_index(0).unwrap().byte_offset_end, 99);
    }
}
