//! Sorted in-memory table.
//!
//! Physical keys are kept in byte order so that range scans walk them
//! in the order the layers above rely on.

use crate::record::{BatchOp, Entry};
use crate::store::RangeQuery;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Default)]
pub struct Memtable {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Apply every op of a batch in order.
    pub fn apply(&mut self, ops: &[BatchOp]) {
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.data.insert(key.clone(), value.clone());
                }
                BatchOp::Del { key } => {
                    self.data.remove(key);
                }
            }
        }
    }

    /// Collect the entries selected by `query`.
    pub fn scan(&self, query: &RangeQuery) -> Vec<Entry> {
        let (lower, upper) = query.effective_bounds();
        if let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi)) = (&lower, &upper)
        {
            if lo >= hi {
                return Vec::new();
            }
        }

        let range = self.data.range::<[u8], _>((
            lower.as_ref().map(Vec::as_slice),
            upper.as_ref().map(Vec::as_slice),
        ));
        let limit = query.limit.unwrap_or(usize::MAX);
        let to_entry = |(k, v): (&Vec<u8>, &Vec<u8>)| Entry::new(k.clone(), v.clone());

        if query.reverse {
            range.rev().take(limit).map(to_entry).collect()
        } else {
            range.take(limit).map(to_entry).collect()
        }
    }

    /// Number of physical entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(keys: &[&str]) -> Memtable {
        let mut mt = Memtable::new();
        let ops: Vec<BatchOp> = keys
            .iter()
            .map(|k| BatchOp::put(k.as_bytes(), k.as_bytes()))
            .collect();
        mt.apply(&ops);
        mt
    }

    fn keys(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8(e.key.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_apply_put_and_del() {
        let mut mt = table(&["a", "b"]);
        mt.apply(&[BatchOp::del(b"a".to_vec())]);
        assert_eq!(mt.len(), 1);
        assert!(mt.get(b"a").is_none());
        assert_eq!(mt.get(b"b"), Some(&b"b"[..]));
    }

    #[test]
    fn test_scan_full_is_sorted() {
        let mt = table(&["c", "a", "b"]);
        let entries = mt.scan(&RangeQuery::all());
        assert_eq!(keys(&entries), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_scan_range_end_exclusive() {
        let mt = table(&["a", "b", "c", "d"]);
        let q = RangeQuery::all().start(b"b".to_vec()).end(b"d".to_vec());
        assert_eq!(keys(&mt.scan(&q)), vec!["b", "c"]);
    }

    #[test]
    fn test_scan_reverse_same_bounds() {
        let mt = table(&["a", "b", "c", "d"]);
        let q = RangeQuery::all()
            .start(b"b".to_vec())
            .end(b"d".to_vec())
            .reverse(true);
        assert_eq!(keys(&mt.scan(&q)), vec!["c", "b"]);
    }

    #[test]
    fn test_scan_after_and_limit_page_forward() {
        let mt = table(&["a", "b", "c", "d", "e"]);
        let q = RangeQuery::all().after(b"b".to_vec()).limit(2);
        assert_eq!(keys(&mt.scan(&q)), vec!["c", "d"]);
    }

    #[test]
    fn test_scan_after_and_limit_page_reverse() {
        let mt = table(&["a", "b", "c", "d", "e"]);
        let q = RangeQuery::all().reverse(true).after(b"d".to_vec()).limit(2);
        assert_eq!(keys(&mt.scan(&q)), vec!["c", "b"]);
    }

    #[test]
    fn test_scan_empty_range() {
        let mt = table(&["a", "b"]);
        let q = RangeQuery::all().start(b"b".to_vec()).end(b"a".to_vec());
        assert!(mt.scan(&q).is_empty());
    }
}
