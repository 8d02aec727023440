//! The ordered-store contract the causal layer is written against.

use crate::engine::StorageError;
use crate::record::{BatchOp, Entry};
use std::ops::Bound;

/// A byte-range scan over the ordered keyspace.
///
/// `start` is inclusive and `end` exclusive regardless of direction.
/// `after` resumes a paged scan strictly past the last key already seen
/// (strictly below it when `reverse` is set).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    pub reverse: bool,
    pub after: Option<Vec<u8>>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    /// The whole keyspace, ascending.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn start(mut self, start: Vec<u8>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: Vec<u8>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn after(mut self, after: Vec<u8>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resolve `start`/`end`/`after` into a single pair of bounds.
    /// The upper bound is never `Included`.
    pub fn effective_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let mut lower = match &self.start {
            Some(s) => Bound::Included(s.clone()),
            None => Bound::Unbounded,
        };
        let mut upper = match &self.end {
            Some(e) => Bound::Excluded(e.clone()),
            None => Bound::Unbounded,
        };

        if let Some(after) = &self.after {
            if self.reverse {
                let tighter = match &upper {
                    Bound::Excluded(e) => after < e,
                    _ => true,
                };
                if tighter {
                    upper = Bound::Excluded(after.clone());
                }
            } else {
                let tighter = match &lower {
                    Bound::Included(s) => after >= s,
                    _ => true,
                };
                if tighter {
                    lower = Bound::Excluded(after.clone());
                }
            }
        }

        (lower, upper)
    }
}

/// An ordered key-value store with atomic batches.
///
/// Implementations must return scan results in byte-lexicographic key order
/// (reversed when asked) and must apply a batch all-or-nothing.
pub trait OrderedStore: Send + Sync + 'static {
    /// Read the entries selected by `query`.
    fn scan(&self, query: &RangeQuery) -> Result<Vec<Entry>, StorageError>;

    /// Apply `ops` atomically.
    fn write_batch(&mut self, ops: Vec<BatchOp>) -> Result<(), StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;

    fn is_open(&self) -> bool;

    fn is_closed(&self) -> bool {
        !self.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_after_overrides_start() {
        let q = RangeQuery::all().start(b"b".to_vec()).after(b"c".to_vec());
        assert_eq!(q.effective_bounds().0, Bound::Excluded(b"c".to_vec()));
    }

    #[test]
    fn test_forward_after_before_start_is_ignored() {
        let q = RangeQuery::all().start(b"m".to_vec()).after(b"a".to_vec());
        assert_eq!(q.effective_bounds().0, Bound::Included(b"m".to_vec()));
    }

    #[test]
    fn test_reverse_after_tightens_end() {
        let q = RangeQuery::all()
            .end(b"z".to_vec())
            .reverse(true)
            .after(b"k".to_vec());
        let (lower, upper) = q.effective_bounds();
        assert_eq!(lower, Bound::Unbounded);
        assert_eq!(upper, Bound::Excluded(b"k".to_vec()));
    }
}
