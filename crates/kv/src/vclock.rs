//! Vector clock implementation for causal versioning.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A vector clock: maps node identifiers to monotonic counters.
///
/// Entries are kept sorted so that serialization and the tie-break order
/// are deterministic. Clocks are values: every operation returns a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VClock {
    entries: BTreeMap<String, u64>,
}

impl VClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a raw map.
    pub fn from_map(entries: BTreeMap<String, u64>) -> Self {
        Self { entries }
    }

    /// Get the counter for a node (0 if not present).
    pub fn get(&self, node: &str) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Increment the counter for a node and return the new clock.
    pub fn increment(&self, node: &str) -> Self {
        let mut new = self.clone();
        let counter = new.entries.entry(node.to_string()).or_insert(0);
        *counter += 1;
        new
    }

    /// Merge two vector clocks (element-wise max).
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.entries.clone();
        for (k, &v) in &other.entries {
            let entry = merged.entry(k.clone()).or_insert(0);
            *entry = (*entry).max(v);
        }
        Self { entries: merged }
    }

    /// Compare two vector clocks under the componentwise partial order.
    pub fn compare(&self, other: &Self) -> VClockOrder {
        let mut self_gte = true;
        let mut other_gte = true;

        for (k, &sv) in &self.entries {
            let ov = other.get(k);
            if sv < ov {
                self_gte = false;
            }
            if ov < sv {
                other_gte = false;
            }
        }
        for (k, &ov) in &other.entries {
            if !self.entries.contains_key(k) && ov > 0 {
                self_gte = false;
            }
        }

        match (self_gte, other_gte) {
            (true, true) => VClockOrder::Equal,
            (true, false) => VClockOrder::Dominates,
            (false, true) => VClockOrder::DominatedBy,
            (false, false) => VClockOrder::Concurrent,
        }
    }

    /// Dominates: self >= other on all entries, > on at least one.
    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == VClockOrder::Dominates
    }

    /// Are these clocks concurrent (neither dominates)?
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == VClockOrder::Concurrent
    }

    /// Same causal history: equal counters for every node in either clock,
    /// missing entries counting as 0.
    pub fn is_identical(&self, other: &Self) -> bool {
        self.compare(other) == VClockOrder::Equal
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    /// Total order used to pick a traversal order for read repair:
    /// larger counter sums first, then `(node, counter)` pairs compared
    /// lexicographically. Carries no causal meaning.
    pub fn descending_cmp(&self, other: &Self) -> Ordering {
        other
            .total()
            .cmp(&self.total())
            .then_with(|| self.entries.iter().cmp(other.entries.iter()))
    }

    /// Return the raw entries.
    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.entries
    }

    /// Convert to raw map.
    pub fn into_map(self) -> BTreeMap<String, u64> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum VClockOrder {
    Equal,
    Dominates,
    DominatedBy,
    Concurrent,
}

/// The causal context a writer supplies with a put: nothing, the clock of
/// the single version it read, or the clocks of every sibling it is
/// resolving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentContext {
    #[default]
    None,
    Single(VClock),
    Many(Vec<VClock>),
}

impl ParentContext {
    /// Fold the context into one clock via `merge`.
    pub fn resolve(self) -> VClock {
        match self {
            Self::None => VClock::new(),
            Self::Single(clock) => clock,
            Self::Many(clocks) => clocks
                .iter()
                .fold(VClock::new(), |acc, clock| acc.merge(clock)),
        }
    }
}

impl From<VClock> for ParentContext {
    fn from(clock: VClock) -> Self {
        Self::Single(clock)
    }
}

impl From<Option<VClock>> for ParentContext {
    fn from(clock: Option<VClock>) -> Self {
        clock.map_or(Self::None, Self::Single)
    }
}

impl From<Vec<VClock>> for ParentContext {
    fn from(clocks: Vec<VClock>) -> Self {
        Self::Many(clocks)
    }
}
