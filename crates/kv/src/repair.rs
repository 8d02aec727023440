//! Read repair: classify the candidate versions of one key.
//!
//! Candidates are visited in `VClock::descending_cmp` order. Each one is
//! compared with the most recently kept version only: it is kept when the
//! two are concurrent and not identical, and discarded otherwise. The first
//! candidate is always kept.

use crate::version::StoredVersion;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Causally maximal, mutually concurrent versions, in the order kept.
    pub repaired: Vec<StoredVersion>,
    /// Dominated or duplicate versions.
    pub discarded: Vec<StoredVersion>,
}

pub fn read_repair(mut candidates: Vec<StoredVersion>) -> RepairOutcome {
    let mut outcome = RepairOutcome::default();
    if candidates.is_empty() {
        return outcome;
    }

    // Stable sort: equal clocks keep their physical order.
    candidates.sort_by(|a, b| a.clock().descending_cmp(b.clock()));

    for candidate in candidates {
        match outcome.repaired.last() {
            None => outcome.repaired.push(candidate),
            Some(last) => {
                if candidate.clock().is_concurrent(last.clock())
                    && !candidate.clock().is_identical(last.clock())
                {
                    outcome.repaired.push(candidate);
                } else {
                    outcome.discarded.push(candidate);
                }
            }
        }
    }

    if !outcome.discarded.is_empty() {
        tracing::debug!(
            "read repair kept {} and discarded {} version(s)",
            outcome.repaired.len(),
            outcome.discarded.len()
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vclock::VClock;
    use crate::version::VersionedRecord;

    fn sv(disc: &str, value: &str, entries: &[(&str, u64)]) -> StoredVersion {
        StoredVersion {
            discriminator: disc.to_string(),
            record: VersionedRecord {
                key: "k".to_string(),
                value: value.as_bytes().to_vec(),
                clock: VClock::from_map(
                    entries.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
                ),
            },
        }
    }

    fn values(versions: &[StoredVersion]) -> Vec<&str> {
        versions
            .iter()
            .map(|v| std::str::from_utf8(&v.record.value).unwrap())
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let outcome = read_repair(Vec::new());
        assert!(outcome.repaired.is_empty());
        assert!(outcome.discarded.is_empty());
    }

    #[test]
    fn test_single_version_kept() {
        let outcome = read_repair(vec![sv("a", "v1", &[("n1", 1)])]);
        assert_eq!(values(&outcome.repaired), vec!["v1"]);
        assert!(outcome.discarded.is_empty());
    }

    #[test]
    fn test_dominated_discarded_regardless_of_order() {
        let old = sv("a", "old", &[("n1", 1)]);
        let new = sv("b", "new", &[("n1", 2)]);

        for input in [vec![old.clone(), new.clone()], vec![new, old]] {
            let outcome = read_repair(input);
            assert_eq!(values(&outcome.repaired), vec!["new"]);
            assert_eq!(values(&outcome.discarded), vec!["old"]);
        }
    }

    #[test]
    fn test_concurrent_siblings_kept() {
        let outcome = read_repair(vec![
            sv("a", "left", &[("n1", 2), ("n2", 1)]),
            sv("b", "right", &[("n1", 1), ("n2", 2)]),
        ]);
        assert_eq!(outcome.repaired.len(), 2);
        assert!(outcome.discarded.is_empty());
    }

    #[test]
    fn test_identical_clocks_deduplicated_first_wins() {
        let outcome = read_repair(vec![
            sv("a", "first", &[("n1", 1)]),
            sv("b", "second", &[("n1", 1)]),
        ]);
        assert_eq!(values(&outcome.repaired), vec!["first"]);
        assert_eq!(values(&outcome.discarded), vec!["second"]);
    }

    #[test]
    fn test_stale_and_siblings_mixed() {
        let outcome = read_repair(vec![
            sv("a", "old", &[("a", 1)]),
            sv("b", "branch1", &[("a", 2), ("b", 1)]),
            sv("c", "branch2", &[("a", 1), ("b", 2)]),
        ]);
        assert_eq!(outcome.repaired.len(), 2);
        assert_eq!(values(&outcome.discarded), vec!["old"]);
    }

    #[test]
    fn test_compares_against_last_kept_only() {
        // x dominates z; y is concurrent with both. Visiting x, y, z keeps z
        // because it is only compared with y.
        let outcome = read_repair(vec![
            sv("x", "x", &[("a", 3), ("b", 1)]),
            sv("y", "y", &[("b", 3)]),
            sv("z", "z", &[("a", 2)]),
        ]);
        assert_eq!(values(&outcome.repaired), vec!["x", "y", "z"]);
        assert!(outcome.discarded.is_empty());
    }
}
