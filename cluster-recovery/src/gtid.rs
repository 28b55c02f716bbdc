use std::collections::BTreeMap;

use cluster_errors::{ClusterError, ClusterResult};

/// A parsed MySQL GTID set: `source_uuid -> sorted, non-overlapping
/// inclusive transaction-id ranges`. Mirrors the textual
/// `uuid:1-5:8-10,uuid2:1-3` format produced by `GTID_EXECUTED`/
/// `GTID_PURGED`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet {
    ranges: BTreeMap<String, Vec<(u64, u64)>>,
}

impl GtidSet {
    pub fn empty() -> Self {
        GtidSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(|r| r.is_empty())
    }

    /// Parses a GTID set string as emitted by `@@GLOBAL.GTID_EXECUTED`.
    pub fn parse(raw: &str) -> ClusterResult<Self> {
        let mut ranges: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(GtidSet::empty());
        }

        for source in raw.split(',') {
            let source = source.trim();
            if source.is_empty() {
                continue;
            }
            let mut parts = source.split(':');
            let uuid = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ClusterError::BadArg(format!("invalid GTID set '{raw}'")))?;

            let mut intervals = Vec::new();
            for span in parts {
                let (start, end) = match span.split_once('-') {
                    Some((a, b)) => (
                        a.parse::<u64>()
                            .map_err(|_| ClusterError::BadArg(format!("invalid GTID range '{span}'")))?,
                        b.parse::<u64>()
                            .map_err(|_| ClusterError::BadArg(format!("invalid GTID range '{span}'")))?,
                    ),
                    None => {
                        let n = span
                            .parse::<u64>()
                            .map_err(|_| ClusterError::BadArg(format!("invalid GTID range '{span}'")))?;
                        (n, n)
                    }
                };
                intervals.push((start, end));
            }
            intervals.sort_unstable();
            ranges.entry(uuid.to_string()).or_default().extend(merge(intervals));
        }

        Ok(GtidSet { ranges })
    }

    fn contains(&self, uuid: &str, txid: u64) -> bool {
        self.ranges
            .get(uuid)
            .map(|intervals| intervals.iter().any(|(s, e)| *s <= txid && txid <= *e))
            .unwrap_or(false)
    }

    /// Whether every transaction in `self` is also present in `other`.
    pub fn is_subset_of(&self, other: &GtidSet) -> bool {
        self.minus(other).is_empty()
    }

    /// The transactions present in `self` but not in `other`, computed by
    /// interval subtraction rather than a per-transaction scan (GTID ranges
    /// on a long-lived cluster can span hundreds of millions of ids).
    pub fn minus(&self, other: &GtidSet) -> GtidSet {
        let empty = Vec::new();
        let mut ranges = BTreeMap::new();
        for (uuid, intervals) in &self.ranges {
            let subtracted = other.ranges.get(uuid).unwrap_or(&empty);
            let remaining = subtract_intervals(intervals, subtracted);
            if !remaining.is_empty() {
                ranges.insert(uuid.clone(), remaining);
            }
        }
        GtidSet { ranges }
    }

    /// Whether any transaction in `self` overlaps a transaction in `other`,
    /// via a merge-style sweep over each uuid's sorted, non-overlapping
    /// ranges rather than a per-transaction scan.
    pub fn intersects(&self, other: &GtidSet) -> bool {
        for (uuid, intervals) in &self.ranges {
            let Some(other_intervals) = other.ranges.get(uuid) else { continue };
            if intervals_overlap(intervals, other_intervals) {
                return true;
            }
        }
        false
    }
}

/// `a - b` over sorted, non-overlapping, inclusive `(start, end)` ranges.
fn subtract_intervals(a: &[(u64, u64)], b: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut result = Vec::new();
    let mut bi = 0;
    for &(mut start, end) in a {
        while bi < b.len() && b[bi].1 < start {
            bi += 1;
        }
        let mut cut = bi;
        while start <= end {
            match b.get(cut) {
                Some(&(bs, be)) if bs <= end => {
                    if bs > start {
                        result.push((start, bs - 1));
                    }
                    start = be.saturating_add(1);
                    if be == u64::MAX {
                        break;
                    }
                    cut += 1;
                }
                _ => {
                    result.push((start, end));
                    break;
                }
            }
        }
    }
    result
}

/// Whether sorted, non-overlapping inclusive ranges `a` and `b` share any
/// point, via a two-pointer sweep.
fn intervals_overlap(a: &[(u64, u64)], b: &[(u64, u64)]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (a_start, a_end) = a[i];
        let (b_start, b_end) = b[j];
        if a_start <= b_end && b_start <= a_end {
            return true;
        }
        if a_end < b_end {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

fn merge(mut intervals: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    intervals.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::new();
    for (start, end) in intervals {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 + 1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

/// Target-vs-donor relationship (spec §4.4 step 1), grounded on the
/// `Replica_gtid_state` classification used by `rejoin_replica_instance.cc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaGtidState {
    Identical,
    Recoverable,
    Irrecoverable,
    Diverged,
}

/// Classifies `target` relative to `donor_executed`/`donor_purged` GTID
/// sets (spec §4.4 step 1).
pub fn compare_gtid_sets(target: &GtidSet, donor_executed: &GtidSet, donor_purged: &GtidSet) -> ReplicaGtidState {
    let errant = target.minus(donor_executed).minus(donor_purged);
    if !errant.is_empty() {
        return ReplicaGtidState::Diverged;
    }

    if target == donor_executed {
        return ReplicaGtidState::Identical;
    }

    let missing = donor_executed.minus(target);
    if missing.intersects(donor_purged) {
        ReplicaGtidState::Irrecoverable
    } else {
        ReplicaGtidState::Recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sets_match() {
        let a = GtidSet::parse("uuid1:1-10").unwrap();
        let b = GtidSet::parse("uuid1:1-10").unwrap();
        assert_eq!(compare_gtid_sets(&a, &b, &GtidSet::empty()), ReplicaGtidState::Identical);
    }

    #[test]
    fn subset_target_is_recoverable() {
        let target = GtidSet::parse("uuid1:1-5").unwrap();
        let donor = GtidSet::parse("uuid1:1-10").unwrap();
        assert_eq!(compare_gtid_sets(&target, &donor, &GtidSet::empty()), ReplicaGtidState::Recoverable);
    }

    #[test]
    fn purged_gap_is_irrecoverable() {
        let target = GtidSet::parse("uuid1:1-5").unwrap();
        let donor = GtidSet::parse("uuid1:1-10").unwrap();
        let purged = GtidSet::parse("uuid1:1-6").unwrap();
        assert_eq!(compare_gtid_sets(&target, &donor, &purged), ReplicaGtidState::Irrecoverable);
    }

    #[test]
    fn errant_transaction_is_diverged() {
        let target = GtidSet::parse("uuid1:1-5,uuid2:1-1").unwrap();
        let donor = GtidSet::parse("uuid1:1-10").unwrap();
        assert_eq!(compare_gtid_sets(&target, &donor, &GtidSet::empty()), ReplicaGtidState::Diverged);
    }

    #[test]
    fn parses_multi_range_sets() {
        let set = GtidSet::parse("uuid1:1-5:8-10").unwrap();
        assert!(!set.is_empty());
        let other = GtidSet::parse("uuid1:1-10").unwrap();
        assert!(set.is_subset_of(&other));
    }
}
