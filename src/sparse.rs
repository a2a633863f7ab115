// Copyright 2026. The capmap developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::collections::BTreeMap;

use crate::range::Range;

/// Zero or more non-empty, non-overlapping, non-adjacent ranges, sorted by
/// address.
///
/// Combining or removing ranges automatically merges or splits parts as
/// required. This is used for set-like operations on address spaces, for
/// example to decide what is left to scan.
///
/// Parts are stored keyed by their *last* address. Because parts are
/// disjoint and non-adjacent, ordering by `last` equals ordering by `base`,
/// and a single ordered look-up finds the unique part that might overlap
/// or abut a query.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct SparseRange {
    /// `last -> base` for every part.
    parts: BTreeMap<u64, u64>,
}

impl SparseRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns `true` if the set is exactly one contiguous range.
    pub fn is_contiguous(&self) -> bool {
        self.parts.len() == 1
    }

    /// The number of disjoint parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// The parts, in ascending address order.
    pub fn parts(&self) -> impl Iterator<Item = Range> + '_ {
        self.parts
            .iter()
            .map(|(&last, &base)| Range::from_base_last(base, last))
    }

    /// Add `range` to the set, merging it with any parts it overlaps or
    /// abuts.
    pub fn combine(&mut self, mut range: Range) {
        if range.is_empty() {
            return;
        }

        // Only parts ending at or after `range.base - 1` can overlap or
        // abut `range`; they are contiguous in part order, so absorb them
        // in one forward walk. Absorbing can only grow `range` rightwards
        // past parts we are about to visit, or leftwards into the gap the
        // look-up already skipped.
        let from = range.base().saturating_sub(1);
        let mut absorbed = Vec::new();
        for (&last, &base) in self.parts.range(from..) {
            if !range.try_combine(Range::from_base_last(base, last)) {
                break;
            }
            absorbed.push(last);
        }

        for last in absorbed {
            self.parts.remove(&last);
        }
        self.parts.insert(range.last(), range.base());
    }

    /// Remove every address of `range` from the set, splitting parts that
    /// straddle its ends.
    pub fn remove(&mut self, range: Range) {
        if range.is_empty() || self.parts.is_empty() {
            return;
        }

        // Parts overlapping `range` end at or after its base and begin at
        // or before its last; they are contiguous in part order.
        let mut low = Range::empty();
        let mut high = Range::empty();
        let mut doomed = Vec::new();
        for (&last, &base) in self.parts.range(range.base()..) {
            if base > range.last() {
                break;
            }
            doomed.push(last);
            if base < range.base() {
                low = Range::from_base_last(base, range.base() - 1);
            }
            if last > range.last() {
                high = Range::from_base_last(range.last() + 1, last);
            }
        }

        for last in doomed {
            self.parts.remove(&last);
        }
        if !low.is_empty() {
            self.parts.insert(low.last(), low.base());
        }
        if !high.is_empty() {
            self.parts.insert(high.last(), high.base());
        }
    }

    /// Combine every part of `other` into the set.
    pub fn combine_sparse(&mut self, other: &SparseRange) {
        for part in other.parts() {
            self.combine(part);
        }
    }

    /// Remove every part of `other` from the set.
    pub fn remove_sparse(&mut self, other: &SparseRange) {
        for part in other.parts() {
            self.remove(part);
        }
    }

    /// Returns `true` if any part overlaps `range`.
    pub fn overlaps(&self, range: Range) -> bool {
        if range.is_empty() {
            return false;
        }
        // The only candidate is the first part ending at or after
        // `range.base`; every later part begins even further right.
        match self.parts.range(range.base()..).next() {
            Some((_, &base)) => base <= range.last(),
            None => false,
        }
    }

    /// Returns `true` if a single part includes all of `range`.
    pub fn includes(&self, range: Range) -> bool {
        if range.is_empty() {
            return false;
        }
        // If `range` is included it is by exactly one part, which must be
        // the first to end at or after `range.last`.
        match self.parts.range(range.last()..).next() {
            Some((_, &base)) => base <= range.base(),
            None => false,
        }
    }

    /// Returns `true` if `addr` is in the set.
    pub fn includes_addr(&self, addr: u64) -> bool {
        self.includes(Range::from_base_last(addr, addr))
    }

    /// Returns `true` if every part of `other` is included.
    pub fn includes_sparse(&self, other: &SparseRange) -> bool {
        other.parts().all(|part| self.includes(part))
    }
}

impl From<Range> for SparseRange {
    fn from(range: Range) -> Self {
        let mut sr = Self::new();
        sr.combine(range);
        sr
    }
}

impl fmt::Debug for SparseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.parts()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_of(sr: &SparseRange) -> Vec<Range> {
        sr.parts().collect()
    }

    /// Combine `n` into `{l, h}` and check the resulting part count.
    ///
    /// This is the geometry table for a new range landing before, between,
    /// and after two existing parts, at every contact class.
    fn combine_lh_expect(n: Range, expected_parts: usize) {
        let l = Range::from_base_last(100, 199);
        let h = Range::from_base_last(300, 399);
        let mut sr = SparseRange::new();
        sr.combine(l);
        sr.combine(h);

        sr.combine(n);
        assert!(sr.includes(l), "lost l combining {n:?}");
        assert!(sr.includes(h), "lost h combining {n:?}");
        assert!(sr.includes(n), "lost n combining {n:?}");
        assert_eq!(sr.part_count(), expected_parts, "combining {n:?}");
    }

    #[test]
    fn single_range() {
        for r in [
            Range::from_base_last(42, 420),
            Range::full_64bit(),
            Range::from_base_last(0, 0),
            Range::from_base_last(u64::MAX, u64::MAX),
        ] {
            let sr = SparseRange::from(r);
            assert!(sr.overlaps(r));
            assert!(sr.includes(r));
            assert!(sr.is_contiguous());
            assert_eq!(parts_of(&sr), vec![r]);
        }
    }

    #[test]
    fn empty_set() {
        let sr = SparseRange::new();
        assert!(!sr.overlaps(Range::from_base_last(0, 0)));
        assert!(!sr.includes(Range::from_base_last(0, 0)));
        assert!(sr.is_empty());
    }

    #[test]
    fn combine_empty_range() {
        let mut sr = SparseRange::new();
        sr.combine(Range::empty());
        assert!(sr.is_empty());

        let r = Range::from_base_last(42, 420);
        sr.combine(r);
        assert_eq!(sr, SparseRange::from(r));
        sr.combine(Range::empty());
        assert_eq!(sr, SparseRange::from(r));
    }

    #[test]
    fn combine_disjoint() {
        let a = Range::from_base_last(42, 420);
        let b = Range::from_base_last(4200, 42000);
        let mut sr = SparseRange::from(a);
        sr.combine(b);

        assert!(sr.includes(a));
        assert!(sr.includes(b));
        assert!(sr.overlaps(Range::from_base_last(420, 421)));
        assert!(sr.overlaps(Range::from_base_last(4199, 4200)));
        assert!(!sr.overlaps(Range::from_base_last(421, 4199)));
        assert!(!sr.includes(Range::from_base_last(420, 421)));
        assert!(!sr.includes(Range::from_base_last(4199, 4200)));
        assert_eq!(sr.part_count(), 2);
    }

    #[test]
    fn combine_overlapping_either_order() {
        let l = Range::from_base_last(10, 50);
        let h = Range::from_base_last(42, 420);

        let mut lh = SparseRange::from(l);
        lh.combine(h);
        let mut hl = SparseRange::from(h);
        hl.combine(l);

        for sr in [&lh, &hl] {
            assert!(sr.includes(l));
            assert!(sr.includes(h));
            assert!(sr.is_contiguous());
        }
        assert_eq!(lh, hl);
    }

    // New range entirely before both parts.
    #[test]
    fn combine_before_disjoint() {
        combine_lh_expect(Range::from_base_last(42, 98), 3);
    }

    #[test]
    fn combine_before_adjacent() {
        combine_lh_expect(Range::from_base_last(42, 99), 2);
    }

    #[test]
    fn combine_before_overlap() {
        combine_lh_expect(Range::from_base_last(42, 100), 2);
    }

    #[test]
    fn combine_before_extend() {
        combine_lh_expect(Range::from_base_last(42, 199), 2);
    }

    #[test]
    fn combine_before_replace() {
        combine_lh_expect(Range::from_base_last(42, 249), 2);
    }

    // New range in the gap between the parts.
    #[test]
    fn combine_between_disjoint() {
        combine_lh_expect(Range::from_base_last(201, 298), 3);
    }

    #[test]
    fn combine_between_adjacent_low() {
        combine_lh_expect(Range::from_base_last(200, 298), 2);
    }

    #[test]
    fn combine_between_overlap_low() {
        combine_lh_expect(Range::from_base_last(199, 298), 2);
    }

    #[test]
    fn combine_between_extend_low() {
        combine_lh_expect(Range::from_base_last(100, 298), 2);
    }

    #[test]
    fn combine_between_replace_low() {
        combine_lh_expect(Range::from_base_last(42, 298), 2);
    }

    #[test]
    fn combine_between_adjacent_high() {
        combine_lh_expect(Range::from_base_last(201, 299), 2);
    }

    #[test]
    fn combine_between_overlap_high() {
        combine_lh_expect(Range::from_base_last(201, 300), 2);
    }

    #[test]
    fn combine_between_extend_high() {
        combine_lh_expect(Range::from_base_last(201, 399), 2);
    }

    #[test]
    fn combine_between_replace_high() {
        combine_lh_expect(Range::from_base_last(201, 420), 2);
    }

    // New range bridging both parts.
    #[test]
    fn combine_fill_adjacent() {
        combine_lh_expect(Range::from_base_last(200, 299), 1);
    }

    #[test]
    fn combine_fill_overlap() {
        combine_lh_expect(Range::from_base_last(142, 342), 1);
    }

    #[test]
    fn combine_fill_exact() {
        combine_lh_expect(Range::from_base_last(100, 399), 1);
    }

    #[test]
    fn combine_fill_super() {
        combine_lh_expect(Range::from_base_last(42, 420), 1);
    }

    // New range after both parts.
    #[test]
    fn combine_after_disjoint() {
        combine_lh_expect(Range::from_base_last(401, 420), 3);
    }

    #[test]
    fn combine_after_adjacent() {
        combine_lh_expect(Range::from_base_last(400, 420), 2);
    }

    #[test]
    fn combine_after_overlap() {
        combine_lh_expect(Range::from_base_last(399, 420), 2);
    }

    #[test]
    fn combine_after_extend() {
        combine_lh_expect(Range::from_base_last(300, 420), 2);
    }

    #[test]
    fn combine_after_replace() {
        combine_lh_expect(Range::from_base_last(242, 420), 2);
    }

    #[test]
    fn remove_splits_straddled_part() {
        let mut sr = SparseRange::from(Range::from_base_last(100, 399));
        sr.remove(Range::from_base_last(200, 299));
        assert_eq!(
            parts_of(&sr),
            vec![
                Range::from_base_last(100, 199),
                Range::from_base_last(300, 399)
            ]
        );
    }

    #[test]
    fn remove_spanning_several_parts() {
        let mut sr = SparseRange::new();
        sr.combine(Range::from_base_last(0, 9));
        sr.combine(Range::from_base_last(20, 29));
        sr.combine(Range::from_base_last(40, 49));
        sr.remove(Range::from_base_last(5, 44));
        assert_eq!(
            parts_of(&sr),
            vec![Range::from_base_last(0, 4), Range::from_base_last(45, 49)]
        );
    }

    #[test]
    fn remove_misses() {
        let mut sr = SparseRange::from(Range::from_base_last(100, 199));
        sr.remove(Range::from_base_last(0, 99));
        sr.remove(Range::from_base_last(200, 300));
        sr.remove(Range::empty());
        assert_eq!(parts_of(&sr), vec![Range::from_base_last(100, 199)]);
    }

    #[test]
    fn remove_everything() {
        let mut sr = SparseRange::new();
        sr.combine(Range::from_base_last(100, 199));
        sr.combine(Range::from_base_last(300, 399));
        sr.remove(Range::full_64bit());
        assert!(sr.is_empty());
    }

    #[test]
    fn combine_then_includes_then_remove() {
        let r = Range::from_base_last(1234, 123456);
        let mut sr = SparseRange::new();
        sr.combine(Range::from_base_last(0, 10_000));
        sr.combine(r);
        assert!(sr.includes(r));
        sr.remove(r);
        assert!(!sr.overlaps(r));
    }

    #[test]
    fn sparse_arguments() {
        let mut a = SparseRange::new();
        a.combine(Range::from_base_last(0, 9));
        a.combine(Range::from_base_last(20, 29));

        let mut b = SparseRange::from(Range::from_base_last(5, 24));
        b.combine_sparse(&a);
        assert_eq!(parts_of(&b), vec![Range::from_base_last(0, 29)]);
        assert!(b.includes_sparse(&a));

        b.remove_sparse(&a);
        assert_eq!(parts_of(&b), vec![Range::from_base_last(10, 19)]);
        assert!(!b.includes_sparse(&a));
    }

    #[test]
    fn extremes() {
        let mut sr = SparseRange::from(Range::full_64bit());
        assert!(sr.includes_addr(0));
        assert!(sr.includes_addr(u64::MAX));

        sr.remove(Range::from_base_last(1, u64::MAX - 1));
        assert_eq!(
            parts_of(&sr),
            vec![
                Range::from_base_last(0, 0),
                Range::from_base_last(u64::MAX, u64::MAX)
            ]
        );

        sr.combine(Range::from_base_last(1, u64::MAX - 1));
        assert_eq!(parts_of(&sr), vec![Range::full_64bit()]);
    }
}
