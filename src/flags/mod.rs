// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sparse sets of sample indices.
//!
//! Inside a station, a [`FlagSet`] marks the samples of a subband that
//! *arrived*. On the wire and on compute nodes, the same type marks the
//! samples that are *missing*; [`FlagSet::invert`] converts between the two.


use std::ops::{BitOr, Range};

/// A set of half-open `[begin, end)` ranges over sample indices. The ranges
/// are kept sorted, non-overlapping and non-adjacent, so two sets with the
/// same members always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    ranges: Vec<Range<usize>>,
}

impl FlagSet {
    pub fn new() -> FlagSet {
        FlagSet::default()
    }

    /// A set containing every index of `[0, len)`.
    pub fn full(len: usize) -> FlagSet {
        let mut fs = FlagSet::new();
        fs.include(0, len);
        fs
    }

    /// Build a set from arbitrary (possibly overlapping, unsorted) ranges.
    pub fn from_ranges<I: IntoIterator<Item = Range<usize>>>(ranges: I) -> FlagSet {
        let mut fs = FlagSet::new();
        for r in ranges {
            fs.include(r.start, r.end);
        }
        fs
    }

    /// Add `[begin, end)` to the set. Empty ranges are ignored.
    pub fn include(&mut self, begin: usize, end: usize) -> &mut Self {
        if begin >= end {
            return self;
        }

        // Ranges that overlap or touch the new one get merged into it.
        let first = self.ranges.partition_point(|r| r.end < begin);
        let last = self.ranges.partition_point(|r| r.start <= end);
        if first == last {
            self.ranges.insert(first, begin..end);
        } else {
            let start = begin.min(self.ranges[first].start);
            let stop = end.max(self.ranges[last - 1].end);
            self.ranges.splice(first..last, std::iter::once(start..stop));
        }
        self
    }

    /// Remove `[begin, end)` from the set.
    pub fn exclude(&mut self, begin: usize, end: usize) -> &mut Self {
        if begin >= end {
            return self;
        }

        let first = self.ranges.partition_point(|r| r.end <= begin);
        let last = self.ranges.partition_point(|r| r.start < end);
        if first >= last {
            return self;
        }

        let mut leftovers = Vec::with_capacity(2);
        let head = &self.ranges[first];
        if head.start < begin {
            leftovers.push(head.start..begin);
        }
        let tail = &self.ranges[last - 1];
        if tail.end > end {
            leftovers.push(end..tail.end);
        }
        self.ranges.splice(first..last, leftovers);
        self
    }

    /// The complement of this set within `[0, universe)`. Anything at or
    /// beyond `universe` is ignored.
    pub fn invert(&self, universe: usize) -> FlagSet {
        let mut ranges = Vec::with_capacity(self.ranges.len() + 1);
        let mut prev_end = 0;
        for r in &self.ranges {
            if r.start >= universe {
                break;
            }
            if r.start > prev_end {
                ranges.push(prev_end..r.start);
            }
            prev_end = r.end;
        }
        if prev_end < universe {
            ranges.push(prev_end..universe);
        }
        FlagSet { ranges }
    }

    /// All indices in either set.
    pub fn union(&self, other: &FlagSet) -> FlagSet {
        let (mut out, small) = if self.ranges.len() >= other.ranges.len() {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };
        for r in &small.ranges {
            out.include(r.start, r.end);
        }
        out
    }

    /// Drop everything at or beyond `len`.
    pub fn clip(&mut self, len: usize) -> &mut Self {
        self.exclude(len, usize::MAX)
    }

    /// The number of indices in the set.
    pub fn count(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    pub fn contains(&self, index: usize) -> bool {
        let i = self.ranges.partition_point(|r| r.end <= index);
        self.ranges.get(i).map(|r| r.start <= index).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

impl BitOr for &FlagSet {
    type Output = FlagSet;

    fn bitor(self, rhs: &FlagSet) -> FlagSet {
        self.union(rhs)
    }
}
