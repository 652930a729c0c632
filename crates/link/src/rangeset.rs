use std::collections::BTreeMap;

/// Set of `u32` values stored as disjoint, non-adjacent `[lower, upper)` ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: BTreeMap<u32, u32>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `[lower, upper)`, merging with overlapping or touching ranges.
    pub fn insert(&mut self, lower: u32, upper: u32) {
        if lower >= upper {
            return;
        }
        let mut lower = lower;
        let mut upper = upper;

        if let Some((&start, &end)) = self.ranges.range(..=lower).next_back()
            && end >= lower
        {
            lower = start;
            upper = upper.max(end);
        }
        let absorbed: Vec<u32> = self
            .ranges
            .range(lower..=upper)
            .map(|(&start, _)| start)
            .collect();
        for start in absorbed {
            if let Some(end) = self.ranges.remove(&start) {
                upper = upper.max(end);
            }
        }
        self.ranges.insert(lower, upper);
    }

    /// Removes `[lower, upper)`, splitting ranges that straddle either end.
    pub fn remove(&mut self, lower: u32, upper: u32) {
        if lower >= upper {
            return;
        }
        if let Some((&start, &end)) = self.ranges.range(..lower).next_back()
            && end > lower
        {
            self.ranges.insert(start, lower);
            if end > upper {
                self.ranges.insert(upper, end);
                return;
            }
        }
        let inside: Vec<(u32, u32)> = self
            .ranges
            .range(lower..upper)
            .map(|(&start, &end)| (start, end))
            .collect();
        for (start, end) in inside {
            self.ranges.remove(&start);
            if end > upper {
                self.ranges.insert(upper, end);
            }
        }
    }

    pub fn contains(&self, value: u32) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, &end)| value < end)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.ranges.iter().map(|(&start, &end)| (start, end))
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of values in the set.
    pub fn total(&self) -> u32 {
        self.iter().map(|(start, end)| end - start).sum()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
