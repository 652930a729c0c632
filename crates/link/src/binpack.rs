/// Assigns each item to a bin, returning the bin index per item.
///
/// Items are taken largest first and each goes to the fullest bin that still
/// has room for it, which keeps the remaining free space together. When no
/// bin has room the item goes to the emptiest bin anyway, so callers must
/// check the capacities of the result. With no bins at all every item gets
/// index 0.
pub fn pack_bins(bins: &[u32], items: &[u32]) -> Vec<usize> {
    let mut result = vec![0; items.len()];
    if bins.is_empty() {
        return result;
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| items[*b].cmp(&items[*a]));

    let mut remaining: Vec<u64> = bins.iter().map(|size| u64::from(*size)).collect();
    for item in order {
        let size = u64::from(items[item]);
        let fitting = remaining
            .iter()
            .enumerate()
            .filter(|(_, free)| **free >= size)
            .min_by_key(|(_, free)| **free)
            .map(|(index, _)| index);
        let bin = fitting.unwrap_or_else(|| {
            remaining
                .iter()
                .enumerate()
                .max_by(|(a_index, a), (b_index, b)| a.cmp(b).then(b_index.cmp(a_index)))
                .map_or(0, |(index, _)| index)
        });
        remaining[bin] = remaining[bin].saturating_sub(size);
        result[item] = bin;
    }
    result
}
